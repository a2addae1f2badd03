//! Latest-snapshot store.
//!
//! Snapshots are replaced whole, so observers never see a partial update. A
//! slow observer only sees the most recent snapshot.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Session;

#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Arc<Session>>>,
}

impl SessionStore {
    pub fn new(initial: Session) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn publish(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.tx.send_replace(session.clone());
        session
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Calls `observer` with the current snapshot and then after every change.
    pub fn observe<F>(&self, mut observer: F) -> ObserverGuard
    where
        F: FnMut(Arc<Session>) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let mut session = rx.borrow_and_update().clone();
        let task = tokio::spawn(async move {
            loop {
                observer(session);
                if rx.changed().await.is_err() {
                    break;
                }
                session = rx.borrow_and_update().clone();
            }
        });
        ObserverGuard { task: Some(task) }
    }
}

pub struct SessionSubscription {
    rx: watch::Receiver<Arc<Session>>,
}

impl SessionSubscription {
    pub fn latest(&self) -> Arc<Session> {
        self.rx.borrow().clone()
    }

    /// Waits for the next published snapshot. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Arc<Session>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until a snapshot satisfies `predicate`, checking the current one first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Arc<Session>>
    where
        F: FnMut(&Session) -> bool,
    {
        let session = self.rx.wait_for(|session| predicate(session.as_ref())).await.ok()?;
        Some(session.clone())
    }
}

/// Keeps an observer registered. Unsubscribing is idempotent and happens on drop.
pub struct ObserverGuard {
    task: Option<JoinHandle<()>>,
}

impl ObserverGuard {
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
