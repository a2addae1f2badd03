use anyhow::Result;
use async_trait::async_trait;
use lk_api_types::{ChainId, WalletAddress};
use rocksdb::{DB, Options};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastAccountRecord {
    pub app_name: String,
    pub address: WalletAddress,
    pub chain: ChainId,
    pub remembered_at_epoch_ms: u128,
}

/// Advisory store for the last account an application had active.
#[async_trait]
pub trait AccountMemory: Send + Sync {
    async fn remember(&self, record: &LastAccountRecord) -> Result<()>;
    async fn recall(&self, app_name: &str) -> Result<Option<LastAccountRecord>>;
}

#[derive(Default)]
pub struct NoopAccountMemory;

#[async_trait]
impl AccountMemory for NoopAccountMemory {
    async fn remember(&self, _record: &LastAccountRecord) -> Result<()> {
        Ok(())
    }

    async fn recall(&self, _app_name: &str) -> Result<Option<LastAccountRecord>> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemoryAccountMemory {
    records: RwLock<HashMap<String, LastAccountRecord>>,
}

#[async_trait]
impl AccountMemory for InMemoryAccountMemory {
    async fn remember(&self, record: &LastAccountRecord) -> Result<()> {
        let mut guard = self.records.write().await;
        guard.insert(record.app_name.clone(), record.clone());
        Ok(())
    }

    async fn recall(&self, app_name: &str) -> Result<Option<LastAccountRecord>> {
        let guard = self.records.read().await;
        Ok(guard.get(app_name).cloned())
    }
}

pub struct RocksDbAccountMemory {
    db: Arc<DB>,
}

impl RocksDbAccountMemory {
    pub fn open_default(path: &str) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn key_for_app(app_name: &str) -> String {
        format!("last-account:{app_name}")
    }
}

#[async_trait]
impl AccountMemory for RocksDbAccountMemory {
    async fn remember(&self, record: &LastAccountRecord) -> Result<()> {
        let key = Self::key_for_app(&record.app_name);
        let value = serde_json::to_vec(record)?;
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    async fn recall(&self, app_name: &str) -> Result<Option<LastAccountRecord>> {
        let key = Self::key_for_app(app_name);
        let value = self.db.get(key.as_bytes())?;
        match value {
            Some(raw) => Ok(Some(serde_json::from_slice::<LastAccountRecord>(&raw)?)),
            None => Ok(None),
        }
    }
}
