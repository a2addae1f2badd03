use lk_api_types::{ChainDescriptor, ChainId};
use std::collections::HashMap;

use crate::ConnectionError;

pub const DEVELOPMENT: &str = "development";

#[derive(Debug, Default, Clone)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainDescriptor>,
}

impl ChainRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for chain in builtin_chains() {
            registry.register(chain);
        }
        registry
    }

    pub fn register(&mut self, chain: ChainDescriptor) {
        self.chains.insert(chain.id.0.clone(), chain);
    }

    pub fn get(&self, chain_id: &str) -> Option<&ChainDescriptor> {
        self.chains.get(chain_id)
    }

    pub fn resolve(&self, chain_id: &ChainId) -> Result<ChainDescriptor, ConnectionError> {
        self.get(&chain_id.0)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownChain(chain_id.clone()))
    }

    pub fn chains(&self) -> Vec<ChainDescriptor> {
        let mut chains: Vec<_> = self.chains.values().cloned().collect();
        chains.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        chains
    }
}

fn chain(id: &str, name: &str, rpc_urls: &[&str], ss58_prefix: u16, testnet: bool) -> ChainDescriptor {
    ChainDescriptor {
        id: ChainId::new(id),
        name: name.to_owned(),
        rpc_urls: rpc_urls.iter().map(|url| (*url).to_owned()).collect(),
        ss58_prefix,
        testnet,
    }
}

fn builtin_chains() -> Vec<ChainDescriptor> {
    vec![
        chain(DEVELOPMENT, "Local Development", &["ws://127.0.0.1:9944"], 42, true),
        chain(
            "pop-network",
            "Pop Network",
            &["wss://rpc1.paseo.popnetwork.xyz", "wss://rpc2.paseo.popnetwork.xyz"],
            42,
            true,
        ),
        chain("alephzero-testnet", "Aleph Zero Testnet", &["wss://ws.test.azero.dev"], 42, true),
        chain("shibuya", "Shibuya Testnet", &["wss://rpc.shibuya.astar.network"], 5, true),
        chain("astar", "Astar", &["wss://rpc.astar.network"], 5, false),
    ]
}
