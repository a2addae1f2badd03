use anyhow::{Result, anyhow};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey};
use lk_api_types::{Account, WalletAddress};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use zeroize::Zeroizing;

/// Signing capability handed out by a wallet extension for its accounts.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_raw(&self, address: &WalletAddress, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Development key pair, either derived from a URI such as `//Alice` or random.
///
/// URI derivation is a plain SHA-256 of the URI and is only meant for local
/// development chains.
pub struct DevKeypair {
    signing_key: SigningKey,
    name: Option<String>,
}

impl DevKeypair {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(anyhow!("derivation uri cannot be empty"));
        }

        let mut hasher = Sha256::new();
        hasher.update(b"link:dev:");
        hasher.update(uri.as_bytes());
        let digest = hasher.finalize();
        let mut seed = Zeroizing::new([0_u8; 32]);
        seed.copy_from_slice(&digest);

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
            name: Some(uri.trim_start_matches('/').to_owned()),
        })
    }

    pub fn new_random() -> Self {
        let mut rng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn address(&self) -> WalletAddress {
        WalletAddress(format!("0x{}", to_hex(&self.public_key_bytes())))
    }

    pub fn account(&self, source: &str) -> Account {
        Account {
            address: self.address(),
            name: self.name.clone(),
            source: Some(source.to_owned()),
        }
    }

    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.is_empty() {
            return Err(anyhow!("payload cannot be empty"));
        }

        let mut signing_input = Vec::with_capacity(16 + payload.len());
        signing_input.extend_from_slice(b"link:v1:raw:");
        signing_input.extend_from_slice(payload);

        let signature: Signature = self.signing_key.sign(&signing_input);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Ordered set of development key pairs that signs for any of its addresses.
#[derive(Default)]
pub struct DevKeyring {
    pairs: RwLock<Vec<DevKeypair>>,
}

impl DevKeyring {
    pub fn from_uris<'a>(uris: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let pairs = uris
            .into_iter()
            .map(DevKeypair::from_uri)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pairs: RwLock::new(pairs),
        })
    }

    /// Adds a key pair, replacing any existing pair with the same address.
    pub fn insert(&self, pair: DevKeypair) -> Result<WalletAddress> {
        let address = pair.address();
        let mut guard = self
            .pairs
            .write()
            .map_err(|_| anyhow!("dev keyring lock poisoned"))?;
        guard.retain(|existing| existing.address() != address);
        guard.push(pair);
        Ok(address)
    }

    pub fn accounts(&self, source: &str) -> Vec<Account> {
        match self.pairs.read() {
            Ok(guard) => guard.iter().map(|pair| pair.account(source)).collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl Signer for DevKeyring {
    async fn sign_raw(&self, address: &WalletAddress, payload: &[u8]) -> Result<Vec<u8>> {
        let guard = self
            .pairs
            .read()
            .map_err(|_| anyhow!("dev keyring lock poisoned"))?;
        let pair = guard
            .iter()
            .find(|pair| &pair.address() == address)
            .ok_or_else(|| anyhow!("no key for address {address}"))?;
        pair.sign(payload)
    }
}

fn to_hex(input: &[u8]) -> String {
    let mut output = String::with_capacity(input.len() * 2);
    for byte in input {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
