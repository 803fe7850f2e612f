use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use tokdir_docstore::{Document, StoreResult};

pub(crate) const DEVICES_FIELD: &str = "devices";
pub(crate) const AVAIL_FIELD: &str = "avail";

const SHARD_ID_LEN: usize = 20;

/// Random alphanumeric id for a new shard record
pub fn new_shard_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SHARD_ID_LEN)
        .map(char::from)
        .collect()
}

/// One bounded-capacity record of device -> token pairs.
///
/// `devices` and `tokens` are parallel arrays; `avail` is the number of
/// free slots left. Order inside a shard carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenShard {
    #[serde(skip)]
    pub id: String,
    pub devices: Vec<String>,
    pub tokens: Vec<String>,
    pub avail: u32,
}

impl TokenShard {
    /// A fresh shard holding a single entry
    pub fn with_entry(device: &str, token: &str, capacity: u32) -> Self {
        Self {
            id: String::new(),
            devices: vec![device.to_string()],
            tokens: vec![token.to_string()],
            avail: capacity.saturating_sub(1),
        }
    }

    pub fn from_document(doc: &Document) -> StoreResult<Self> {
        let mut shard: TokenShard = doc.decode()?;
        shard.id = doc.id.clone();
        Ok(shard)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn position(&self, device: &str) -> Option<usize> {
        self.devices.iter().position(|d| d == device)
    }

    pub fn token_of(&self, device: &str) -> Option<&str> {
        self.position(device)
            .and_then(|idx| self.tokens.get(idx))
            .map(String::as_str)
    }

    /// Append a pair and consume one free slot. Caller checks `avail > 0`.
    pub fn push(&mut self, device: &str, token: &str) {
        self.devices.push(device.to_string());
        self.tokens.push(token.to_string());
        self.avail = self.avail.saturating_sub(1);
    }

    /// Overwrite the last slot into `idx` in both arrays and shrink by one.
    pub fn swap_remove(&mut self, idx: usize) -> (String, String) {
        let device = self.devices.swap_remove(idx);
        let token = self.tokens.swap_remove(idx);
        self.avail += 1;
        (device, token)
    }

    /// Pairs in storage order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.devices
            .iter()
            .zip(self.tokens.iter())
            .map(|(d, t)| (d.as_str(), t.as_str()))
    }

    /// Check per-shard bookkeeping against the configured capacity.
    pub fn check(&self, capacity: u32) -> Result<(), String> {
        if self.devices.len() != self.tokens.len() {
            return Err(format!(
                "{} devices but {} tokens",
                self.devices.len(),
                self.tokens.len()
            ));
        }
        if self.devices.len() > capacity as usize {
            return Err(format!(
                "{} devices exceed capacity {}",
                self.devices.len(),
                capacity
            ));
        }
        if self.devices.len() + self.avail as usize != capacity as usize {
            return Err(format!(
                "avail {} does not match {} devices at capacity {}",
                self.avail,
                self.devices.len(),
                capacity
            ));
        }
        Ok(())
    }
}
