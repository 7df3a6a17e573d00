//! Correlation ids
//!
//! A correlation id ties the bait page load, the probe script fetch and the
//! deep collection submission of one visitor to a single capture record. Ids
//! are 256 bits from the OS entropy source, hex encoded to 64 characters.

use rand::rngs::OsRng;
use rand::RngCore;

pub const ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct Correlator;

impl Correlator {
    pub fn new() -> Self {
        Self
    }

    /// Mint a fresh id.
    ///
    /// An exhausted entropy source leaves no safe way to keep issuing ids, so
    /// the process is aborted.
    pub fn mint(&self) -> String {
        match self.try_mint() {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Entropy source failed, cannot mint correlation ids: {}", e);
                std::process::abort();
            }
        }
    }

    pub fn try_mint(&self) -> Result<String, rand::Error> {
        let mut bytes = [0u8; ID_LEN / 2];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(hex::encode(bytes))
    }

    /// Shape check only: exactly 64 characters of `[a-zA-Z0-9]`.
    pub fn validate(&self, id: &str) -> bool {
        is_valid_id(id)
    }
}

/// Every byte is inspected regardless of where a mismatch occurs.
pub fn is_valid_id(id: &str) -> bool {
    let shape_ok = id
        .bytes()
        .fold(true, |ok, b| ok & b.is_ascii_alphanumeric());
    shape_ok & (id.len() == ID_LEN)
}
