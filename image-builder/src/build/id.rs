//! BuildId generation.
//!
//! Ids are six base62 characters. A process-wide counter is pushed through a
//! fixed permutation of `[0, 62^6)`, so ids never repeat within a process
//! and consecutive submissions do not produce visibly consecutive tokens.
//! Uniqueness across processes is not guaranteed; the random starting offset
//! only makes collisions unlikely.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use thiserror::Error;

use super::request::BuildId;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of every generated id.
pub const ID_LEN: usize = 6;

const ID_SPACE: u64 = 56_800_235_584; // 62^6

// Odd and not a multiple of 31, hence invertible modulo 62^6.
const MULTIPLIER: u128 = 9_576_890_767;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("build id space exhausted after {0} ids")]
    Exhausted(u64),

    #[error("build id generation failed: {0}")]
    Failed(String),
}

/// Source of fresh build ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<BuildId, IdError>;
}

/// Counter-based generator; see the module docs.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    offset: u64,
    issued: AtomicU64,
}

impl SequenceIdGenerator {
    /// Generator starting at a random point of the id space.
    pub fn new() -> Self {
        Self::with_offset(rand::thread_rng().gen_range(0..ID_SPACE))
    }

    pub fn with_offset(offset: u64) -> Self {
        Self {
            offset: offset % ID_SPACE,
            issued: AtomicU64::new(0),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> Result<BuildId, IdError> {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        if n >= ID_SPACE {
            return Err(IdError::Exhausted(ID_SPACE));
        }
        let slot = (self.offset + n) % ID_SPACE;
        Ok(BuildId::new(encode(permute(slot))))
    }
}

fn permute(slot: u64) -> u64 {
    ((slot as u128 * MULTIPLIER) % ID_SPACE as u128) as u64
}

fn encode(mut value: u64) -> String {
    let mut out = [b'0'; ID_LEN];
    for digit in out.iter_mut().rev() {
        *digit = ALPHABET[(value % 62) as usize];
        value /= 62;
    }
    out.iter().map(|&b| b as char).collect()
}
