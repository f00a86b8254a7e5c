//! Resource limits applied while unpacking untrusted port data.
//!
//! Port data arrives from remote peers, so nothing in it may drive the
//! deserializer into unbounded work: nesting depth of the read-state stack and
//! the element count of any single array are both capped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_STATE_DEPTH: usize = 64;
pub const DEFAULT_MAX_ARRAY_LEN: u32 = u32::MAX - 1;

/// Call-site configurable deserializer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeserializerLimits {
    pub max_state_depth: usize,
    pub max_array_len: u32,
}

impl Default for DeserializerLimits {
    fn default() -> Self {
        Self {
            max_state_depth: DEFAULT_MAX_STATE_DEPTH,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

impl DeserializerLimits {
    /// Call before pushing a frame that would bring the stack to `depth`.
    pub fn check_depth(&self, depth: usize) -> Result<(), LimitError> {
        if depth > self.max_state_depth {
            return Err(LimitError::StateDepth {
                limit: self.max_state_depth,
            });
        }
        Ok(())
    }

    pub fn check_array_len(&self, length: u32) -> Result<(), LimitError> {
        if length > self.max_array_len {
            return Err(LimitError::ArrayLength {
                length,
                limit: self.max_array_len,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("read-state depth limit exceeded (limit {limit})")]
    StateDepth { limit: usize },
    #[error("array length {length} exceeds limit {limit}")]
    ArrayLength { length: u32, limit: u32 },
}
