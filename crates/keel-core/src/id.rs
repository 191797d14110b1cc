//! Aggregate identity generation.
//!
//! Identifiers are 64-bit time-sorted ids (TSIDs): 42 bits of milliseconds
//! since 2020-01-01T00:00:00Z followed by 22 bits shared between a node id
//! and a per-millisecond counter. The node id keeps ids collision-free across
//! process instances; the counter keeps them strictly increasing within one.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::clock::Clock;

/// Environment variable holding the number of nodes in the deployment.
pub const TSID_NODE_COUNT_ENV: &str = "TSID_NODE_COUNT";

/// Environment variable holding this process's node id.
pub const TSID_NODE_ENV: &str = "TSID_NODE";

/// 2020-01-01T00:00:00Z in Unix milliseconds.
pub const TSID_EPOCH_MILLIS: i64 = 1_577_836_800_000;

const DEFAULT_NODE_COUNT: u32 = 256;
const RANDOM_BITS: u32 = 22;
const MAX_NODE_BITS: u32 = 20;
const TIME_MASK: u64 = (1 << 42) - 1;

/// Produces globally unique, time-ordered aggregate identifiers.
pub trait IdGenerator: Send + Sync {
    /// Returns a new identifier, greater than every previously returned one.
    fn next_id(&self) -> u64;
}

/// Invalid identity generator configuration.
#[derive(Debug, Error)]
pub enum IdConfigError {
    /// A variable is present but not an unsigned integer.
    #[error("{name} must be an unsigned integer, got `{value}`")]
    NotANumber {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// The node count is zero or needs more than 20 node bits.
    #[error("TSID_NODE_COUNT must be between 1 and 2^20, got {0}")]
    NodeCountOutOfRange(u32),

    /// The node id does not fit in the node bits of the configured count.
    #[error("TSID_NODE must be below {limit} for the configured node count, got {node}")]
    NodeOutOfRange {
        /// Requested node id.
        node: u32,
        /// Exclusive upper bound, `2^node_bits`.
        limit: u64,
    },
}

/// Identity generator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsidConfig {
    /// Number of nodes that generate ids concurrently.
    pub node_count: u32,
    /// This node's id; random when absent.
    pub node: Option<u32>,
}

impl Default for TsidConfig {
    fn default() -> Self {
        Self {
            node_count: DEFAULT_NODE_COUNT,
            node: None,
        }
    }
}

impl TsidConfig {
    /// Reads `TSID_NODE_COUNT` (default 256) and `TSID_NODE` (default random).
    ///
    /// # Errors
    ///
    /// Returns `IdConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, IdConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `IdConfigError` if a variable is set to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IdConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let parse = |name: &'static str| -> Result<Option<u32>, IdConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| IdConfigError::NotANumber { name, value })
                })
                .transpose()
        };

        let node_count = parse(TSID_NODE_COUNT_ENV)?.unwrap_or(DEFAULT_NODE_COUNT);
        if node_count == 0 || node_bits_for(node_count) > MAX_NODE_BITS {
            return Err(IdConfigError::NodeCountOutOfRange(node_count));
        }

        let config = Self {
            node_count,
            node: parse(TSID_NODE_ENV)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that an explicit node id fits in the node bits. A larger id
    /// would be truncated and share node bits with another node.
    ///
    /// # Errors
    ///
    /// Returns `IdConfigError::NodeOutOfRange` if it does not.
    pub fn validate(&self) -> Result<(), IdConfigError> {
        let limit = 1_u64 << self.node_bits();
        match self.node {
            Some(node) if u64::from(node) >= limit => {
                Err(IdConfigError::NodeOutOfRange { node, limit })
            }
            _ => Ok(()),
        }
    }

    /// Number of id bits reserved for the node.
    #[must_use]
    pub fn node_bits(&self) -> u32 {
        node_bits_for(self.node_count).min(MAX_NODE_BITS)
    }
}

fn node_bits_for(node_count: u32) -> u32 {
    node_count.checked_ilog2().unwrap_or(0)
}

#[derive(Debug)]
struct TsidState {
    last_millis: u64,
    counter: u64,
}

/// Time-sorted id generator.
pub struct TsidGenerator {
    node: u64,
    counter_bits: u32,
    clock: Arc<dyn Clock>,
    state: Mutex<TsidState>,
}

impl std::fmt::Debug for TsidGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsidGenerator")
            .field("node", &self.node)
            .field("counter_bits", &self.counter_bits)
            .finish_non_exhaustive()
    }
}

impl TsidGenerator {
    /// Creates a generator for the configured node.
    ///
    /// An explicit node is masked to the node bits; `TsidConfig::validate`
    /// (run by `from_env`) rejects nodes that would be truncated.
    #[must_use]
    pub fn new(config: TsidConfig, clock: Arc<dyn Clock>) -> Self {
        let node_bits = config.node_bits();
        let node_mask = (1_u64 << node_bits) - 1;
        let node = config
            .node
            .map_or_else(rand::random::<u64>, u64::from)
            & node_mask;

        Self {
            node,
            counter_bits: RANDOM_BITS - node_bits,
            clock,
            state: Mutex::new(TsidState {
                last_millis: 0,
                counter: 0,
            }),
        }
    }

    /// The node id embedded in every generated id.
    #[must_use]
    pub fn node(&self) -> u64 {
        self.node
    }

    fn counter_mask(&self) -> u64 {
        (1_u64 << self.counter_bits) - 1
    }

    #[allow(clippy::cast_sign_loss)]
    fn current_millis(&self) -> u64 {
        (self.clock.epoch_millis() - TSID_EPOCH_MILLIS).max(0) as u64
    }
}

impl IdGenerator for TsidGenerator {
    fn next_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.current_millis();
        let mask = self.counter_mask();

        if now > state.last_millis {
            state.last_millis = now;
            state.counter = rand::random::<u64>() & mask;
        } else {
            // Same millisecond or the clock moved backwards: keep the last
            // timestamp and count up, borrowing the next millisecond on overflow.
            state.counter += 1;
            if state.counter > mask {
                state.last_millis += 1;
                state.counter = 0;
            }
        }

        ((state.last_millis & TIME_MASK) << RANDOM_BITS)
            | (self.node << self.counter_bits)
            | state.counter
    }
}

/// Extracts the millisecond timestamp (Unix epoch) embedded in a TSID.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn tsid_epoch_millis(id: u64) -> i64 {
    (id >> RANDOM_BITS) as i64 + TSID_EPOCH_MILLIS
}
