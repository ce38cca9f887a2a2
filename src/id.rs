//! Node-partitioned, time-ordered 64-bit identifiers.
//!
//! Layout, high to low: 42 bits of milliseconds since [`EPOCH_MILLIS`], 10 bits of node index,
//! 12 bits of per-millisecond sequence.
//!
//! ```rust
//! use threadbare::id::{IdGenerator, NodeIndex};
//!
//! let ids = IdGenerator::new(NodeIndex::new(3).unwrap());
//! let a = ids.generate();
//! let b = ids.generate();
//! assert!(b > a);
//! assert_eq!(a.node(), 3);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::clock::{Clock, SystemClock};
use crate::error::IdError;

/// Custom epoch (2022-10-08T12:08:08Z) in Unix milliseconds.
pub const EPOCH_MILLIS: u64 = 1_665_230_888_000;
/// Largest accepted node index.
pub const MAX_NODE: u16 = 9;

const NODE_BITS: u32 = 10;
const STEP_BITS: u32 = 12;
const STEP_MASK: u64 = (1 << STEP_BITS) - 1;
const NODE_SHIFT: u32 = STEP_BITS;
const TIME_SHIFT: u32 = NODE_BITS + STEP_BITS;

/// A generated identifier. Orders by creation time, then node, then sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    /// Raw integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Milliseconds since the Unix epoch at which the ID was minted.
    pub fn timestamp_millis(self) -> u64 {
        (self.0 >> TIME_SHIFT) + EPOCH_MILLIS
    }

    /// Generator node that minted the ID.
    pub fn node(self) -> u16 {
        ((self.0 >> NODE_SHIFT) & ((1 << NODE_BITS) - 1)) as u16
    }

    /// Sequence number within the millisecond.
    pub fn sequence(self) -> u16 {
        (self.0 & STEP_MASK) as u16
    }

    /// Little-endian byte representation.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Compact URL-safe form used for stamps and cache-busting parameters.
    pub fn to_base64(self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Parse the output of [`Id::to_base64`].
    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_le_bytes(bytes)))
    }
}

impl From<u64> for Id {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated generator node index in `0..=9`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeIndex(u16);

impl NodeIndex {
    /// Validate a node index.
    pub fn new(index: i64) -> Result<Self, IdError> {
        match u16::try_from(index) {
            Ok(i) if i <= MAX_NODE => Ok(Self(i)),
            _ => Err(IdError::InvalidNodeIndex(index)),
        }
    }

    /// The index value.
    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock-free snowflake generator.
///
/// The last issued `(elapsed millis, sequence)` pair is packed into one atomic word and advanced
/// with compare-and-swap, so concurrent callers never observe the same pair. When the sequence
/// space for a millisecond is exhausted, callers spin until the clock ticks.
pub struct IdGenerator {
    node: NodeIndex,
    clock: Arc<dyn Clock>,
    state: AtomicU64,
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("node", &self.node)
            .field("last", &(self.state.load(Ordering::Relaxed) >> STEP_BITS))
            .finish()
    }
}

impl IdGenerator {
    /// Generator for `node` using the system clock.
    pub fn new(node: NodeIndex) -> Self {
        Self::with_clock(node, Arc::new(SystemClock))
    }

    /// Generator for `node` with an injected clock.
    pub fn with_clock(node: NodeIndex, clock: Arc<dyn Clock>) -> Self {
        Self { node, clock, state: AtomicU64::new(0) }
    }

    /// The node index baked into every ID.
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    fn elapsed(&self) -> u64 {
        self.clock.now_millis().saturating_sub(EPOCH_MILLIS)
    }

    /// Mint a new ID.
    pub fn generate(&self) -> Id {
        let mut prev = self.state.load(Ordering::Acquire);
        loop {
            let now = self.elapsed();
            let last = prev >> STEP_BITS;
            let next = if now > last {
                now << STEP_BITS
            } else if prev & STEP_MASK < STEP_MASK {
                // Same millisecond, or the clock stepped back: stay on `last`.
                prev + 1
            } else {
                std::hint::spin_loop();
                std::thread::yield_now();
                prev = self.state.load(Ordering::Acquire);
                continue;
            };
            match self.state.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let elapsed = next >> STEP_BITS;
                    let step = next & STEP_MASK;
                    return Id(
                        (elapsed << TIME_SHIFT) | (u64::from(self.node.0) << NODE_SHIFT) | step,
                    );
                }
                Err(actual) => prev = actual,
            }
        }
    }
}
