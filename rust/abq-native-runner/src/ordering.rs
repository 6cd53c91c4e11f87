//! Ordering strategies.
//!
//! Every runner in a run must visit tests in exactly the order the manifest
//! listed them, possibly in different processes. Only strategies that are a
//! pure function of the seed, the item ids, and file modification times can
//! be reproduced that way, so the set is closed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use abq_protocol::InitMeta;

use crate::WorkerError;

/// The supported ordering strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ordering {
    /// Declaration order.
    Defined,
    /// Seeded shuffle.
    Random,
    /// Newest source files first.
    RecentlyModified,
}

pub const SUPPORTED_ORDERINGS: [Ordering; 3] = [
    Ordering::Defined,
    Ordering::Random,
    Ordering::RecentlyModified,
];

impl Ordering {
    pub fn name(self) -> &'static str {
        match self {
            Self::Defined => "defined",
            Self::Random => "random",
            Self::RecentlyModified => "recently_modified",
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Ordering {
    type Err = WorkerError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        SUPPORTED_ORDERINGS
            .into_iter()
            .find(|ordering| ordering.name() == name)
            .ok_or_else(|| WorkerError::UnsupportedOrdering(name.to_owned()))
    }
}

/// The host framework's global ordering, which may be a strategy this
/// adapter cannot reproduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalOrdering {
    Supported(Ordering),
    Custom(String),
}

impl GlobalOrdering {
    pub fn supported(&self) -> Result<Ordering, WorkerError> {
        match self {
            Self::Supported(ordering) => Ok(*ordering),
            Self::Custom(name) => Err(WorkerError::UnsupportedOrdering(name.clone())),
        }
    }
}

/// Ordering and seed to share with the other runners.
pub fn to_meta(seed: u64, global: &GlobalOrdering) -> Result<InitMeta, WorkerError> {
    let ordering = global.supported()?;
    Ok(InitMeta {
        ordering: ordering.name().to_owned(),
        seed,
    })
}

/// Something the strategy can order.
pub trait Orderable {
    /// Stable identity, hashed by the random strategy.
    fn ordering_id(&self) -> &str;
    /// Source file, looked up by the recently-modified strategy.
    fn source_file(&self) -> &str;
}

/// A concrete ordering: the strategy plus everything it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingStrategy {
    ordering: Ordering,
    seed: u64,
    modified_at: BTreeMap<String, SystemTime>,
}

impl OrderingStrategy {
    pub fn new(ordering: Ordering, seed: u64) -> Self {
        Self {
            ordering,
            seed,
            modified_at: BTreeMap::new(),
        }
    }

    /// Modification times used by [`Ordering::RecentlyModified`]. Files
    /// missing from the map sort last.
    pub fn with_modification_times(mut self, modified_at: BTreeMap<String, SystemTime>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Order `items` with the global strategy, or `local` when the
    /// containing group overrides it.
    pub fn order<'a, T: Orderable>(&self, items: &'a [T], local: Option<Ordering>) -> Vec<&'a T> {
        let mut ordered: Vec<&T> = items.iter().collect();
        match local.unwrap_or(self.ordering) {
            Ordering::Defined => {}
            Ordering::Random => {
                let seed = self.seed.to_string();
                ordered.sort_by_cached_key(|item| jenkins_hash_digest(&seed, item.ordering_id()));
            }
            Ordering::RecentlyModified => {
                ordered.sort_by_cached_key(|item| {
                    std::cmp::Reverse(self.modified_at.get(item.source_file()).copied())
                });
            }
        }
        ordered
    }
}

/// Bob Jenkins' one-at-a-time hash over `seed ++ id`, masked to 32 bits at
/// every step. Depends only on its input bytes, so every process computes
/// the same digest.
fn jenkins_hash_digest(seed: &str, id: &str) -> u32 {
    let mut hash: u32 = 0;
    for &byte in seed.as_bytes().iter().chain(id.as_bytes()) {
        hash = hash.wrapping_add(u32::from(byte));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}
