//! Completion rule for hierarchical GATT discovery
//!
//! A discovery call for a set of ids completes once the ids reported for the
//! right parent cover everything that was asked for. Asking for everything
//! completes on the first report. A request whose ids never all show up never
//! completes; callers that need a deadline wrap the call in a timeout.

use std::collections::HashSet;

use uuid::Uuid;

/// Which children a discovery call asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryRequest {
    /// Whatever the peripheral has
    All,
    /// Only these ids
    Only(Vec<Uuid>),
}

impl DiscoveryRequest {
    pub fn from_ids(ids: Option<&[Uuid]>) -> Self {
        match ids {
            Some(ids) => DiscoveryRequest::Only(ids.to_vec()),
            None => DiscoveryRequest::All,
        }
    }

    /// The ids passed on to the hardware, `None` meaning "all"
    pub fn ids(&self) -> Option<&[Uuid]> {
        match self {
            DiscoveryRequest::All => None,
            DiscoveryRequest::Only(ids) => Some(ids),
        }
    }

    pub fn includes(&self, id: &Uuid) -> bool {
        match self {
            DiscoveryRequest::All => true,
            DiscoveryRequest::Only(ids) => ids.contains(id),
        }
    }

    /// Whether the discovered ids satisfy this request.
    ///
    /// Callers check the parent first; this only looks at the ids.
    pub fn is_complete<'a, I>(&self, discovered: I) -> bool
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        match self {
            DiscoveryRequest::All => true,
            DiscoveryRequest::Only(needed) => {
                let found: HashSet<&Uuid> = discovered.into_iter().collect();
                needed.iter().all(|id| found.contains(id))
            }
        }
    }
}

impl From<Option<Vec<Uuid>>> for DiscoveryRequest {
    fn from(ids: Option<Vec<Uuid>>) -> Self {
        match ids {
            Some(ids) => DiscoveryRequest::Only(ids),
            None => DiscoveryRequest::All,
        }
    }
}

/// Merge newly found nodes into a discovery cache.
///
/// The cache only grows: new nodes go first in the order they were found,
/// followed by previously known nodes, and duplicates keep their first
/// occurrence.
pub fn merge_discovered<T>(cache: &mut Vec<T>, found: Vec<T>)
where
    T: Clone + Eq + std::hash::Hash,
{
    let mut seen = HashSet::new();
    let previous = std::mem::take(cache);
    for node in found.into_iter().chain(previous) {
        if seen.insert(node.clone()) {
            cache.push(node);
        }
    }
}
