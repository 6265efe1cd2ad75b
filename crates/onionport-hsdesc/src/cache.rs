//! Looking up descriptors by service identity.

use crate::desc::HsDescriptor;
use crate::key::OnionServiceId;

use safelog::sensitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::debug;

/// Something that can find the current descriptor for an onion service.
///
/// Implementations must be safe to call from many connections at once.
pub trait DescriptorLookup: Send + Sync {
    /// Return the current descriptor for `id`, if we have one.
    fn lookup(&self, id: &OnionServiceId) -> Option<Arc<HsDescriptor>>;
}

/// An in-memory map from service identity to its newest known descriptor.
///
/// The lock is only held for map operations, never across an await.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    /// Descriptors, keyed by the identity of the service they describe.
    inner: Mutex<HashMap<OnionServiceId, Arc<HsDescriptor>>>,
}

impl DescriptorCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map.
    ///
    /// Nothing in this type can leave the map inconsistent, so a poisoned
    /// lock is still usable.
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<OnionServiceId, Arc<HsDescriptor>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `desc`, unless we already have one for the same service that was
    /// published at the same time or later.
    ///
    /// Return true if `desc` was stored.
    pub fn insert(&self, desc: Arc<HsDescriptor>) -> bool {
        let id = desc.onion_id();
        let mut map = self.map();
        match map.get(&id) {
            Some(existing) if existing.publication_time() >= desc.publication_time() => {
                debug!(
                    "Ignoring descriptor for {}: not newer than the one we have",
                    sensitive(id)
                );
                false
            }
            _ => {
                map.insert(id, desc);
                true
            }
        }
    }

    /// Drop every descriptor published before `cutoff`.
    ///
    /// Return the number of descriptors removed.
    pub fn remove_published_before(&self, cutoff: SystemTime) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, d| d.publication_time() >= cutoff);
        let removed = before - map.len();
        if removed > 0 {
            debug!("Expired {} onion service descriptors", removed);
        }
        removed
    }

    /// Return the number of descriptors held.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Return true if no descriptors are held.
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

impl DescriptorLookup for DescriptorCache {
    fn lookup(&self, id: &OnionServiceId) -> Option<Arc<HsDescriptor>> {
        self.map().get(id).cloned()
    }
}
