//! Template cache boundary.
//!
//! The processor produces a [`CachedTemplate`] when a response template has
//! fully parsed; the host decides where snapshots live and what key
//! identifies a resource. Snapshots are immutable and shared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use surrogate_tree::CachedTemplate;

/// Host-side store of parsed templates, keyed opaquely (typically by the
/// resource's cache key).
pub trait TemplateCache {
    fn lookup(&self, key: &str) -> Option<Arc<CachedTemplate>>;
    fn store(&self, key: &str, template: Arc<CachedTemplate>);

    fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }
}

/// Unbounded in-process cache, enough for hosts without their own store.
#[derive(Default)]
pub struct MemoryTemplateCache {
    inner: Mutex<HashMap<String, Arc<CachedTemplate>>>,
}

impl MemoryTemplateCache {
    pub fn new() -> Self {
        MemoryTemplateCache::default()
    }
}

impl TemplateCache for MemoryTemplateCache {
    fn lookup(&self, key: &str) -> Option<Arc<CachedTemplate>> {
        match self.inner.lock() {
            Ok(map) => map.get(key).cloned(),
            Err(_) => None,
        }
    }

    fn store(&self, key: &str, template: Arc<CachedTemplate>) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(key.to_string(), template);
        }
    }
}
