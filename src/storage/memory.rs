//! In-process store for when no durable path is configured.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pseudo-location of the stored object.
    pub fn put(&self, key: &str, bytes: &[u8]) -> String {
        self.objects.insert(key.to_string(), bytes.to_vec());
        format!("memory://{key}")
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
