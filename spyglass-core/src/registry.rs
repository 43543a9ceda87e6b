//! Service key registry.

use std::collections::HashSet;

use spyglass_sdk::ServiceKey;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service key {0} is already registered")]
    Duplicate(ServiceKey),
}

/// Ordered, append-only set of every key handed out during one
/// instrumentation.
#[derive(Debug, Clone, Default)]
pub struct ServiceKeyRegistry {
    keys: Vec<ServiceKey>,
    seen: HashSet<ServiceKey>,
}

impl ServiceKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: ServiceKey) -> Result<(), RegistryError> {
        if !self.seen.insert(key.clone()) {
            return Err(RegistryError::Duplicate(key));
        }
        self.keys.push(key);
        Ok(())
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.seen.contains(key)
    }

    /// Keys in registration order.
    pub fn keys(&self) -> &[ServiceKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
