//! Services container: named, shared, read-only dependencies for roles.
//!
//! Built once at startup and handed to the server by reference; the server
//! forwards it to every role. Nothing is registered after construction, so
//! lookups need no locking.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type SharedService = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, SharedService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under `name`, replacing any previous entry.
    pub fn register<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: T) {
        self.register_shared(name, Arc::new(service));
    }

    pub fn register_shared<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.services.insert(name.into(), service);
    }

    /// Look up a service by name and type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services.get(name)?.clone().downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
