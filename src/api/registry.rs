//! Immutable name -> endpoint registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::{ApiEndpoint, ApiError, FnApi};

/// Immutable registry mapping endpoint names to handlers.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone, Default)]
pub struct ApiRegistry {
    inner: Arc<HashMap<String, Arc<dyn ApiEndpoint>>>,
}

/// Builder for [`ApiRegistry`]. Duplicate names are collected as errors.
#[derive(Default)]
pub struct ApiRegistryBuilder {
    map: HashMap<String, Arc<dyn ApiEndpoint>>,
    errors: Vec<String>,
}

impl ApiRegistry {
    pub fn builder() -> ApiRegistryBuilder {
        ApiRegistryBuilder::default()
    }

    /// Start a builder pre-populated with this registry's endpoints.
    pub fn builder_from(reg: &ApiRegistry) -> ApiRegistryBuilder {
        ApiRegistryBuilder {
            map: reg.inner.as_ref().clone(),
            errors: Vec::new(),
        }
    }

    /// Resolve an endpoint by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ApiEndpoint>> {
        let result = self.inner.get(name).cloned();
        if result.is_none() {
            tracing::debug!(
                target: "durotopic::api::registry",
                requested_name = %name,
                registered_names = ?self.list_names(),
                "Registry lookup miss"
            );
        }
        result
    }

    /// List all registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

impl ApiRegistryBuilder {
    /// Register an async function as an endpoint.
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<i64, ApiError>> + Send + 'static,
    {
        self.register_endpoint(name, Arc::new(FnApi(f)))
    }

    /// Register a trait-object endpoint.
    pub fn register_endpoint(mut self, name: impl Into<String>, endpoint: Arc<dyn ApiEndpoint>) -> Self {
        let name = name.into();
        if self.map.contains_key(&name) {
            self.errors.push(format!("duplicate api registration: {name}"));
            return self;
        }
        self.map.insert(name, endpoint);
        self
    }

    /// Merge another registry into this builder.
    pub fn merge(mut self, other: ApiRegistry) -> Self {
        for (name, endpoint) in other.inner.iter() {
            if self.map.contains_key(name) {
                self.errors.push(format!("duplicate api in merge: {name}"));
            } else {
                self.map.insert(name.clone(), endpoint.clone());
            }
        }
        self
    }

    /// Build, keeping the first registration of any duplicated name.
    pub fn build(self) -> ApiRegistry {
        ApiRegistry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, returning an error if there were any registration errors.
    ///
    /// # Errors
    ///
    /// Returns all registration errors joined with `"; "`.
    pub fn build_result(self) -> Result<ApiRegistry, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }
}
