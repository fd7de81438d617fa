//! Shared toolkit state.
//!
//! A [`ProbeContext`] bundles the class registry, the sleep primitive and the
//! configuration. It is cheap to clone and every backend and proxy object
//! holds one, so two contexts never see each other's registrations.

use crate::config::ProbeConfig;
use crate::registry::Registry;
use crate::sleep::Sleeper;
use std::sync::Arc;

/// Registry, sleeper and configuration passed to every component
#[derive(Debug, Clone)]
pub struct ProbeContext {
    registry: Arc<Registry>,
    sleeper: Sleeper,
    config: Arc<ProbeConfig>,
}

impl ProbeContext {
    /// Create a context with a fresh registry and a real sleeper
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            sleeper: Sleeper::new(),
            config: Arc::new(config),
        }
    }

    /// Default configuration with sleeping mocked, for tests
    #[must_use]
    pub fn new_mocked() -> Self {
        Self::default().with_sleeper(Sleeper::new_mocked())
    }

    /// Replace the sleeper
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Class registry
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sleep primitive
    #[must_use]
    pub fn sleeper(&self) -> &Sleeper {
        &self.sleeper
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

impl Default for ProbeContext {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}
