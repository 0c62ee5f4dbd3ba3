//! Boundary to the external configuration store
//!
//! Provider descriptors, circuit breaker tuning and health history live in a
//! store the bridge does not own. Everything goes through [`ConfigStore`];
//! the in-memory implementation backs tests and embedded deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::{CircuitBreakerConfig, ProviderDescriptor};
use crate::error::Result;
use crate::transport::ToolDescriptor;

/// What kind of lifecycle event a health record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventKind {
    Load,
    HealthCheck,
    Unload,
}

/// One row of the append-only provider health history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    pub provider: String,
    pub kind: HealthEventKind,
    pub success: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_count: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl HealthEvent {
    pub fn success(provider: &str, kind: HealthEventKind, latency_ms: u64, tool_count: usize) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
            tool_count: Some(tool_count),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(provider: &str, kind: HealthEventKind, error: &str) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            success: false,
            latency_ms: None,
            error: Some(error.to_string()),
            tool_count: None,
            timestamp: Utc::now(),
        }
    }
}

/// Async boundary to the external configuration store
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All enabled provider descriptors, keyed by name in the store.
    async fn list_active_providers(&self) -> Result<Vec<ProviderDescriptor>>;

    /// Current circuit breaker tuning, or `None` to keep defaults.
    async fn load_circuit_config(&self) -> Result<Option<CircuitBreakerConfig>>;

    /// Appends one health history row.
    async fn record_health_event(&self, event: HealthEvent) -> Result<()>;

    /// Mirrors a provider's visible tool catalog into the store.
    async fn record_tool_catalog(&self, provider: &str, tools: &[ToolDescriptor]) -> Result<()>;
}

/// In-memory config store for tests and embedded deployments
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    providers: RwLock<HashMap<String, ProviderDescriptor>>,
    circuit_config: RwLock<Option<CircuitBreakerConfig>>,
    health_events: RwLock<Vec<HealthEvent>>,
    catalogs: RwLock<HashMap<String, Vec<ToolDescriptor>>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_provider(&self, descriptor: ProviderDescriptor) {
        let mut providers = self.providers.write().await;
        providers.insert(descriptor.name.clone(), descriptor);
    }

    pub async fn remove_provider(&self, name: &str) {
        self.providers.write().await.remove(name);
    }

    pub async fn set_circuit_config(&self, config: CircuitBreakerConfig) {
        *self.circuit_config.write().await = Some(config);
    }

    /// Recorded health history, oldest first.
    pub async fn health_events(&self) -> Vec<HealthEvent> {
        self.health_events.read().await.clone()
    }

    /// The last catalog mirrored for a provider.
    pub async fn mirrored_catalog(&self, provider: &str) -> Option<Vec<ToolDescriptor>> {
        self.catalogs.read().await.get(provider).cloned()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn list_active_providers(&self) -> Result<Vec<ProviderDescriptor>> {
        let providers = self.providers.read().await;
        Ok(providers.values().filter(|d| d.enabled).cloned().collect())
    }

    async fn load_circuit_config(&self) -> Result<Option<CircuitBreakerConfig>> {
        Ok(*self.circuit_config.read().await)
    }

    async fn record_health_event(&self, event: HealthEvent) -> Result<()> {
        self.health_events.write().await.push(event);
        Ok(())
    }

    async fn record_tool_catalog(&self, provider: &str, tools: &[ToolDescriptor]) -> Result<()> {
        let mut catalogs = self.catalogs.write().await;
        catalogs.insert(provider.to_string(), tools.to_vec());
        Ok(())
    }
}
