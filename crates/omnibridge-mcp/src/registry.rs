//! Provider registry
//!
//! Owns the live connection and the cached catalog for every loaded
//! provider, and reconciles the loaded set against the store. One
//! connection per provider; a connection past its max age is torn down and
//! rebuilt rather than reused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::catalog::ToolCatalogCache;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ProviderDescriptor, RegistrySettings, RetryPolicy};
use crate::error::{Error, Result};
use crate::retry::with_reconnect_retry;
use crate::store::{ConfigStore, HealthEvent, HealthEventKind};
use crate::transport::{ToolDescriptor, Transport, TransportFactory};

#[derive(Clone)]
struct ConnectionHandle {
    transport: Arc<dyn Transport>,
    created_at: Instant,
}

/// Result of a health probe against a loaded provider
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub provider: String,
    pub healthy: bool,
    pub tool_count: usize,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
}

/// Registry of loaded providers and their connections
pub struct ProviderRegistry {
    store: Arc<dyn ConfigStore>,
    factory: Arc<dyn TransportFactory>,
    breaker: Arc<CircuitBreaker>,
    catalog: Arc<ToolCatalogCache>,
    settings: RegistrySettings,
    global_retry: RetryPolicy,
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    descriptors: RwLock<HashMap<String, ProviderDescriptor>>,
    last_reconcile: RwLock<Option<DateTime<Utc>>>,
}

impl ProviderRegistry {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn TransportFactory>,
        breaker: Arc<CircuitBreaker>,
        catalog: Arc<ToolCatalogCache>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            store,
            factory,
            breaker,
            catalog,
            settings,
            global_retry: RetryPolicy::default(),
            connections: RwLock::new(HashMap::new()),
            descriptors: RwLock::new(HashMap::new()),
            last_reconcile: RwLock::new(None),
        }
    }

    /// Overrides the global retry defaults providers fall back to.
    pub fn with_global_retry(mut self, policy: RetryPolicy) -> Self {
        self.global_retry = policy;
        self
    }

    fn policy_for(&self, descriptor: &ProviderDescriptor) -> RetryPolicy {
        RetryPolicy::resolve(&descriptor.retry, &self.global_retry)
    }

    async fn record_event(&self, event: HealthEvent) {
        if let Err(e) = self.store.record_health_event(event).await {
            warn!("Failed to record health event: {e}");
        }
    }

    /// Connects a provider, fetches its catalog and tracks it as loaded.
    ///
    /// Connection-class failures go through the retry path with a fresh
    /// transport per attempt. A provider that cannot be loaded is simply not
    /// tracked; the failure is recorded in the health history and the
    /// circuit breaker.
    pub async fn load(&self, descriptor: ProviderDescriptor) -> Result<()> {
        descriptor.validate()?;
        let policy = self.policy_for(&descriptor);
        let name = descriptor.name.clone();
        let started = Instant::now();

        let this = self;
        let desc = &descriptor;
        let outcome = with_reconnect_retry(
            "load",
            descriptor.display_name(),
            &policy,
            move |_attempt| async move {
                let transport = this.factory.create(desc).await?;
                let tools = transport.list_tools().await?;
                Ok((transport, tools))
            },
        )
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((transport, tools)) => {
                let visible = ToolCatalogCache::filter_visible(tools, &descriptor.visibility);
                let tool_count = visible.len();

                if let Err(e) = self.store.record_tool_catalog(&name, &visible).await {
                    warn!(provider = %name, "Failed to mirror tool catalog: {e}");
                }
                self.catalog.insert(&name, visible).await;

                {
                    let mut connections = self.connections.write().await;
                    if let Some(old) = connections.insert(
                        name.clone(),
                        ConnectionHandle {
                            transport,
                            created_at: Instant::now(),
                        },
                    ) {
                        if let Err(e) = old.transport.close().await {
                            warn!(provider = %name, "Failed to close replaced connection: {e}");
                        }
                    }
                }
                self.descriptors
                    .write()
                    .await
                    .insert(name.clone(), descriptor);

                self.breaker.record_success(&name).await;
                self.record_event(HealthEvent::success(
                    &name,
                    HealthEventKind::Load,
                    latency_ms,
                    tool_count,
                ))
                .await;

                info!(provider = %name, tool_count, latency_ms, "Provider loaded");
                Ok(())
            }
            Err(err) => {
                self.breaker.record_failure(&name).await;
                self.record_event(HealthEvent::failure(
                    &name,
                    HealthEventKind::Load,
                    &err.to_string(),
                ))
                .await;
                error!(provider = %name, error = %err, "Provider load failed");
                Err(err)
            }
        }
    }

    /// Drops a provider's connection and catalog. Idempotent.
    pub async fn unload(&self, name: &str) {
        let handle = self.connections.write().await.remove(name);
        let was_loaded = self.descriptors.write().await.remove(name).is_some();

        if let Some(handle) = handle {
            if let Err(e) = handle.transport.close().await {
                warn!(provider = name, "Failed to close connection: {e}");
            }
        }
        self.catalog.invalidate(Some(name)).await;

        if was_loaded {
            self.record_event(HealthEvent {
                provider: name.to_string(),
                kind: HealthEventKind::Unload,
                success: true,
                latency_ms: None,
                error: None,
                tool_count: None,
                timestamp: Utc::now(),
            })
            .await;
            info!(provider = name, "Provider unloaded");
        }
    }

    /// Brings the loaded set in line with the store.
    ///
    /// New descriptors are loaded, vanished or disabled ones unloaded, and
    /// providers whose descriptor changed or whose connection outlived its
    /// max age are reloaded. Individual load failures are logged and skipped
    /// so one bad provider cannot block the rest.
    pub async fn reconcile(&self) -> Result<()> {
        let desired = self.store.list_active_providers().await?;
        let desired_names: HashMap<String, &ProviderDescriptor> =
            desired.iter().map(|d| (d.name.clone(), d)).collect();

        let loaded: Vec<String> = self.descriptors.read().await.keys().cloned().collect();
        for name in &loaded {
            if !desired_names.contains_key(name) {
                debug!(provider = %name, "Provider removed from store, unloading");
                self.unload(name).await;
            }
        }

        for descriptor in &desired {
            let current = self.descriptors.read().await.get(&descriptor.name).cloned();
            let reload_reason = match current {
                None => Some("new"),
                Some(ref current) if descriptor.updated_at > current.updated_at => Some("updated"),
                Some(ref current) => {
                    let max_age =
                        Duration::from_secs(self.policy_for(current).connection_max_age_seconds);
                    let expired = {
                        let connections = self.connections.read().await;
                        connections
                            .get(&descriptor.name)
                            .map(|h| h.created_at.elapsed() >= max_age)
                            .unwrap_or(true)
                    };
                    expired.then_some("connection expired")
                }
            };

            if let Some(reason) = reload_reason {
                debug!(provider = %descriptor.name, reason, "Reconcile loading provider");
                if reason != "new" {
                    self.unload(&descriptor.name).await;
                }
                if let Err(e) = self.load(descriptor.clone()).await {
                    warn!(provider = %descriptor.name, "Reconcile load failed: {e}");
                }
            }
        }

        *self.last_reconcile.write().await = Some(Utc::now());
        Ok(())
    }

    /// When the registry last finished a reconcile pass.
    pub async fn last_reconcile(&self) -> Option<DateTime<Utc>> {
        *self.last_reconcile.read().await
    }

    /// Names of providers currently loaded, sorted.
    pub async fn loaded_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.descriptors.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// The tracked descriptor for a loaded provider.
    pub async fn descriptor(&self, name: &str) -> Option<ProviderDescriptor> {
        self.descriptors.read().await.get(name).cloned()
    }

    /// Cached catalogs only; never touches the network.
    pub async fn get_tools(&self, provider: Option<&str>) -> HashMap<String, Vec<ToolDescriptor>> {
        let mut result = HashMap::new();
        match provider {
            Some(name) => {
                if let Some(tools) = self.catalog.get_stale(name).await {
                    result.insert(name.to_string(), tools);
                }
            }
            None => {
                for name in self.catalog.providers().await {
                    if let Some(tools) = self.catalog.get_stale(&name).await {
                        result.insert(name, tools);
                    }
                }
            }
        }
        result
    }

    /// Returns a loaded provider's visible catalog, refetching when the
    /// cached entry is missing or past its TTL.
    ///
    /// The refetch goes through the same reconnect-retry path as tool calls
    /// and re-caches (and mirrors) the filtered result, so an invalidated or
    /// expired catalog heals on the next use instead of waiting for the
    /// connection to age out.
    pub async fn ensure_tools(&self, name: &str) -> Result<Vec<ToolDescriptor>> {
        if let Some(tools) = self.catalog.get(name).await {
            return Ok(tools);
        }

        let descriptor = self
            .descriptor(name)
            .await
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        let policy = self.policy_for(&descriptor);
        let max_age = Duration::from_secs(policy.connection_max_age_seconds);

        debug!(provider = name, "Catalog missing or stale, refetching");
        let this = self;
        let desc = &descriptor;
        let outcome = with_reconnect_retry(
            "list_tools",
            descriptor.display_name(),
            &policy,
            move |attempt| async move {
                let transport = this.acquire(desc, max_age, attempt > 1).await?;
                transport.list_tools().await
            },
        )
        .await;

        match outcome {
            Ok(tools) => {
                let visible = ToolCatalogCache::filter_visible(tools, &descriptor.visibility);
                if let Err(e) = self.store.record_tool_catalog(name, &visible).await {
                    warn!(provider = name, "Failed to mirror tool catalog: {e}");
                }
                self.catalog.insert(name, visible.clone()).await;
                self.breaker.record_success(name).await;
                Ok(visible)
            }
            Err(err) => {
                if matches!(err, Error::ProviderUnavailable { .. }) || err.is_connection_error() {
                    self.breaker.record_failure(name).await;
                }
                Err(err)
            }
        }
    }

    /// Probes a loaded provider with a single list-tools call, no retries.
    pub async fn health_check(&self, name: &str) -> Result<HealthReport> {
        let handle = {
            let connections = self.connections.read().await;
            connections.get(name).cloned()
        };
        let Some(handle) = handle else {
            return Err(Error::ProviderNotFound(name.to_string()));
        };

        let started = Instant::now();
        let probe = handle.transport.list_tools().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let report = match probe {
            Ok(tools) => {
                self.record_event(HealthEvent::success(
                    name,
                    HealthEventKind::HealthCheck,
                    latency_ms,
                    tools.len(),
                ))
                .await;
                HealthReport {
                    provider: name.to_string(),
                    healthy: true,
                    tool_count: tools.len(),
                    latency_ms,
                    error: None,
                    last_check: Utc::now(),
                }
            }
            Err(err) => {
                self.record_event(HealthEvent::failure(
                    name,
                    HealthEventKind::HealthCheck,
                    &err.to_string(),
                ))
                .await;
                warn!(provider = name, error = %err, "Health check failed");
                HealthReport {
                    provider: name.to_string(),
                    healthy: false,
                    tool_count: 0,
                    latency_ms,
                    error: Some(err.to_string()),
                    last_check: Utc::now(),
                }
            }
        };
        Ok(report)
    }

    async fn acquire(
        &self,
        descriptor: &ProviderDescriptor,
        max_age: Duration,
        force_reconnect: bool,
    ) -> Result<Arc<dyn Transport>> {
        if !force_reconnect {
            let connections = self.connections.read().await;
            if let Some(handle) = connections.get(&descriptor.name) {
                if handle.created_at.elapsed() < max_age {
                    return Ok(handle.transport.clone());
                }
                debug!(provider = %descriptor.name, "Connection past max age, reconnecting");
            }
        }

        let transport = self.factory.create(descriptor).await?;
        let mut connections = self.connections.write().await;
        if let Some(old) = connections.insert(
            descriptor.name.clone(),
            ConnectionHandle {
                transport: transport.clone(),
                created_at: Instant::now(),
            },
        ) {
            if let Err(e) = old.transport.close().await {
                warn!(provider = %descriptor.name, "Failed to close stale connection: {e}");
            }
        }
        Ok(transport)
    }

    /// Invokes a tool on a loaded provider through the retry path.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let descriptor = self
            .descriptor(name)
            .await
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))?;
        let policy = self.policy_for(&descriptor);
        let max_age = Duration::from_secs(policy.connection_max_age_seconds);

        let this = self;
        let desc = &descriptor;
        let outcome = with_reconnect_retry(
            "call_tool",
            descriptor.display_name(),
            &policy,
            move |attempt| {
                let args = args.clone();
                async move {
                    let transport = this.acquire(desc, max_age, attempt > 1).await?;
                    transport.call_tool(tool, args).await
                }
            },
        )
        .await;

        match &outcome {
            Ok(_) => self.breaker.record_success(name).await,
            Err(err) => {
                if matches!(err, Error::ProviderUnavailable { .. }) || err.is_connection_error() {
                    self.breaker.record_failure(name).await;
                }
            }
        }
        outcome
    }

    /// Periodic reconcile task; one failed pass never stops the loop.
    pub async fn run_reconcile_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.reconcile_interval_seconds);
        info!(interval_secs = interval.as_secs(), "Starting reconcile loop");
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.reconcile().await {
                warn!("Reconcile pass failed: {e}");
            }
        }
    }

    /// Periodic health probe task over every loaded provider.
    pub async fn run_health_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.health_interval_seconds);
        info!(interval_secs = interval.as_secs(), "Starting health loop");
        loop {
            tokio::time::sleep(interval).await;
            for name in self.loaded_providers().await {
                if let Err(e) = self.health_check(&name).await {
                    warn!(provider = %name, "Health probe failed: {e}");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn age_connection(&self, name: &str, age: Duration) {
        let mut connections = self.connections.write().await;
        if let Some(handle) = connections.get_mut(name) {
            handle.created_at = Instant::now() - age;
        }
    }
}
