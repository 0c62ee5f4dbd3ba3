//! Dispatch facade
//!
//! Single entry point for tool calls. Every call runs the same gauntlet:
//! rate limit, circuit breaker, permissions against the cached catalog, then
//! the registry's retry path. The outcome is always a tagged value; the
//! facade itself never returns a transport error to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use omnibridge_mcp::{
    CatalogEntryStats, CircuitBreaker, CircuitSnapshot, CircuitStatus, Error as McpError,
    HealthReport, ProviderRegistry, ToolCatalogCache,
};
use omnibridge_permissions::{PermissionResolver, ResolverCacheStats};

use crate::rate_limiter::{RateCallerStats, RateDecision, RateLimiter};

/// What a dispatched call came back with
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    Success {
        result: Value,
    },
    Error {
        message: String,
        provider: String,
        tool: String,
    },
    Unavailable {
        message: String,
        retry_after_seconds: Option<u64>,
    },
    Denied {
        reason: String,
    },
    RateLimited {
        count: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
    },
}

/// One provider's entry in a tool listing
#[derive(Debug, Clone, Serialize)]
pub struct ProviderTools {
    pub tools: Vec<String>,
    pub status: String,
}

/// Combined cache diagnostics across the facade's components
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub catalogs: Vec<CatalogEntryStats>,
    pub permissions: ResolverCacheStats,
    pub rate_windows: Vec<RateCallerStats>,
    pub circuits: Vec<CircuitSnapshot>,
}

/// Facade sequencing rate limit, circuit, permission and registry call
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    resolver: Arc<PermissionResolver>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    catalog: Arc<ToolCatalogCache>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resolver: Arc<PermissionResolver>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        catalog: Arc<ToolCatalogCache>,
    ) -> Self {
        Self {
            registry,
            resolver,
            breaker,
            limiter,
            catalog,
        }
    }

    /// Dispatches one tool call on behalf of a caller.
    pub async fn call_tool(
        &self,
        caller: &str,
        provider: &str,
        tool: &str,
        args: Value,
    ) -> CallOutcome {
        let profile = match self.resolver.get_profile(caller).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(caller, "Failed to load caller profile: {e}");
                return CallOutcome::Denied {
                    reason: format!("could not resolve caller '{caller}'"),
                };
            }
        };

        match self.limiter.check_and_record(caller, &profile.role).await {
            RateDecision::Allowed { .. } => {}
            RateDecision::Limited {
                count,
                limit,
                reset_at,
            } => {
                return CallOutcome::RateLimited {
                    count,
                    limit,
                    reset_at,
                };
            }
        }

        if self.breaker.is_open(provider).await {
            let retry_after = self.breaker.retry_after(provider).await;
            return CallOutcome::Unavailable {
                message: format!("provider '{provider}' is cooling down"),
                retry_after_seconds: retry_after,
            };
        }

        let Some(descriptor) = self.registry.descriptor(provider).await else {
            return CallOutcome::Error {
                message: format!("Provider not found: {provider}"),
                provider: provider.to_string(),
                tool: tool.to_string(),
            };
        };

        // Permission checks run against the provider's visible catalog; a
        // missing or expired entry is refetched through the retry path here
        // so invalidation never leaves a provider with an empty tool list.
        let tool_names: Vec<String> = match self.registry.ensure_tools(provider).await {
            Ok(tools) => tools.into_iter().map(|t| t.name).collect(),
            Err(err) => {
                warn!(provider, "Catalog fetch failed: {err}");
                return CallOutcome::Error {
                    message: err.to_string(),
                    provider: provider.to_string(),
                    tool: tool.to_string(),
                };
            }
        };

        let allowed = match self
            .resolver
            .allowed_tools(caller, provider, &tool_names, Some(&descriptor.role_restrictions))
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(caller, provider, "Permission resolution failed: {e}");
                return CallOutcome::Denied {
                    reason: "permission resolution failed".to_string(),
                };
            }
        };

        if !allowed.iter().any(|t| t == tool) {
            debug!(caller, provider, tool, "Tool call denied");
            return CallOutcome::Denied {
                reason: format!("caller '{caller}' may not use '{tool}' on '{provider}'"),
            };
        }

        // Exhausted retries are a terminal failure of this call; Unavailable
        // is reserved for the circuit-open rejection above.
        match self.registry.call_tool(provider, tool, args).await {
            Ok(result) => CallOutcome::Success { result },
            Err(err) => CallOutcome::Error {
                message: err.to_string(),
                provider: provider.to_string(),
                tool: tool.to_string(),
            },
        }
    }

    /// Lists each provider's tools the caller may use, with circuit status.
    pub async fn list_tools(
        &self,
        caller: &str,
        provider: Option<&str>,
    ) -> HashMap<String, ProviderTools> {
        let catalogs = self.registry.get_tools(provider).await;
        let mut result = HashMap::new();

        for (name, tools) in catalogs {
            let descriptor = self.registry.descriptor(&name).await;
            let restrictions = descriptor.as_ref().map(|d| &d.role_restrictions);
            let tool_names: Vec<String> = tools.into_iter().map(|t| t.name).collect();

            let allowed = match self
                .resolver
                .allowed_tools(caller, &name, &tool_names, restrictions)
                .await
            {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!(caller, provider = %name, "Permission resolution failed: {e}");
                    continue;
                }
            };
            if allowed.is_empty() {
                continue;
            }

            // Side-effect-free status read: listing tools must not consume
            // an open circuit's half-open trial slot.
            let status = match self.breaker.status(&name).await {
                CircuitStatus::Open => "circuit_open".to_string(),
                _ => "available".to_string(),
            };
            result.insert(
                name,
                ProviderTools {
                    tools: allowed,
                    status,
                },
            );
        }
        result
    }

    /// Probes one provider's health through the registry.
    pub async fn health_check(&self, provider: &str) -> Result<HealthReport, McpError> {
        self.registry.health_check(provider).await
    }

    pub async fn invalidate_tool_cache(&self, provider: Option<&str>) {
        self.catalog.invalidate(provider).await;
    }

    pub async fn invalidate_permission_cache(&self, caller: Option<&str>) {
        self.resolver.invalidate(caller).await;
    }

    /// Combined diagnostics across catalog, permission, rate and circuit state.
    pub async fn get_cache_stats(&self) -> CacheStats {
        CacheStats {
            catalogs: self.catalog.stats().await,
            permissions: self.resolver.cache_stats().await,
            rate_windows: self.limiter.stats().await,
            circuits: self.breaker.snapshot().await,
        }
    }

    /// Spawns the reconcile, health and rate-sweep background tasks.
    pub fn spawn_background_loops(&self) -> Vec<JoinHandle<()>> {
        info!("Spawning background loops");
        vec![
            tokio::spawn(self.registry.clone().run_reconcile_loop()),
            tokio::spawn(self.registry.clone().run_health_loop()),
            tokio::spawn(self.limiter.clone().run_sweep_loop()),
        ]
    }
}
