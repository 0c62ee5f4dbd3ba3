//! Tool catalog cache
//!
//! Catalogs are fetched once per load and served from memory afterwards;
//! a fresh entry never triggers a network call. Visibility filtering happens
//! before an entry is cached, so hidden tools are invisible everywhere
//! downstream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use omnibridge_permissions::matches_any;

use crate::config::ToolVisibility;
use crate::transport::ToolDescriptor;

/// Default catalog TTL
pub const CATALOG_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CatalogEntry {
    tools: Vec<ToolDescriptor>,
    fetched_at: Instant,
}

/// Per-provider cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntryStats {
    pub provider: String,
    pub tool_count: usize,
    pub age_seconds: u64,
    pub ttl_remaining_seconds: u64,
}

/// Cache of visible tool catalogs, keyed by provider name
pub struct ToolCatalogCache {
    entries: RwLock<HashMap<String, CatalogEntry>>,
    ttl: Duration,
}

impl Default for ToolCatalogCache {
    fn default() -> Self {
        Self::new(CATALOG_TTL)
    }
}

impl ToolCatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Applies a provider's visibility policy to a raw catalog.
    pub fn filter_visible(tools: Vec<ToolDescriptor>, visibility: &ToolVisibility) -> Vec<ToolDescriptor> {
        match visibility {
            ToolVisibility::AllowAll => tools,
            ToolVisibility::AllowOnly { patterns } => tools
                .into_iter()
                .filter(|t| matches_any(&t.name, patterns))
                .collect(),
            ToolVisibility::AllowAllExcept { patterns } => tools
                .into_iter()
                .filter(|t| !matches_any(&t.name, patterns))
                .collect(),
        }
    }

    /// Stores an already-filtered catalog for a provider.
    pub async fn insert(&self, provider: &str, tools: Vec<ToolDescriptor>) {
        debug!(provider, count = tools.len(), "Caching tool catalog");
        let mut entries = self.entries.write().await;
        entries.insert(
            provider.to_string(),
            CatalogEntry {
                tools,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Returns the cached catalog if it is still fresh.
    pub async fn get(&self, provider: &str) -> Option<Vec<ToolDescriptor>> {
        let entries = self.entries.read().await;
        let entry = entries.get(provider)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.tools.clone())
        } else {
            None
        }
    }

    /// Returns the cached catalog regardless of freshness.
    ///
    /// Used for permission checks, where a slightly stale tool list beats
    /// an extra network round trip.
    pub async fn get_stale(&self, provider: &str) -> Option<Vec<ToolDescriptor>> {
        let entries = self.entries.read().await;
        entries.get(provider).map(|e| e.tools.clone())
    }

    /// Drops one provider's entry, or everything.
    pub async fn invalidate(&self, provider: Option<&str>) {
        let mut entries = self.entries.write().await;
        match provider {
            Some(provider) => {
                entries.remove(provider);
                info!(provider, "Invalidated tool catalog");
            }
            None => {
                entries.clear();
                info!("Invalidated all tool catalogs");
            }
        }
    }

    /// Providers currently cached, fresh or stale.
    pub async fn providers(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Per-provider cache statistics, sorted by provider name.
    pub async fn stats(&self) -> Vec<CatalogEntryStats> {
        let entries = self.entries.read().await;
        let mut stats: Vec<CatalogEntryStats> = entries
            .iter()
            .map(|(provider, entry)| {
                let age = entry.fetched_at.elapsed();
                CatalogEntryStats {
                    provider: provider.clone(),
                    tool_count: entry.tools.len(),
                    age_seconds: age.as_secs(),
                    ttl_remaining_seconds: self.ttl.saturating_sub(age).as_secs(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.provider.cmp(&b.provider));
        stats
    }

    #[cfg(test)]
    pub(crate) async fn age_entry(&self, provider: &str, age: Duration) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(provider) {
            entry.fetched_at = Instant::now() - age;
        }
    }
}
