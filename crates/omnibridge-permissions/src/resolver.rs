//! Tool-level permission resolution with caching

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::matcher::matches_any;
use crate::profile::{PermissionMode, PermissionProfile, RoleRestriction};

/// Default TTL for resolved (caller, provider) tool sets
pub const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(300);

/// Boundary to the external store of caller profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Loads the profile for a caller, or `None` when the caller is unknown.
    async fn load_profile(&self, caller: &str) -> Result<Option<PermissionProfile>>;
}

/// In-memory profile store for tests and embedded deployments
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, PermissionProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: PermissionProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.caller.clone(), profile);
    }

    pub async fn remove(&self, caller: &str) {
        self.profiles.write().await.remove(caller);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn load_profile(&self, caller: &str) -> Result<Option<PermissionProfile>> {
        Ok(self.profiles.read().await.get(caller).cloned())
    }
}

#[derive(Debug, Clone)]
struct CachedToolSet {
    tools: Vec<String>,
    cached_at: Instant,
}

/// Snapshot of the resolver cache for diagnostics
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolverCacheStats {
    pub cached_entries: usize,
    pub callers: Vec<String>,
}

/// Resolves which tools a caller may invoke on a provider.
///
/// Results are cached per (caller, provider) with a TTL; callers unknown to
/// the store resolve to a guest profile rather than an error.
pub struct PermissionResolver {
    store: Arc<dyn ProfileStore>,
    cache: RwLock<HashMap<(String, String), CachedToolSet>>,
    ttl: Duration,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self::with_ttl(store, PERMISSION_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn ProfileStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Loads the caller's profile, falling back to the guest profile.
    pub async fn get_profile(&self, caller: &str) -> Result<PermissionProfile> {
        match self.store.load_profile(caller).await? {
            Some(profile) => Ok(profile),
            None => {
                warn!(caller, "Unknown caller, using default profile");
                Ok(PermissionProfile::default_for(caller))
            }
        }
    }

    /// True when the caller may reach the provider at all.
    pub async fn can_access_provider(&self, caller: &str, provider: &str) -> Result<bool> {
        let profile = self.get_profile(caller).await?;
        if profile.is_unrestricted() {
            return Ok(true);
        }
        Ok(profile.grants.entry_for(provider).is_some())
    }

    /// Resolves the allowed subset of `all_tools` for the caller on a provider.
    ///
    /// `restrictions` are the provider's per-role tool restrictions, consulted
    /// only when the caller's grant mode is `inherit`.
    pub async fn allowed_tools(
        &self,
        caller: &str,
        provider: &str,
        all_tools: &[String],
        restrictions: Option<&HashMap<String, RoleRestriction>>,
    ) -> Result<Vec<String>> {
        let key = (caller.to_string(), provider.to_string());
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                let age = cached.cached_at.elapsed();
                if age < self.ttl {
                    debug!(
                        caller,
                        provider,
                        age_secs = age.as_secs(),
                        "Using cached tool permissions"
                    );
                    return Ok(cached.tools.clone());
                }
            }
        }

        let profile = self.get_profile(caller).await?;
        let resolved = self.resolve(&profile, provider, all_tools, restrictions);

        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedToolSet {
                tools: resolved.clone(),
                cached_at: Instant::now(),
            },
        );

        info!(
            caller,
            role = %profile.role,
            provider,
            total_tools = all_tools.len(),
            allowed_tools = resolved.len(),
            "Resolved tool permissions"
        );

        Ok(resolved)
    }

    /// True when the caller may invoke a specific tool on the provider.
    pub async fn can_use_tool(
        &self,
        caller: &str,
        provider: &str,
        tool: &str,
        all_tools: &[String],
        restrictions: Option<&HashMap<String, RoleRestriction>>,
    ) -> Result<bool> {
        let allowed = self
            .allowed_tools(caller, provider, all_tools, restrictions)
            .await?;
        Ok(allowed.iter().any(|t| t == tool))
    }

    fn resolve(
        &self,
        profile: &PermissionProfile,
        provider: &str,
        all_tools: &[String],
        restrictions: Option<&HashMap<String, RoleRestriction>>,
    ) -> Vec<String> {
        if profile.is_unrestricted() {
            return all_tools.to_vec();
        }

        let Some(entry) = profile.grants.entry_for(provider) else {
            return Vec::new();
        };

        match entry.mode {
            PermissionMode::None => Vec::new(),
            PermissionMode::All => all_tools.to_vec(),
            PermissionMode::Custom => {
                let mut allowed: Vec<String> = all_tools
                    .iter()
                    .filter(|t| matches_any(t, &entry.allow))
                    .cloned()
                    .collect();
                allowed.retain(|t| !matches_any(t, &entry.deny));
                allowed
            }
            PermissionMode::Inherit => {
                apply_role_restriction(&profile.role, all_tools, restrictions)
            }
        }
    }

    /// Drops cached resolutions for one caller, or for everyone.
    pub async fn invalidate(&self, caller: Option<&str>) {
        let mut cache = self.cache.write().await;
        match caller {
            Some(caller) => {
                cache.retain(|(c, _), _| c != caller);
                info!(caller, "Invalidated permission cache");
            }
            None => {
                cache.clear();
                info!("Invalidated all permission caches");
            }
        }
    }

    /// Diagnostic snapshot of the resolution cache.
    pub async fn cache_stats(&self) -> ResolverCacheStats {
        let cache = self.cache.read().await;
        let mut callers: Vec<String> = cache.keys().map(|(c, _)| c.clone()).collect();
        callers.sort();
        callers.dedup();
        ResolverCacheStats {
            cached_entries: cache.len(),
            callers,
        }
    }

    #[cfg(test)]
    async fn age_entry(&self, caller: &str, provider: &str, age: Duration) {
        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.get_mut(&(caller.to_string(), provider.to_string())) {
            entry.cached_at = Instant::now() - age;
        }
    }
}

fn apply_role_restriction(
    role: &str,
    all_tools: &[String],
    restrictions: Option<&HashMap<String, RoleRestriction>>,
) -> Vec<String> {
    let Some(restriction) = restrictions.and_then(|map| map.get(role)) else {
        // Permissive default: providers without role restrictions expose
        // everything to callers granted inherit access.
        return all_tools.to_vec();
    };

    match restriction {
        RoleRestriction::AllowAll => all_tools.to_vec(),
        RoleRestriction::DenyAll => Vec::new(),
        RoleRestriction::AllowOnly { patterns } => all_tools
            .iter()
            .filter(|t| matches_any(t, patterns))
            .cloned()
            .collect(),
        RoleRestriction::AllowAllExcept { patterns } => all_tools
            .iter()
            .filter(|t| !matches_any(t, patterns))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{PermissionEntry, ProviderGrants};
    use serde_json::json;

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn resolver_with(profile: PermissionProfile) -> PermissionResolver {
        let store = Arc::new(InMemoryProfileStore::new());
        store.insert(profile).await;
        PermissionResolver::new(store)
    }

    fn custom_profile(caller: &str, provider: &str, allow: &[&str], deny: &[&str]) -> PermissionProfile {
        let mut entries = HashMap::new();
        entries.insert(
            provider.to_string(),
            PermissionEntry {
                mode: PermissionMode::Custom,
                allow: tools(allow),
                deny: tools(deny),
            },
        );
        PermissionProfile {
            caller: caller.to_string(),
            role: "power_user".to_string(),
            teams: vec![],
            is_super_admin: false,
            allow_all_providers: false,
            grants: ProviderGrants::PerProvider { entries },
        }
    }

    #[tokio::test]
    async fn test_custom_mode_allow_minus_deny() {
        let resolver = resolver_with(custom_profile(
            "u@example.com",
            "alpha",
            &["get_*"],
            &["get_secret"],
        ))
        .await;

        let all = tools(&["get_a", "get_secret", "post_a"]);
        let allowed = resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert_eq!(allowed, tools(&["get_a"]));
    }

    #[tokio::test]
    async fn test_unknown_caller_gets_default_profile() {
        let store = Arc::new(InMemoryProfileStore::new());
        let resolver = PermissionResolver::new(store);

        let all = tools(&["get_a"]);
        let allowed = resolver
            .allowed_tools("stranger@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn test_admin_role_gets_everything() {
        let mut profile = PermissionProfile::default_for("boss@example.com");
        profile.role = "admin".to_string();
        let resolver = resolver_with(profile).await;

        let all = tools(&["get_a", "drop_db"]);
        let allowed = resolver
            .allowed_tools("boss@example.com", "anything", &all, None)
            .await
            .unwrap();
        assert_eq!(allowed, all);
    }

    #[tokio::test]
    async fn test_absent_entry_is_empty_not_error() {
        let resolver = resolver_with(custom_profile("u@example.com", "alpha", &["*"], &[])).await;
        let all = tools(&["get_a"]);
        let allowed = resolver
            .allowed_tools("u@example.com", "beta", &all, None)
            .await
            .unwrap();
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn test_inherit_uses_role_restrictions() {
        let grants = ProviderGrants::from_raw(&json!(["alpha"]));
        let profile = PermissionProfile {
            caller: "qa@example.com".to_string(),
            role: "qa_tester".to_string(),
            teams: vec![],
            is_super_admin: false,
            allow_all_providers: false,
            grants,
        };
        let resolver = resolver_with(profile).await;

        let mut restrictions = HashMap::new();
        restrictions.insert(
            "qa_tester".to_string(),
            RoleRestriction::AllowOnly {
                patterns: tools(&["get_*"]),
            },
        );

        let all = tools(&["get_a", "post_a"]);
        let allowed = resolver
            .allowed_tools("qa@example.com", "alpha", &all, Some(&restrictions))
            .await
            .unwrap();
        assert_eq!(allowed, tools(&["get_a"]));
    }

    #[tokio::test]
    async fn test_inherit_without_restrictions_is_permissive() {
        let grants = ProviderGrants::from_raw(&json!(["alpha"]));
        let profile = PermissionProfile {
            caller: "qa@example.com".to_string(),
            role: "qa_tester".to_string(),
            teams: vec![],
            is_super_admin: false,
            allow_all_providers: false,
            grants,
        };
        let resolver = resolver_with(profile).await;

        let all = tools(&["get_a", "post_a"]);
        let allowed = resolver
            .allowed_tools("qa@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert_eq!(allowed, all);
    }

    #[tokio::test]
    async fn test_inherit_deny_all() {
        let grants = ProviderGrants::from_raw(&json!(["alpha"]));
        let profile = PermissionProfile {
            caller: "c@example.com".to_string(),
            role: "contractor".to_string(),
            teams: vec![],
            is_super_admin: false,
            allow_all_providers: false,
            grants,
        };
        let resolver = resolver_with(profile).await;

        let mut restrictions = HashMap::new();
        restrictions.insert("contractor".to_string(), RoleRestriction::DenyAll);

        let all = tools(&["get_a"]);
        let allowed = resolver
            .allowed_tools("c@example.com", "alpha", &all, Some(&restrictions))
            .await
            .unwrap();
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_survives_profile_change_until_invalidated() {
        let store = Arc::new(InMemoryProfileStore::new());
        store
            .insert(custom_profile("u@example.com", "alpha", &["get_*"], &[]))
            .await;
        let resolver = PermissionResolver::new(store.clone());

        let all = tools(&["get_a", "post_a"]);
        let first = resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert_eq!(first, tools(&["get_a"]));

        // Widen the grant behind the cache's back.
        store
            .insert(custom_profile("u@example.com", "alpha", &["*"], &[]))
            .await;

        let cached = resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert_eq!(cached, tools(&["get_a"]));

        resolver.invalidate(Some("u@example.com")).await;
        let fresh = resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert_eq!(fresh, all);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let store = Arc::new(InMemoryProfileStore::new());
        store
            .insert(custom_profile("u@example.com", "alpha", &["get_*"], &[]))
            .await;
        let resolver = PermissionResolver::new(store.clone());

        let all = tools(&["get_a", "post_a"]);
        resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();

        store
            .insert(custom_profile("u@example.com", "alpha", &["*"], &[]))
            .await;
        resolver
            .age_entry("u@example.com", "alpha", Duration::from_secs(301))
            .await;

        let fresh = resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();
        assert_eq!(fresh, all);
    }

    #[tokio::test]
    async fn test_can_use_tool() {
        let resolver = resolver_with(custom_profile(
            "u@example.com",
            "alpha",
            &["get_*"],
            &["get_secret"],
        ))
        .await;

        let all = tools(&["get_a", "get_secret"]);
        assert!(resolver
            .can_use_tool("u@example.com", "alpha", "get_a", &all, None)
            .await
            .unwrap());
        assert!(!resolver
            .can_use_tool("u@example.com", "alpha", "get_secret", &all, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let resolver = resolver_with(custom_profile("u@example.com", "alpha", &["*"], &[])).await;
        let all = tools(&["get_a"]);
        resolver
            .allowed_tools("u@example.com", "alpha", &all, None)
            .await
            .unwrap();

        let stats = resolver.cache_stats().await;
        assert_eq!(stats.cached_entries, 1);
        assert_eq!(stats.callers, vec!["u@example.com".to_string()]);
    }
}
