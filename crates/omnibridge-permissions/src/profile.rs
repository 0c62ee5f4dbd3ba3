//! Permission profiles and grant normalization
//!
//! Profiles arrive from the external user store in several historical shapes
//! (a bare `"*"`, a list of provider names, or a map of per-provider entries).
//! Everything is normalized at this boundary into one tagged representation so
//! downstream resolution never re-inspects raw JSON.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matcher::validate_pattern;

/// The administrative role that bypasses all provider and tool checks.
pub const ADMIN_ROLE: &str = "admin";

/// Role used for callers the store does not know about.
pub const DEFAULT_ROLE: &str = "read_only";

/// How a single provider grant resolves against a tool list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Defer to the provider's role-based restrictions
    Inherit,
    /// Explicit allow/deny pattern lists
    Custom,
    /// Every tool on the provider
    All,
    /// No tools
    None,
}

/// A caller's grant for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub mode: PermissionMode,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PermissionEntry {
    pub fn inherit() -> Self {
        Self {
            mode: PermissionMode::Inherit,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn none() -> Self {
        Self {
            mode: PermissionMode::None,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn all() -> Self {
        Self {
            mode: PermissionMode::All,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    /// Normalizes a raw stored entry.
    ///
    /// Accepted shapes: null (no access), `"*"` (all tools), any other string
    /// (no access), or an object with `mode`, `tools`/`allowed_tools` and
    /// `deny`/`denied_tools` keys.
    pub fn from_raw(raw: &Value) -> Self {
        match raw {
            Value::Null => Self::none(),
            Value::String(s) if s == "*" => Self::all(),
            Value::String(_) => Self::none(),
            Value::Object(map) => {
                let mode = match map.get("mode").and_then(Value::as_str) {
                    Some("custom") => PermissionMode::Custom,
                    Some("all") => PermissionMode::All,
                    Some("none") => PermissionMode::None,
                    _ => PermissionMode::Inherit,
                };
                let allow = string_list(map.get("tools").or_else(|| map.get("allowed_tools")));
                let deny = string_list(map.get("deny").or_else(|| map.get("denied_tools")));
                Self { mode, allow, deny }
            }
            _ => Self::none(),
        }
    }
}

// Pattern lists from the store may carry junk entries; anything that fails
// validation is dropped here rather than silently matching nothing later.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| validate_pattern(s).is_ok())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Which providers a caller may reach, normalized from the raw allowlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderGrants {
    /// Every provider, every tool (subject only to provider visibility)
    AllProviders,
    /// Named providers, each inheriting the provider's role restrictions
    Named { providers: BTreeSet<String> },
    /// Per-provider entries with explicit modes
    PerProvider {
        entries: HashMap<String, PermissionEntry>,
    },
}

impl ProviderGrants {
    /// Normalizes the raw `allowed_providers` shape from the store.
    pub fn from_raw(raw: &Value) -> Self {
        match raw {
            Value::String(s) if s == "*" => Self::AllProviders,
            Value::Array(items) => {
                let names: BTreeSet<String> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
                if items.iter().any(|v| v.as_str() == Some("*")) {
                    Self::AllProviders
                } else {
                    Self::Named { providers: names }
                }
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(name, entry)| (name.clone(), PermissionEntry::from_raw(entry)))
                    .collect();
                Self::PerProvider { entries }
            }
            _ => Self::Named {
                providers: BTreeSet::new(),
            },
        }
    }

    /// Looks up the entry for one provider, if any.
    pub fn entry_for(&self, provider: &str) -> Option<PermissionEntry> {
        match self {
            Self::AllProviders => Some(PermissionEntry::all()),
            Self::Named { providers } => providers
                .contains(provider)
                .then(PermissionEntry::inherit),
            Self::PerProvider { entries } => entries.get(provider).cloned(),
        }
    }
}

/// A caller's identity and grants, as resolved from the external store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionProfile {
    pub caller: String,
    pub role: String,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default)]
    pub allow_all_providers: bool,
    pub grants: ProviderGrants,
}

impl PermissionProfile {
    /// Builds the guest profile handed to callers the store does not know.
    pub fn default_for(caller: &str) -> Self {
        Self {
            caller: caller.to_string(),
            role: DEFAULT_ROLE.to_string(),
            teams: Vec::new(),
            is_super_admin: false,
            allow_all_providers: false,
            grants: ProviderGrants::Named {
                providers: BTreeSet::new(),
            },
        }
    }

    /// True when the caller bypasses provider and tool checks entirely.
    pub fn is_unrestricted(&self) -> bool {
        self.is_super_admin || self.allow_all_providers || self.role == ADMIN_ROLE
    }
}

/// Per-role tool restrictions configured on a provider descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleRestriction {
    AllowAll,
    DenyAll,
    AllowOnly { patterns: Vec<String> },
    AllowAllExcept { patterns: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_from_star_string() {
        let entry = PermissionEntry::from_raw(&json!("*"));
        assert_eq!(entry.mode, PermissionMode::All);
    }

    #[test]
    fn test_entry_from_null() {
        let entry = PermissionEntry::from_raw(&json!(null));
        assert_eq!(entry.mode, PermissionMode::None);
    }

    #[test]
    fn test_entry_from_object() {
        let entry = PermissionEntry::from_raw(&json!({
            "mode": "custom",
            "tools": ["get_*"],
            "deny": ["get_secret"],
        }));
        assert_eq!(entry.mode, PermissionMode::Custom);
        assert_eq!(entry.allow, vec!["get_*".to_string()]);
        assert_eq!(entry.deny, vec!["get_secret".to_string()]);
    }

    #[test]
    fn test_entry_legacy_keys() {
        let entry = PermissionEntry::from_raw(&json!({
            "mode": "custom",
            "allowed_tools": ["a"],
            "denied_tools": ["b"],
        }));
        assert_eq!(entry.allow, vec!["a".to_string()]);
        assert_eq!(entry.deny, vec!["b".to_string()]);
    }

    #[test]
    fn test_entry_drops_invalid_patterns() {
        let entry = PermissionEntry::from_raw(&json!({
            "mode": "custom",
            "tools": ["get_*", ""],
            "deny": [""],
        }));
        assert_eq!(entry.allow, vec!["get_*".to_string()]);
        assert!(entry.deny.is_empty());
    }

    #[test]
    fn test_entry_missing_mode_is_inherit() {
        let entry = PermissionEntry::from_raw(&json!({ "tools": [] }));
        assert_eq!(entry.mode, PermissionMode::Inherit);
    }

    #[test]
    fn test_grants_from_star() {
        assert_eq!(
            ProviderGrants::from_raw(&json!("*")),
            ProviderGrants::AllProviders
        );
    }

    #[test]
    fn test_grants_from_list() {
        let grants = ProviderGrants::from_raw(&json!(["alpha", "beta"]));
        assert!(grants.entry_for("alpha").is_some());
        assert!(grants.entry_for("gamma").is_none());
    }

    #[test]
    fn test_grants_list_containing_star() {
        let grants = ProviderGrants::from_raw(&json!(["alpha", "*"]));
        assert_eq!(grants, ProviderGrants::AllProviders);
    }

    #[test]
    fn test_grants_from_map() {
        let grants = ProviderGrants::from_raw(&json!({
            "alpha": "*",
            "beta": null,
        }));
        assert_eq!(grants.entry_for("alpha").unwrap().mode, PermissionMode::All);
        assert_eq!(grants.entry_for("beta").unwrap().mode, PermissionMode::None);
        assert!(grants.entry_for("gamma").is_none());
    }

    #[test]
    fn test_unrestricted_roles() {
        let mut profile = PermissionProfile::default_for("dev@example.com");
        assert!(!profile.is_unrestricted());
        profile.role = ADMIN_ROLE.to_string();
        assert!(profile.is_unrestricted());
        profile.role = DEFAULT_ROLE.to_string();
        profile.is_super_admin = true;
        assert!(profile.is_unrestricted());
    }
}
