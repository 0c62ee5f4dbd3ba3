//! Provider descriptors and registry configuration

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omnibridge_permissions::RoleRestriction;

use crate::error::{Error, Result};

/// Path segment every HTTP/SSE provider endpoint must end with
pub const ENDPOINT_SUFFIX: &str = "/mcp";

/// Wire protocol a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Sse,
    Stdio,
}

/// Where a provider lives: a URL for http/sse, a command line for stdio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Url {
        url: String,
    },
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
}

/// Authentication attached to outgoing provider requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    None,
    Bearer { token: String },
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::None
    }
}

/// Per-provider retry overrides; unset fields fall back to global settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub delay_seconds: Option<f64>,
    pub connection_max_age_seconds: Option<u64>,
}

/// Fully resolved retry policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_seconds: f64,
    pub connection_max_age_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_seconds: 1.0,
            connection_max_age_seconds: 600,
        }
    }
}

impl RetryPolicy {
    /// Resolves provider overrides against global defaults.
    pub fn resolve(overrides: &RetryOverrides, global: &RetryPolicy) -> Self {
        Self {
            max_attempts: overrides.max_attempts.unwrap_or(global.max_attempts),
            delay_seconds: overrides.delay_seconds.unwrap_or(global.delay_seconds),
            connection_max_age_seconds: overrides
                .connection_max_age_seconds
                .unwrap_or(global.connection_max_age_seconds),
        }
    }
}

/// Which tools a provider exposes through the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ToolVisibility {
    AllowAll,
    AllowOnly { patterns: Vec<String> },
    AllowAllExcept { patterns: Vec<String> },
}

impl Default for ToolVisibility {
    fn default() -> Self {
        Self::AllowAll
    }
}

/// Circuit breaker tuning, loadable at runtime from the store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
    pub cooldown_multiplier: f64,
    pub max_cooldown_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 30,
            cooldown_multiplier: 2.0,
            max_cooldown_seconds: 300,
        }
    }
}

/// Global registry intervals and defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    pub reconcile_interval_seconds: u64,
    pub health_interval_seconds: u64,
    pub catalog_ttl_seconds: u64,
    pub default_timeout_seconds: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            reconcile_interval_seconds: 30,
            health_interval_seconds: 60,
            catalog_ttl_seconds: 300,
            default_timeout_seconds: 30,
        }
    }
}

/// Everything the registry needs to know about one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub protocol: Protocol,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry: RetryOverrides,
    #[serde(default)]
    pub visibility: ToolVisibility,
    #[serde(default)]
    pub role_restrictions: HashMap<String, RoleRestriction>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    /// The name shown in user-facing errors.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// The endpoint URL with the protocol suffix applied.
    ///
    /// HTTP and SSE providers are always addressed at `<base>/mcp`; stored
    /// URLs may or may not already carry the suffix.
    pub fn normalized_url(&self) -> Result<String> {
        match &self.endpoint {
            Endpoint::Url { url } => Ok(normalize_endpoint_url(url)),
            Endpoint::Command { .. } => Err(Error::ConfigError(format!(
                "provider '{}' uses a command endpoint but protocol {:?} needs a URL",
                self.name, self.protocol
            ))),
        }
    }

    /// Command, args and working directory for stdio providers.
    pub fn command_line(&self) -> Result<(&str, &[String], Option<&str>)> {
        match &self.endpoint {
            Endpoint::Command { command, args, cwd } => {
                Ok((command.as_str(), args.as_slice(), cwd.as_deref()))
            }
            Endpoint::Url { .. } => Err(Error::ConfigError(format!(
                "provider '{}' uses a URL endpoint but stdio needs a command",
                self.name
            ))),
        }
    }

    /// Rejects descriptors the registry cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::ValidationError("provider name cannot be empty".to_string()));
        }
        match (&self.protocol, &self.endpoint) {
            (Protocol::Stdio, Endpoint::Command { command, .. }) if command.is_empty() => Err(
                Error::ValidationError(format!("provider '{}' has an empty command", self.name)),
            ),
            (Protocol::Stdio, Endpoint::Url { .. }) => Err(Error::ValidationError(format!(
                "provider '{}' is stdio but has a URL endpoint",
                self.name
            ))),
            (Protocol::Http | Protocol::Sse, Endpoint::Command { .. }) => {
                Err(Error::ValidationError(format!(
                    "provider '{}' is {:?} but has a command endpoint",
                    self.name, self.protocol
                )))
            }
            (Protocol::Http | Protocol::Sse, Endpoint::Url { url }) if url.is_empty() => Err(
                Error::ValidationError(format!("provider '{}' has an empty URL", self.name)),
            ),
            _ => Ok(()),
        }
    }
}

/// Appends the `/mcp` suffix unless the URL already ends with it.
pub fn normalize_endpoint_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(ENDPOINT_SUFFIX) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{ENDPOINT_SUFFIX}")
    }
}
