//! MCP provider integration for OmniBridge
#![forbid(unsafe_code)]

//!
//! Provides the provider registry with hot reload and health probing, the
//! HTTP/SSE/stdio transports, retry classification, the per-provider circuit
//! breaker and the tool catalog cache.

pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod retry;
pub mod store;
pub mod transport;

pub use catalog::{CatalogEntryStats, ToolCatalogCache, CATALOG_TTL};
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitStatus};
pub use config::{
    normalize_endpoint_url, AuthConfig, CircuitBreakerConfig, Endpoint, Protocol,
    ProviderDescriptor, RegistrySettings, RetryOverrides, RetryPolicy, ToolVisibility,
};
pub use error::{Error, Result};
pub use registry::{HealthReport, ProviderRegistry};
pub use retry::with_reconnect_retry;
pub use store::{ConfigStore, HealthEvent, HealthEventKind, InMemoryConfigStore};
pub use transport::{
    DefaultTransportFactory, HttpTransport, SseTransport, StdioTransport, ToolDescriptor,
    Transport, TransportFactory,
};
