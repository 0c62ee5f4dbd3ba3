//! Caller permission profiles and tool-level access resolution
//!
//! This crate answers two questions for the dispatch layer: may a caller
//! reach a provider at all, and which of the provider's tools may they
//! invoke. Profiles come from an external store behind the [`ProfileStore`]
//! trait; resolved tool sets are cached with a TTL.

#![forbid(unsafe_code)]

pub mod error;
pub mod matcher;
pub mod profile;
pub mod resolver;

pub use error::{Error, Result};
pub use matcher::{matches_any, matches_pattern, validate_pattern};
pub use profile::{
    PermissionEntry, PermissionMode, PermissionProfile, ProviderGrants, RoleRestriction,
    ADMIN_ROLE, DEFAULT_ROLE,
};
pub use resolver::{
    InMemoryProfileStore, PermissionResolver, ProfileStore, ResolverCacheStats,
    PERMISSION_CACHE_TTL,
};
