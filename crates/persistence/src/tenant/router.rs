//! Tenant to namespace routing.
//!
//! Each tenant's tables live in their own namespace. On PostgreSQL the
//! namespace is a schema; on SQLite it is a table-name prefix. The router only
//! decides the namespace name; the engine decides how a namespace qualifies a
//! table.
//!
//! # Namespace naming
//!
//! Tenant IDs are converted to namespace names by:
//! - converting to lowercase
//! - replacing hierarchical separators (`/`) and hyphens with underscores
//!
//! Tenant IDs are therefore case-insensitive, and `-`, `/` and `_` are the
//! same separator: `Acme-Corp`, `acme_corp` and `ACME/CORP` are one tenant.
//! Any other character is rejected rather than dropped, so two IDs share a
//! namespace only through that folding.
//!
//! A namespace may not contain `__` or end with `_` (the SQLite table prefix
//! must stay unambiguous), and may not name a schema the database owns
//! (`pg_*`, `information_schema`, `sqlite*`) or the default namespace.
//!
//! The root tenant, and every tenant of a single-tenant deployment, maps to
//! the configured default namespace.

use regex::Regex;

use crate::config::TenancyConfig;
use crate::error::{ConfigError, StorageResult, TenantError};
use crate::sql::PREFIX_SEPARATOR;

use super::context::{TenantContext, current_tenant};
use super::id::TenantId;

/// Normalizes a tenant ID to a namespace name.
///
/// ```
/// use quarry_persistence::tenant::namespace_name;
///
/// assert_eq!(namespace_name("Acme-Corp/Research").unwrap(), "acme_corp_research");
/// assert!(namespace_name("a'; drop").is_err());
/// assert!(namespace_name("a--b").is_err());
/// assert!(namespace_name("pg_catalog").is_err());
/// ```
pub fn namespace_name(id: &str) -> Result<String, TenantError> {
    let invalid = |reason: &str| TenantError::InvalidTenant {
        tenant_id: TenantId::new(id),
        reason: reason.to_string(),
    };

    let namespace: String = id
        .chars()
        .map(|c| match c {
            '/' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    if namespace.is_empty() {
        return Err(invalid("tenant id is empty"));
    }
    if !namespace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(
            "tenant id may only contain ASCII letters, digits, '_', '-' and '/'",
        ));
    }
    if namespace.contains(PREFIX_SEPARATOR) || namespace.ends_with('_') {
        return Err(invalid(
            "tenant id may not repeat or end with a separator",
        ));
    }
    if namespace.starts_with("pg_")
        || namespace.starts_with("sqlite")
        || namespace == "information_schema"
    {
        return Err(invalid("namespace is reserved by the database"));
    }
    Ok(namespace)
}

/// Maps tenants to the namespace their data lives in.
#[derive(Debug, Clone)]
pub struct TenantRouter {
    config: TenancyConfig,
    namespace_pattern: Regex,
}

impl TenantRouter {
    /// Creates a router for the given tenancy configuration.
    pub fn new(config: TenancyConfig) -> StorageResult<Self> {
        let namespace_pattern =
            Regex::new(&config.namespace_pattern).map_err(|e| ConfigError::Invalid {
                key: "tenancy.namespace_pattern".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            config,
            namespace_pattern,
        })
    }

    /// Returns the tenancy configuration.
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    /// Returns the namespace owned by the root tenant.
    pub fn default_namespace(&self) -> &str {
        &self.config.default_schema
    }

    /// Returns `true` if tenants get their own namespaces.
    pub fn is_multi_tenant(&self) -> bool {
        self.config.multi_tenant
    }

    /// Resolves a tenant to its namespace.
    pub fn namespace_for(&self, tenant_id: &TenantId) -> StorageResult<String> {
        if !self.config.multi_tenant || tenant_id.is_root() {
            return Ok(self.config.default_schema.clone());
        }

        let namespace = namespace_name(tenant_id.as_str())?;
        self.validate(tenant_id, &namespace)?;
        Ok(namespace)
    }

    /// Resolves a tenant into a [`TenantContext`].
    pub fn resolve(&self, tenant_id: &TenantId) -> StorageResult<TenantContext> {
        let namespace = self.namespace_for(tenant_id)?;
        Ok(TenantContext::new(tenant_id.clone(), namespace))
    }

    /// Resolves the ambient tenant of the calling chain.
    pub fn resolve_current(&self) -> StorageResult<TenantContext> {
        self.resolve(&current_tenant())
    }

    fn validate(&self, tenant_id: &TenantId, namespace: &str) -> StorageResult<()> {
        let invalid = |reason: String| TenantError::InvalidTenant {
            tenant_id: tenant_id.clone(),
            reason,
        };

        if namespace == self.config.default_schema {
            return Err(invalid("namespace belongs to the root tenant".to_string()).into());
        }
        if namespace.len() > self.config.max_namespace_length {
            return Err(invalid(format!(
                "namespace name exceeds maximum length of {} characters",
                self.config.max_namespace_length
            ))
            .into());
        }
        if !self.namespace_pattern.is_match(namespace) {
            return Err(invalid(format!(
                "namespace '{}' does not match required pattern: {}",
                namespace, self.config.namespace_pattern
            ))
            .into());
        }
        Ok(())
    }
}
