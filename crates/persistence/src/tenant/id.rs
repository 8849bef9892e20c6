//! Tenant identifier type.
//!
//! This module defines the [`TenantId`] type, an opaque identifier for tenants
//! with support for hierarchical names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The root tenant identifier.
///
/// The root tenant owns the default namespace. Every call chain that has not
/// entered [`run_with_tenant`](super::run_with_tenant) runs as the root tenant.
pub const ROOT_TENANT: &str = "__root__";

/// An opaque tenant identifier.
///
/// `TenantId` accepts hierarchical names using a `/` separator
/// (`acme/research`); the separator is folded into the namespace name by
/// [`namespace_name`](super::namespace_name).
///
/// # Examples
///
/// ```
/// use quarry_persistence::tenant::TenantId;
///
/// let tenant = TenantId::new("acme/research");
/// assert_eq!(tenant.as_str(), "acme/research");
/// assert!(!tenant.is_root());
/// assert!(TenantId::root().is_root());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the root tenant ID.
    pub fn root() -> Self {
        Self(ROOT_TENANT.to_string())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the root tenant.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_TENANT
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({:?})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_tenant() {
        let root = TenantId::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), ROOT_TENANT);
        assert_eq!(TenantId::default(), root);
    }

    #[test]
    fn test_conversions() {
        let a: TenantId = "acme".into();
        let b: TenantId = String::from("acme").into();
        let c: TenantId = "acme".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "acme");
        assert_eq!(format!("{:?}", a), "TenantId(\"acme\")");
    }

    #[test]
    fn test_serde_transparent() {
        let tenant = TenantId::new("acme/research");
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"acme/research\"");
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tenant);
    }
}
