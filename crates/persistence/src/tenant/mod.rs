//! Tenant routing for multi-tenant storage.
//!
//! Tenants are isolated by namespace. The active tenant is ambient: it is
//! established once with [`run_with_tenant`] and picked up by every query the
//! call chain makes, including calls made after `.await` points.
//!
//! # Core Types
//!
//! - [`TenantId`] - Opaque tenant identifier
//! - [`TenantContext`] - A tenant resolved to its namespace
//! - [`TenantRouter`] - Maps tenants to namespaces
//!
//! # Examples
//!
//! ```
//! use quarry_persistence::config::TenancyConfig;
//! use quarry_persistence::tenant::{run_with_tenant, TenantRouter};
//!
//! # tokio_test::block_on(async {
//! let router = TenantRouter::new(TenancyConfig {
//!     multi_tenant: true,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let ctx = run_with_tenant("acme", async { router.resolve_current() })
//!     .await
//!     .unwrap();
//! assert_eq!(ctx.namespace(), "acme");
//! # });
//! ```

mod context;
mod id;
mod router;

pub use context::{TenantContext, current_tenant, in_current_tenant, run_with_tenant};
pub use id::{ROOT_TENANT, TenantId};
pub use router::{TenantRouter, namespace_name};
