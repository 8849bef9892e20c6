//! Ambient tenant context.
//!
//! The active tenant is carried in a tokio task-local, so every data access
//! made while a future runs inside [`run_with_tenant`] is scoped to that
//! tenant, across `.await` points and through any depth of calls, without
//! passing the tenant around. The previous tenant is restored when the future
//! completes, fails, or is dropped.
//!
//! Task-locals are not inherited by `tokio::spawn`. Wrap spawned futures in
//! [`in_current_tenant`] to carry the caller's tenant along.

use std::future::Future;

use super::id::TenantId;

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Runs `operation` with `tenant` as the ambient tenant.
///
/// Nested calls override the tenant for their own extent and restore the
/// outer one afterwards.
///
/// ```
/// use quarry_persistence::tenant::{current_tenant, run_with_tenant, TenantId};
///
/// # tokio_test::block_on(async {
/// assert!(current_tenant().is_root());
/// let seen = run_with_tenant("acme", async { current_tenant() }).await;
/// assert_eq!(seen, TenantId::new("acme"));
/// assert!(current_tenant().is_root());
/// # });
/// ```
pub async fn run_with_tenant<F, T>(tenant: impl Into<TenantId>, operation: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_TENANT.scope(tenant.into(), operation).await
}

/// Returns the ambient tenant, or the root tenant outside any tenant scope.
pub fn current_tenant() -> TenantId {
    CURRENT_TENANT
        .try_with(|tenant| tenant.clone())
        .unwrap_or_else(|_| TenantId::root())
}

/// Binds `operation` to the caller's current tenant.
///
/// Use this for futures handed to `tokio::spawn`, which otherwise start in
/// the root tenant.
pub fn in_current_tenant<F>(operation: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT_TENANT.scope(current_tenant(), operation)
}

/// A tenant resolved to the namespace its data lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    namespace: String,
}

impl TenantContext {
    /// Creates a context from a tenant and its resolved namespace.
    pub fn new(tenant_id: TenantId, namespace: impl Into<String>) -> Self {
        Self {
            tenant_id,
            namespace: namespace.into(),
        }
    }

    /// Returns the tenant identifier.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the namespace (schema or table prefix) for this tenant.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_default_is_root() {
        assert!(current_tenant().is_root());
    }

    #[tokio::test]
    async fn test_nesting_restores_outer_tenant() {
        run_with_tenant("outer", async {
            assert_eq!(current_tenant().as_str(), "outer");
            run_with_tenant("inner", async {
                assert_eq!(current_tenant().as_str(), "inner");
            })
            .await;
            assert_eq!(current_tenant().as_str(), "outer");
        })
        .await;
        assert!(current_tenant().is_root());
    }

    #[tokio::test]
    async fn test_restored_after_error() {
        let result: Result<(), &str> = run_with_tenant("failing", async { Err("boom") }).await;
        assert!(result.is_err());
        assert!(current_tenant().is_root());
    }

    #[tokio::test]
    async fn test_concurrent_chains_do_not_share_tenant() {
        let a = run_with_tenant("t1", async {
            let mut seen = Vec::new();
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                seen.push(current_tenant());
            }
            seen
        });
        let b = run_with_tenant("t2", async {
            let mut seen = Vec::new();
            for _ in 0..5 {
                tokio::task::yield_now().await;
                seen.push(current_tenant());
            }
            seen
        });
        let (a, b) = tokio::join!(a, b);
        assert!(a.iter().all(|t| t.as_str() == "t1"));
        assert!(b.iter().all(|t| t.as_str() == "t2"));
    }

    #[tokio::test]
    async fn test_spawned_task_inherits_with_helper() {
        let handle = run_with_tenant("spawner", async {
            tokio::spawn(in_current_tenant(async { current_tenant() }))
        })
        .await;
        assert_eq!(handle.await.unwrap().as_str(), "spawner");
    }

    #[tokio::test]
    async fn test_cancelled_scope_restores() {
        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            run_with_tenant("slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(current_tenant().is_root());
    }

    #[test]
    fn test_context_accessors() {
        let ctx = TenantContext::new(TenantId::new("acme"), "acme");
        assert_eq!(ctx.tenant_id().as_str(), "acme");
        assert_eq!(ctx.namespace(), "acme");
    }
}
