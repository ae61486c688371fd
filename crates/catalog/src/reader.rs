use std::sync::Arc;

use prodline_core::TenantId;

use crate::category::{CategoryId, CategoryRecord};
use crate::product::{ProductId, ProductRecord};

/// Read-only access to the catalog.
///
/// Contract: unknown **and** soft-deleted ids yield `None`; lookups never fail.
/// A record returned from here is therefore always active.
pub trait CatalogReader: Send + Sync {
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord>;

    fn category(&self, tenant_id: TenantId, id: CategoryId) -> Option<CategoryRecord>;
}

impl<C> CatalogReader for Arc<C>
where
    C: CatalogReader + ?Sized,
{
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        (**self).product(tenant_id, id)
    }

    fn category(&self, tenant_id: TenantId, id: CategoryId) -> Option<CategoryRecord> {
        (**self).category(tenant_id, id)
    }
}

impl<C> CatalogReader for &C
where
    C: CatalogReader + ?Sized,
{
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        (**self).product(tenant_id, id)
    }

    fn category(&self, tenant_id: TenantId, id: CategoryId) -> Option<CategoryRecord> {
        (**self).category(tenant_id, id)
    }
}
