use prodline_catalog::{CatalogReader, CategoryId, CategoryRecord, ProductId, ProductRecord};
use prodline_core::{LifecycleState, TenantId};

use super::tenant_store::{InMemoryTenantStore, TenantStore};

/// In-process catalog mirror.
///
/// Holds soft-deleted records too, but reads through [`CatalogReader`] only
/// ever return active ones.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: InMemoryTenantStore<ProductId, ProductRecord>,
    categories: InMemoryTenantStore<CategoryId, CategoryRecord>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, tenant_id: TenantId, record: ProductRecord) {
        self.products.upsert(tenant_id, record.id, record);
    }

    pub fn upsert_category(&self, tenant_id: TenantId, record: CategoryRecord) {
        self.categories.upsert(tenant_id, record.id, record);
    }

    /// Soft-delete a product; returns `false` if it is unknown.
    pub fn deactivate_product(&self, tenant_id: TenantId, id: ProductId) -> bool {
        self.products
            .modify(tenant_id, &id, &mut |p| p.state = LifecycleState::Inactive)
    }

    pub fn deactivate_category(&self, tenant_id: TenantId, id: CategoryId) -> bool {
        self.categories
            .modify(tenant_id, &id, &mut |c| c.state = LifecycleState::Inactive)
    }

    pub fn products(&self, tenant_id: TenantId) -> Vec<ProductRecord> {
        self.products.list(tenant_id)
    }
}

impl CatalogReader for InMemoryCatalog {
    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        self.products.get(tenant_id, &id).filter(ProductRecord::is_active)
    }

    fn category(&self, tenant_id: TenantId, id: CategoryId) -> Option<CategoryRecord> {
        self.categories
            .get(tenant_id, &id)
            .filter(CategoryRecord::is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodline_catalog::ProductKind;
    use rust_decimal::Decimal;

    #[test]
    fn soft_deleted_records_read_as_absent() {
        let catalog = InMemoryCatalog::new();
        let tenant_id = TenantId::new();
        let flour = ProductRecord::new(ProductId::generate(), "FLR", "Flour", ProductKind::Simple, Decimal::new(240, 2));
        catalog.upsert_product(tenant_id, flour.clone());

        assert_eq!(catalog.product(tenant_id, flour.id), Some(flour.clone()));
        assert!(catalog.product(TenantId::new(), flour.id).is_none());

        assert!(catalog.deactivate_product(tenant_id, flour.id));
        assert!(catalog.product(tenant_id, flour.id).is_none());
        assert_eq!(catalog.products(tenant_id).len(), 1);
        assert!(!catalog.deactivate_product(tenant_id, ProductId::generate()));
    }

    #[test]
    fn categories_follow_the_same_contract() {
        let catalog = InMemoryCatalog::new();
        let tenant_id = TenantId::new();
        let fruits = CategoryRecord::new(CategoryId::generate(), "Fruits");
        catalog.upsert_category(tenant_id, fruits.clone());

        assert_eq!(catalog.category(tenant_id, fruits.id), Some(fruits.clone()));
        catalog.deactivate_category(tenant_id, fruits.id);
        assert!(catalog.category(tenant_id, fruits.id).is_none());
    }
}
