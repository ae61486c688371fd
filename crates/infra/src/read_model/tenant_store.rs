use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use prodline_core::TenantId;

/// Tenant-isolated key/value store for read models.
///
/// A key stored for one tenant is invisible to every other tenant.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    /// Mutate a stored value in place; returns `false` if the key is absent.
    fn modify(&self, tenant_id: TenantId, key: &K, f: &mut dyn FnMut(&mut V)) -> bool;
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn modify(&self, tenant_id: TenantId, key: &K, f: &mut dyn FnMut(&mut V)) -> bool {
        (**self).modify(tenant_id, key, f)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }
}

/// In-memory tenant-isolated store.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, key), value);
        }
    }

    fn modify(&self, tenant_id: TenantId, key: &K, f: &mut dyn FnMut(&mut V)) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        match map.get_mut(&(tenant_id, key.clone())) {
            Some(v) => {
                f(v);
                true
            }
            None => false,
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };

        map.iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_scoped_to_their_tenant() {
        let store: InMemoryTenantStore<&'static str, u32> = InMemoryTenantStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());

        store.upsert(a, "flour", 1);
        store.upsert(b, "flour", 2);

        assert_eq!(store.get(a, &"flour"), Some(1));
        assert_eq!(store.get(b, &"flour"), Some(2));
        assert_eq!(store.list(a), vec![1]);
    }

    #[test]
    fn modify_touches_only_existing_keys() {
        let store: InMemoryTenantStore<&'static str, u32> = InMemoryTenantStore::new();
        let t = TenantId::new();
        store.upsert(t, "eggs", 6);

        assert!(store.modify(t, &"eggs", &mut |v| *v += 6));
        assert!(!store.modify(t, &"milk", &mut |v| *v += 1));
        assert!(!store.modify(TenantId::new(), &"eggs", &mut |v| *v = 0));
        assert_eq!(store.get(t, &"eggs"), Some(12));
    }
}
