//! Document collections with transaction-scoped access

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use trellis_core::StoreError;

use crate::query::Query;

/// A storable entity
pub trait Document: Clone + Send + Sync + 'static {
    /// Primary key.
    fn id(&self) -> &str;

    /// Values of a named field, for query predicates. Single-valued fields
    /// return one element; unknown fields return none.
    fn field_values(&self, field: &str) -> Vec<String>;
}

/// An id-keyed collection of documents
///
/// All access goes through [`view`](DocumentStore::view) (shared read) or
/// [`update`](DocumentStore::update) (exclusive write), mirroring the
/// read-view / write-transaction scoping of a real storage engine.
pub struct DocumentStore<T: Document> {
    inner: RwLock<HashMap<String, T>>,
}

impl<T: Document> Default for DocumentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Document> DocumentStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Run `f` inside a read view.
    pub fn view<R>(&self, f: impl FnOnce(ReadView<'_, T>) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(ReadView { guard })
    }

    /// Run `f` inside a write transaction.
    pub fn update<R>(&self, f: impl FnOnce(&mut WriteTx<'_, T>) -> R) -> R {
        let guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut WriteTx { guard })
    }

    pub fn create(&self, doc: T) -> Result<(), StoreError> {
        self.update(|tx| tx.create(doc))
    }

    pub fn read(&self, id: &str) -> Result<T, StoreError> {
        self.view(|view| view.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string())))
    }

    pub fn upsert(&self, doc: T) {
        self.update(|tx| tx.upsert(doc));
    }

    pub fn delete(&self, id: &str) -> Result<T, StoreError> {
        self.update(|tx| tx.delete(id))
    }

    pub fn query(&self, query: &Query) -> Vec<T> {
        self.view(|view| view.query(query))
    }

    pub fn len(&self) -> usize {
        self.view(|view| view.guard.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared read access to a collection
pub struct ReadView<'a, T: Document> {
    guard: RwLockReadGuard<'a, HashMap<String, T>>,
}

impl<T: Document> ReadView<'_, T> {
    pub fn get(&self, id: &str) -> Option<&T> {
        self.guard.get(id)
    }

    pub fn query(&self, query: &Query) -> Vec<T> {
        let mut found: Vec<T> = self
            .guard
            .values()
            .filter(|doc| query.matches(|field| doc.field_values(field)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        found
    }
}

/// Exclusive write access to a collection
pub struct WriteTx<'a, T: Document> {
    guard: RwLockWriteGuard<'a, HashMap<String, T>>,
}

impl<T: Document> WriteTx<'_, T> {
    pub fn create(&mut self, doc: T) -> Result<(), StoreError> {
        let id = doc.id().to_string();
        if self.guard.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        self.guard.insert(id, doc);
        Ok(())
    }

    pub fn upsert(&mut self, doc: T) {
        self.guard.insert(doc.id().to_string(), doc);
    }

    pub fn delete(&mut self, id: &str) -> Result<T, StoreError> {
        self.guard
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.guard.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        id: String,
        owner: String,
    }

    impl Document for Doc {
        fn id(&self) -> &str {
            &self.id
        }

        fn field_values(&self, field: &str) -> Vec<String> {
            match field {
                "owner" => vec![self.owner.clone()],
                _ => vec![],
            }
        }
    }

    fn doc(id: &str, owner: &str) -> Doc {
        Doc {
            id: id.to_string(),
            owner: owner.to_string(),
        }
    }

    #[test]
    fn create_rejects_duplicates() {
        let store = DocumentStore::new();
        store.create(doc("a", "x")).unwrap();
        assert!(matches!(
            store.create(doc("a", "y")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store: DocumentStore<Doc> = DocumentStore::new();
        assert!(matches!(store.delete("a"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn query_filters_by_field_in_id_order() {
        let store = DocumentStore::new();
        store.create(doc("b", "x")).unwrap();
        store.create(doc("a", "x")).unwrap();
        store.create(doc("c", "y")).unwrap();

        let found = store.query(&Query::all().field_eq("owner", "x"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "a");
        assert_eq!(found[1].id, "b");
    }
}
