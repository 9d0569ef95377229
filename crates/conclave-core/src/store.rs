//! Hierarchical object store.
//!
//! A small handle-addressed tree of named objects carrying typed keys. The
//! executive mirrors engine identity and per-function counters into it so
//! external tooling can inspect the loaded set; the registry keeps its own
//! authoritative state and treats the store as a write-mostly mirror.
//!
//! Destroying an object destroys its whole subtree. Handles are never
//! reused within one store instance, so a stale handle fails cleanly with
//! [`StoreError::NoSuchObject`] instead of aliasing a newer object.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreError;

/// Handle addressing one object in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub(crate) u64);

/// Handle of the root object, present in every store.
pub const ROOT: ObjectHandle = ObjectHandle(0);

/// A typed key value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// UTF-8 string.
    Str(String),
    /// 16-bit unsigned integer.
    U16(u16),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit unsigned integer.
    U64(u64),
}

impl Value {
    /// Borrows the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the `u16` payload, if present.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `u32` payload, if present.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `u64` payload, if present.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }
}

struct Node {
    name: String,
    parent: u64,
    children: Vec<u64>,
    keys: HashMap<String, Value>,
}

struct StoreInner {
    nodes: HashMap<u64, Node>,
    next: u64,
}

/// In-memory hierarchical object store.
pub struct ObjectStore {
    inner: Mutex<StoreInner>,
}

impl ObjectStore {
    /// Creates a store containing only the root object.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            0,
            Node {
                name: String::new(),
                parent: 0,
                children: Vec::new(),
                keys: HashMap::new(),
            },
        );
        Self {
            inner: Mutex::new(StoreInner { nodes, next: 0 }),
        }
    }

    /// Creates a child object under `parent`. Sibling names need not be
    /// unique; `find` returns every match.
    pub fn create(&self, parent: ObjectHandle, name: &str) -> Result<ObjectHandle, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&parent.0) {
            return Err(StoreError::NoSuchObject(parent));
        }
        inner.next += 1;
        let id = inner.next;
        inner.nodes.insert(
            id,
            Node {
                name: name.to_string(),
                parent: parent.0,
                children: Vec::new(),
                keys: HashMap::new(),
            },
        );
        if let Some(node) = inner.nodes.get_mut(&parent.0) {
            node.children.push(id);
        }
        Ok(ObjectHandle(id))
    }

    /// All children of `parent` named `name`, in creation order.
    pub fn find(&self, parent: ObjectHandle, name: &str) -> Vec<ObjectHandle> {
        let inner = self.inner.lock();
        let Some(node) = inner.nodes.get(&parent.0) else {
            return Vec::new();
        };
        node.children
            .iter()
            .copied()
            .filter(|id| inner.nodes.get(id).is_some_and(|c| c.name == name))
            .map(ObjectHandle)
            .collect()
    }

    /// First child of `parent` named `name`, if any.
    pub fn first(&self, parent: ObjectHandle, name: &str) -> Option<ObjectHandle> {
        self.find(parent, name).into_iter().next()
    }

    /// Name of the addressed object.
    pub fn name(&self, object: ObjectHandle) -> Option<String> {
        self.inner.lock().nodes.get(&object.0).map(|n| n.name.clone())
    }

    /// Sets (creating or replacing) a typed key on `object`.
    pub fn key_set(&self, object: ObjectHandle, key: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(&object.0)
            .ok_or(StoreError::NoSuchObject(object))?;
        node.keys.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads a key from `object`.
    pub fn key_get(&self, object: ObjectHandle, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .nodes
            .get(&object.0)
            .and_then(|n| n.keys.get(key).cloned())
    }

    /// Increments a `u64` key by one, returning the new value.
    pub fn key_inc_u64(&self, object: ObjectHandle, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(&object.0)
            .ok_or(StoreError::NoSuchObject(object))?;
        match node.keys.get_mut(key) {
            Some(Value::U64(v)) => {
                *v += 1;
                Ok(*v)
            }
            Some(_) => Err(StoreError::TypeMismatch {
                object,
                key: key.to_string(),
            }),
            None => Err(StoreError::NoSuchKey {
                object,
                key: key.to_string(),
            }),
        }
    }

    /// Destroys `object` and its whole subtree.
    pub fn destroy(&self, object: ObjectHandle) -> Result<(), StoreError> {
        if object == ROOT {
            return Err(StoreError::CannotDestroyRoot);
        }
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&object.0) {
            return Err(StoreError::NoSuchObject(object));
        }
        let mut pending = vec![object.0];
        while let Some(id) = pending.pop() {
            if let Some(node) = inner.nodes.remove(&id) {
                pending.extend(node.children);
                if id == object.0
                    && let Some(parent) = inner.nodes.get_mut(&node.parent)
                {
                    parent.children.retain(|c| *c != id);
                }
            }
        }
        Ok(())
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_find_and_keys() {
        let store = ObjectStore::new();
        let svc = store.create(ROOT, "service").unwrap();
        store.key_set(svc, "name", Value::Str("conclave_cpg".into())).unwrap();
        store.key_set(svc, "ver", Value::U32(0)).unwrap();

        let found = store.find(ROOT, "service");
        assert_eq!(found, vec![svc]);
        assert_eq!(
            store.key_get(svc, "name").unwrap().as_str(),
            Some("conclave_cpg")
        );
        assert_eq!(store.key_get(svc, "ver").unwrap().as_u32(), Some(0));
        assert_eq!(store.key_get(svc, "missing"), None);
    }

    #[test]
    fn duplicate_sibling_names_all_found() {
        let store = ObjectStore::new();
        let a = store.create(ROOT, "service").unwrap();
        let b = store.create(ROOT, "service").unwrap();
        assert_eq!(store.find(ROOT, "service"), vec![a, b]);
        assert_eq!(store.first(ROOT, "service"), Some(a));
    }

    #[test]
    fn destroy_removes_the_subtree() {
        let store = ObjectStore::new();
        let runtime = store.create(ROOT, "runtime").unwrap();
        let services = store.create(runtime, "services").unwrap();
        let leaf = store.create(services, "quorum").unwrap();

        store.destroy(runtime).unwrap();
        assert!(store.find(ROOT, "runtime").is_empty());
        assert_eq!(store.key_get(leaf, "anything"), None);
        assert_eq!(
            store.key_set(services, "k", Value::U16(1)),
            Err(StoreError::NoSuchObject(services))
        );
    }

    #[test]
    fn root_is_indestructible() {
        let store = ObjectStore::new();
        assert_eq!(store.destroy(ROOT), Err(StoreError::CannotDestroyRoot));
    }

    #[test]
    fn counters_increment() {
        let store = ObjectStore::new();
        let stats = store.create(ROOT, "stats").unwrap();
        store.key_set(stats, "rx", Value::U64(0)).unwrap();
        assert_eq!(store.key_inc_u64(stats, "rx"), Ok(1));
        assert_eq!(store.key_inc_u64(stats, "rx"), Ok(2));
        assert!(matches!(
            store.key_inc_u64(stats, "tx"),
            Err(StoreError::NoSuchKey { .. })
        ));
    }
}
