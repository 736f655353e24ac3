//! Object cache.
//!
//! A local, eventually-consistent mirror of one resource kind, written only by
//! its informer and read by everyone else. Objects are stored behind `Arc` and
//! handed out as shared references: readers must copy before mutating.

use crds::Website;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// `<namespace>/<name>` identity of an object; the namespace is empty for
/// cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace (empty for cluster-scoped objects)
    pub namespace: String,
    /// Object name
    pub name: String,
}

/// A work-queue key that does not split into namespace and name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource key: {0:?}")]
pub struct InvalidKey(pub String);

impl ObjectKey {
    /// Key from a namespace (may be empty) and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object, `None` when the object has no name yet.
    pub fn from_object<K: Resource>(obj: &K) -> Option<Self> {
        let name = obj.meta().name.clone()?;
        Some(Self::new(obj.namespace().unwrap_or_default(), name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = InvalidKey;

    /// Accepts `name` or `namespace/name`; anything with more separators or
    /// an empty name is rejected.
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => ("", name),
            (Some(namespace), Some(name), None) => (namespace, name),
            _ => return Err(InvalidKey(key.to_string())),
        };
        if name.is_empty() {
            return Err(InvalidKey(key.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}

/// Changes produced by replacing the whole cache content after a relist.
#[derive(Debug)]
pub struct ReplaceDiff<K> {
    /// Objects that were not cached before
    pub added: Vec<Arc<K>>,
    /// `(old, new)` pairs for objects that were already cached
    pub updated: Vec<(Arc<K>, Arc<K>)>,
    /// Objects that disappeared during the relist
    pub deleted: Vec<Arc<K>>,
}

struct CacheInner<K> {
    objects: RwLock<HashMap<ObjectKey, Arc<K>>>,
    synced: watch::Sender<bool>,
}

/// Shared, read-mostly cache of one resource kind.
pub struct ObjectCache<K> {
    inner: Arc<CacheInner<K>>,
}

impl<K> Clone for ObjectCache<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for ObjectCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("objects", &self.inner.objects.read().len())
            .field("synced", &*self.inner.synced.borrow())
            .finish()
    }
}

impl<K> Default for ObjectCache<K> {
    fn default() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            inner: Arc::new(CacheInner {
                objects: RwLock::new(HashMap::new()),
                synced,
            }),
        }
    }
}

impl<K> ObjectCache<K>
where
    K: Resource + Clone,
{
    /// Creates an empty, unsynced cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Object stored under `namespace`/`name`
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.get_by_key(&ObjectKey::new(namespace, name))
    }

    /// Object stored under `key`
    pub fn get_by_key(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.inner.objects.read().get(key).cloned()
    }

    /// Objects in `namespace` (all namespaces when `None`) whose labels
    /// contain every pair of `selector`. An empty selector matches everything.
    pub fn list(
        &self,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Vec<Arc<K>> {
        let objects = self.inner.objects.read();
        let mut matched: Vec<_> = objects
            .iter()
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
            .filter(|(_, obj)| {
                let labels = obj.labels();
                selector
                    .iter()
                    .all(|(k, v)| labels.get(k).is_some_and(|value| value == v))
            })
            .map(|(key, obj)| (key.clone(), Arc::clone(obj)))
            .collect();
        matched.sort_by(|(a, _), (b, _)| a.cmp(b));
        matched.into_iter().map(|(_, obj)| obj).collect()
    }

    /// Every cached object, in key order
    pub fn snapshot(&self) -> Vec<Arc<K>> {
        self.list(None, &BTreeMap::new())
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    /// Whether the cache holds no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces `obj`, returning the stored object and the one it replaced.
    ///
    /// Objects without a name cannot be keyed and are ignored.
    pub fn apply(&self, obj: K) -> Option<(Arc<K>, Option<Arc<K>>)> {
        let key = ObjectKey::from_object(&obj)?;
        let obj = Arc::new(obj);
        let old = self.inner.objects.write().insert(key, Arc::clone(&obj));
        Some((obj, old))
    }

    /// Removes the entry for `obj`, returning it when it was cached.
    pub fn remove(&self, obj: &K) -> Option<Arc<K>> {
        let key = ObjectKey::from_object(obj)?;
        self.inner.objects.write().remove(&key)
    }

    /// Replaces the whole content with `objects` (a relist), reporting what changed.
    pub fn replace(&self, objects: Vec<K>) -> ReplaceDiff<K> {
        let fresh: HashMap<ObjectKey, Arc<K>> = objects
            .into_iter()
            .filter_map(|obj| Some((ObjectKey::from_object(&obj)?, Arc::new(obj))))
            .collect();

        let mut stored = self.inner.objects.write();
        let mut diff = ReplaceDiff {
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        };
        for (key, obj) in &fresh {
            match stored.get(key) {
                Some(old) => diff.updated.push((Arc::clone(old), Arc::clone(obj))),
                None => diff.added.push(Arc::clone(obj)),
            }
        }
        diff.deleted = stored
            .iter()
            .filter(|(key, _)| !fresh.contains_key(*key))
            .map(|(_, obj)| Arc::clone(obj))
            .collect();
        *stored = fresh;
        diff
    }

    /// Flags the initial list as complete
    pub fn mark_synced(&self) {
        self.inner.synced.send_replace(true);
    }

    /// Whether the initial list has completed
    pub fn has_synced(&self) -> bool {
        *self.inner.synced.borrow()
    }

    /// Resolves once the initial list has completed
    pub async fn wait_until_synced(&self) {
        let mut synced = self.inner.synced.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = synced.wait_for(|synced| *synced).await;
    }
}

/// The caches for every kind the controller watches.
#[derive(Debug, Clone, Default)]
pub struct Listers {
    /// Primary objects
    pub websites: ObjectCache<Website>,
    /// Deployments owned by websites (and any others in the watched namespace)
    pub deployments: ObjectCache<Deployment>,
    /// Services owned by websites (and any others in the watched namespace)
    pub services: ObjectCache<Service>,
}

impl Listers {
    /// Empty, unsynced caches
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether all caches finished their initial list
    pub fn has_synced(&self) -> bool {
        self.websites.has_synced() && self.deployments.has_synced() && self.services.has_synced()
    }

    /// Resolves once all caches finished their initial list
    pub async fn wait_for_sync(&self) {
        tokio::join!(
            self.websites.wait_until_synced(),
            self.deployments.wait_until_synced(),
            self.services.wait_until_synced(),
        );
    }
}
