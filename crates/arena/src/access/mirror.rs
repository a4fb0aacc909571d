//! Watch-fed local replica of cluster objects.
//!
//! The mirror keeps one store per registered kind, keyed by namespace and
//! name, plus optional secondary indices over a field (pods by node). One
//! background task per kind applies watch events; readers take a shared lock
//! and receive owned copies.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use error_stack::Report;
use futures::future::try_join_all;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher::Event;
use tokio::select;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::access::selector::field_value;
use crate::access::strategy::ListQuery;
use crate::access::AccessError;
use crate::access::ResourceKind;
use crate::infrastructure::ClusterClient;
use crate::infrastructure::ClusterError;

/// Field path of the pod scheduling-node index.
pub const NODE_NAME_FIELD: &str = "spec.nodeName";

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Namespace/name key of a mirrored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn of(object: &DynamicObject) -> Self {
        Self {
            namespace: object.metadata.namespace.clone().unwrap_or_default(),
            name: object.metadata.name.clone().unwrap_or_default(),
        }
    }
}

type Extractor = Arc<dyn Fn(&DynamicObject) -> Option<String> + Send + Sync>;

struct FieldIndex {
    extractor: Extractor,
    entries: HashMap<String, BTreeSet<ObjectKey>>,
}

impl FieldIndex {
    fn add(&mut self, key: &ObjectKey, object: &DynamicObject) {
        if let Some(value) = (self.extractor)(object) {
            self.entries.entry(value).or_default().insert(key.clone());
        }
    }

    fn remove(&mut self, key: &ObjectKey, object: &DynamicObject) {
        let Some(value) = (self.extractor)(object) else {
            return;
        };
        if let Some(keys) = self.entries.get_mut(&value) {
            keys.remove(key);
            if keys.is_empty() {
                self.entries.remove(&value);
            }
        }
    }
}

#[derive(Default)]
struct KindStore {
    objects: HashMap<ObjectKey, DynamicObject>,
    indices: HashMap<String, FieldIndex>,
}

impl KindStore {
    fn upsert(&mut self, object: DynamicObject) {
        let key = ObjectKey::of(&object);
        if let Some(previous) = self.objects.remove(&key) {
            for index in self.indices.values_mut() {
                index.remove(&key, &previous);
            }
        }
        for index in self.indices.values_mut() {
            index.add(&key, &object);
        }
        self.objects.insert(key, object);
    }

    fn remove(&mut self, key: &ObjectKey) {
        if let Some(previous) = self.objects.remove(key) {
            for index in self.indices.values_mut() {
                index.remove(key, &previous);
            }
        }
    }

    fn replace_all(&mut self, objects: Vec<DynamicObject>) {
        self.objects.clear();
        for index in self.indices.values_mut() {
            index.entries.clear();
        }
        for object in objects {
            self.upsert(object);
        }
    }

    fn candidates<'a>(&'a self, query: &ListQuery) -> Box<dyn Iterator<Item = &'a DynamicObject> + 'a> {
        let indexed = self.indices.iter().find_map(|(path, index)| {
            query
                .fields()
                .exact_value(path)
                .map(|value| index.entries.get(value))
        });
        match indexed {
            Some(Some(keys)) => Box::new(keys.iter().filter_map(|key| self.objects.get(key))),
            Some(None) => Box::new(std::iter::empty()),
            None => Box::new(self.objects.values()),
        }
    }
}

/// Local replica of a set of resource kinds.
pub struct CacheMirror {
    client: Arc<dyn ClusterClient>,
    stores: RwLock<HashMap<ResourceKind, KindStore>>,
    cancellation_token: CancellationToken,
    synced: AtomicBool,
}

impl CacheMirror {
    pub fn new(client: Arc<dyn ClusterClient>, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        let stores = kinds
            .into_iter()
            .map(|kind| (kind, KindStore::default()))
            .collect();
        Self {
            client,
            stores: RwLock::new(stores),
            cancellation_token: CancellationToken::new(),
            synced: AtomicBool::new(false),
        }
    }

    /// Registers a secondary index over `field_path` for `kind`.
    ///
    /// Objects already in the store are indexed immediately. List queries with
    /// a positive field requirement on `field_path` are answered from the index.
    pub fn index_by_field<F>(&self, kind: ResourceKind, field_path: &str, extractor: F)
    where
        F: Fn(&DynamicObject) -> Option<String> + Send + Sync + 'static,
    {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        let Some(store) = stores.get_mut(&kind) else {
            warn!(kind = %kind, field_path, "ignoring index for a kind that is not mirrored");
            return;
        };

        let mut index = FieldIndex {
            extractor: Arc::new(extractor),
            entries: HashMap::new(),
        };
        for (key, object) in &store.objects {
            index.add(key, object);
        }
        store.indices.insert(field_path.to_string(), index);
    }

    /// Indexes pods by the node they are scheduled on.
    pub fn index_pods_by_node(&self) {
        self.index_by_field(ResourceKind::Pod, NODE_NAME_FIELD, |object| {
            field_value(object, NODE_NAME_FIELD)
        });
    }

    pub fn covers(&self, kind: ResourceKind) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        kinds.sort();
        kinds
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Starts one watch task per kind and waits until every kind has
    /// delivered its initial list.
    ///
    /// No timeout is applied; wrap the call to bound it.
    ///
    /// # Errors
    ///
    /// - [`AccessError::CacheSync`] if any subscription fails before its initial list;
    ///   all watch tasks are stopped in that case
    #[tracing::instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), Report<AccessError>> {
        let kinds = self.kinds();
        info!(kinds = ?kinds, "Starting cache mirror");

        let mut pending = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let (synced_tx, synced_rx) = oneshot::channel();
            let mirror = Arc::clone(self);
            tokio::spawn(async move { mirror.run_watch(kind, synced_tx).await });
            pending.push(async move {
                synced_rx.await.unwrap_or_else(|_| {
                    Err(Report::new(AccessError::CacheSync {
                        message: format!("watch task for {kind} stopped before the initial list"),
                    }))
                })
            });
        }

        if let Err(report) = try_join_all(pending).await {
            self.stop();
            return Err(report);
        }

        self.synced.store(true, Ordering::Release);
        info!("Cache mirror synchronized");
        Ok(())
    }

    /// Stops all watch tasks. The stores keep their last state.
    ///
    /// Watch tasks hold the mirror alive until this is called.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    async fn run_watch(
        self: Arc<Self>,
        kind: ResourceKind,
        synced_tx: oneshot::Sender<Result<(), Report<AccessError>>>,
    ) {
        let mut synced_tx = Some(synced_tx);
        loop {
            let result = select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!(kind = %kind, "Cache mirror watch shutdown requested");
                    break;
                }
                result = self.watch_kind(kind, &mut synced_tx) => result,
            };

            match result {
                Ok(()) => {
                    warn!(kind = %kind, "Watch stream ended unexpectedly, restarting...");
                }
                Err(e) => {
                    if let Some(tx) = synced_tx.take() {
                        let report = e.change_context(AccessError::CacheSync {
                            message: format!("initial list of {kind} failed"),
                        });
                        let _ = tx.send(Err(report));
                        return;
                    }
                    error!(kind = %kind, "Watch failed: {e:?}");
                }
            }

            select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }
    }

    async fn watch_kind(
        &self,
        kind: ResourceKind,
        synced_tx: &mut Option<oneshot::Sender<Result<(), Report<AccessError>>>>,
    ) -> Result<(), Report<ClusterError>> {
        let mut stream = self.client.watch(kind).await?;
        while let Some(event) = stream.next().await {
            match event? {
                Event::Applied(object) => self.on_update(kind, object),
                Event::Deleted(object) => self.on_delete(kind, &object),
                Event::Restarted(objects) => {
                    debug!(kind = %kind, count = objects.len(), "Watch (re)listed objects");
                    self.replace(kind, objects);
                    if let Some(tx) = synced_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
            }
        }
        Ok(())
    }

    fn with_store(&self, kind: ResourceKind, apply: impl FnOnce(&mut KindStore)) {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        match stores.get_mut(&kind) {
            Some(store) => apply(store),
            None => warn!(kind = %kind, "dropping event for a kind that is not mirrored"),
        }
    }

    pub fn on_add(&self, kind: ResourceKind, object: DynamicObject) {
        self.with_store(kind, |store| store.upsert(object));
    }

    pub fn on_update(&self, kind: ResourceKind, object: DynamicObject) {
        self.with_store(kind, |store| store.upsert(object));
    }

    pub fn on_delete(&self, kind: ResourceKind, object: &DynamicObject) {
        let key = ObjectKey::of(object);
        self.with_store(kind, |store| store.remove(&key));
    }

    /// Replaces the whole store of `kind`, as after a relist.
    pub fn replace(&self, kind: ResourceKind, objects: Vec<DynamicObject>) {
        self.with_store(kind, |store| store.replace_all(objects));
    }

    /// # Errors
    ///
    /// - [`AccessError::CacheSync`] if `kind` is not mirrored
    pub fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<DynamicObject>, Report<AccessError>> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let store = stores.get(&kind).ok_or_else(|| not_mirrored(kind))?;
        let namespace = namespace.filter(|ns| !ns.is_empty() && kind.is_namespaced());

        let mut objects: Vec<DynamicObject> = store
            .candidates(query)
            .filter(|object| {
                namespace.map_or(true, |ns| object.metadata.namespace.as_deref() == Some(ns))
            })
            .filter(|object| query.matches(object))
            .cloned()
            .collect();
        objects.sort_by_key(ObjectKey::of);
        Ok(objects)
    }

    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the object is not in the mirror
    /// - [`AccessError::CacheSync`] if `kind` is not mirrored
    pub fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<AccessError>> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let store = stores.get(&kind).ok_or_else(|| not_mirrored(kind))?;
        let key = ObjectKey {
            namespace: if kind.is_namespaced() {
                namespace.unwrap_or_default().to_string()
            } else {
                String::new()
            },
            name: name.to_string(),
        };
        store
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Report::new(AccessError::not_found(kind, namespace, name)))
    }
}

fn not_mirrored(kind: ResourceKind) -> Report<AccessError> {
    Report::new(AccessError::CacheSync {
        message: format!("{kind} is not mirrored"),
    })
}
