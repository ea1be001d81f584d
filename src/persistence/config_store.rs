//! # Config Store - Last Known Bus Topology
//!
//! Owns the most recent [`Topology`] received from the gateway. The snapshot lives
//! behind an `Arc` that is swapped as a whole on every update, so readers either see
//! the previous snapshot or the new one, never a mix.
//!
//! ## Durable Layout
//!
//! ```text
//! <data_dir>/
//! ├── qbusconfig.json         - normalized snapshot, read back on start-up
//! └── qbusconfig.source.json  - verbatim bytes of the last topology message
//! ```
//!
//! Both files are overwritten in full on every save.
//!
//! ## Entity Traversal
//!
//! Entities do not point back at their controller. [`EntityRef`] carries the snapshot
//! plus two indices and joins entity and controller on access.

use super::{Controller, Entity, Topology};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const CONFIG_FILE: &str = "qbusconfig.json";
const SOURCE_FILE: &str = "qbusconfig.source.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored topology {path} is invalid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize topology: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Cached, disk-backed topology snapshot.
#[derive(Debug)]
pub struct ConfigStore {
    data_dir: PathBuf,
    current: RwLock<Option<Arc<Topology>>>,
}

impl ConfigStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            current: RwLock::new(None),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn source_path(&self) -> PathBuf {
        self.data_dir.join(SOURCE_FILE)
    }

    /// Persists `raw` and the normalized `topology`, then replaces the cache.
    ///
    /// The cache is replaced even when writing to disk fails; the returned error only
    /// reports the lost durability.
    pub async fn save(&self, raw: &[u8], topology: Topology) -> Result<Arc<Topology>, StoreError> {
        let topology = Arc::new(topology);
        let persisted = self.persist(raw, &topology).await;

        *self.current.write().await = Some(topology.clone());
        debug!(
            "Topology cache replaced ({} controllers, {} entities)",
            topology.devices.len(),
            topology.entity_count()
        );

        persisted.map(|_| topology)
    }

    async fn persist(&self, raw: &[u8], topology: &Topology) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|source| StoreError::Write {
                path: self.data_dir.clone(),
                source,
            })?;

        let normalized = serde_json::to_vec(topology)?;

        let config_path = self.config_path();
        tokio::fs::write(&config_path, normalized)
            .await
            .map_err(|source| StoreError::Write {
                path: config_path.clone(),
                source,
            })?;

        let source_path = self.source_path();
        tokio::fs::write(&source_path, raw)
            .await
            .map_err(|source| StoreError::Write {
                path: source_path.clone(),
                source,
            })?;

        info!("Topology saved to {}", config_path.display());
        Ok(())
    }

    /// Returns the cached snapshot, reading it from disk on first use.
    ///
    /// `Ok(None)` when nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<Arc<Topology>>, StoreError> {
        if let Some(topology) = self.current.read().await.as_ref() {
            return Ok(Some(topology.clone()));
        }

        let mut guard = self.current.write().await;
        // Another reader may have filled the cache while we waited for the lock
        if let Some(topology) = guard.as_ref() {
            return Ok(Some(topology.clone()));
        }

        let path = self.config_path();
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No stored topology at {}, continuing without entities",
                    path.display()
                );
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let topology: Topology = serde_json::from_slice(&content)
            .map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?;

        info!(
            "Loaded stored topology from {} ({} entities)",
            path.display(),
            topology.entity_count()
        );
        let topology = Arc::new(topology);
        *guard = Some(topology.clone());
        Ok(Some(topology))
    }

    /// Every entity, controller by controller.
    pub async fn entities(&self) -> Result<impl Iterator<Item = EntityRef>, StoreError> {
        let snapshot = self.load().await?;
        Ok(EntityIter::new(snapshot))
    }

    /// Every entity together with the controller hosting it.
    pub async fn entities_with_controller(
        &self,
    ) -> Result<impl Iterator<Item = (EntityRef, ControllerRef)>, StoreError> {
        let snapshot = self.load().await?;
        Ok(EntityIter::new(snapshot).map(|entity| {
            let controller = entity.controller();
            (entity, controller)
        }))
    }

    pub async fn find_entity_by_id(&self, id: &str) -> Result<Option<EntityRef>, StoreError> {
        Ok(self.entities().await?.find(|entity| entity.id == id))
    }
}

/// Entity inside a snapshot, addressed by controller and entity index.
#[derive(Clone, Debug)]
pub struct EntityRef {
    topology: Arc<Topology>,
    controller: usize,
    entity: usize,
}

impl EntityRef {
    pub fn controller(&self) -> ControllerRef {
        ControllerRef {
            topology: self.topology.clone(),
            controller: self.controller,
        }
    }
}

impl Deref for EntityRef {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.topology.devices[self.controller].function_blocks[self.entity]
    }
}

/// Controller inside a snapshot.
#[derive(Clone, Debug)]
pub struct ControllerRef {
    topology: Arc<Topology>,
    controller: usize,
}

impl Deref for ControllerRef {
    type Target = Controller;

    fn deref(&self) -> &Controller {
        &self.topology.devices[self.controller]
    }
}

struct EntityIter {
    topology: Option<Arc<Topology>>,
    controller: usize,
    entity: usize,
}

impl EntityIter {
    fn new(topology: Option<Arc<Topology>>) -> Self {
        Self {
            topology,
            controller: 0,
            entity: 0,
        }
    }
}

impl Iterator for EntityIter {
    type Item = EntityRef;

    fn next(&mut self) -> Option<EntityRef> {
        let topology = self.topology.as_ref()?;

        while let Some(controller) = topology.devices.get(self.controller) {
            if self.entity < controller.function_blocks.len() {
                let item = EntityRef {
                    topology: topology.clone(),
                    controller: self.controller,
                    entity: self.entity,
                };
                self.entity += 1;
                return Some(item);
            }
            self.controller += 1;
            self.entity = 0;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{controller, entity};

    fn sample() -> Topology {
        Topology {
            app: Some("qbus".to_string()),
            version: Some("1.0".to_string()),
            devices: vec![
                controller("UL1", vec![entity("UL10", "onoff", "1/10"), entity("UL11", "thermo", "1/11")]),
                controller("UL2", vec![]),
                controller("UL3", vec![entity("UL30", "analog", "3/30")]),
            ],
        }
    }

    #[tokio::test]
    async fn save_then_fresh_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let topology = sample();

        store.save(b"{\"raw\":true}", topology.clone()).await.unwrap();

        let fresh = ConfigStore::new(dir.path());
        let loaded = fresh.load().await.unwrap().unwrap();
        assert_eq!(*loaded, topology);

        let source = std::fs::read(fresh.source_path()).unwrap();
        assert_eq!(source, b"{\"raw\":true}");
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());

        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.entities().await.unwrap().count(), 0);
        assert!(store.find_entity_by_id("UL10").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), b"{ not json").unwrap();
        let store = ConfigStore::new(dir.path());

        assert!(matches!(store.load().await, Err(StoreError::Parse { .. })));
    }

    #[tokio::test]
    async fn iteration_is_controller_then_entity_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save(b"{}", sample()).await.unwrap();

        let ids: Vec<String> = store.entities().await.unwrap().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["UL10", "UL11", "UL30"]);

        let pairs: Vec<(String, String)> = store
            .entities_with_controller()
            .await
            .unwrap()
            .map(|(e, c)| (e.id.clone(), c.id.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("UL10".to_string(), "UL1".to_string()),
                ("UL11".to_string(), "UL1".to_string()),
                ("UL30".to_string(), "UL3".to_string()),
            ]
        );

        // Restartable: a second traversal sees the same sequence
        assert_eq!(store.entities().await.unwrap().count(), 3);
    }

    #[tokio::test]
    async fn save_replaces_the_snapshot_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save(b"{}", sample()).await.unwrap();

        let held = store.entities().await.unwrap();

        let replacement = Topology {
            devices: vec![controller("UL9", vec![entity("UL90", "scene", "9/90")])],
            ..Topology::default()
        };
        store.save(b"{}", replacement).await.unwrap();

        // Iterators created earlier keep reading the snapshot they started with
        assert_eq!(held.count(), 3);
        let found = store.find_entity_by_id("UL90").await.unwrap().unwrap();
        assert_eq!(found.kind, "scene");
        assert_eq!(found.controller().id, "UL9");
        assert!(store.find_entity_by_id("UL10").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_persist_still_updates_cache() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let store = ConfigStore::new(&blocker);

        let result = store.save(b"{}", sample()).await;
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(store.entities().await.unwrap().count(), 3);
    }
}
