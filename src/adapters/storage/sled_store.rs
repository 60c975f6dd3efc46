use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::application::ports::{DetectionSink, DetectionStore};
use crate::domain::detection::{Container, DetectionRecord, StoredObject};
use crate::domain::errors::{DomainResult, PipelineError};

pub const DEFAULT_PENDING_CAPACITY: usize = 10_000;

const OBJECTS_TREE: &str = "objects";
const BY_TIME_TREE: &str = "objects_by_time";
const CONTAINERS_TREE: &str = "containers";

fn storage_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::PersistFailure(e.to_string())
}

/// Almacén de detecciones sobre sled.
///
/// `enqueue` solo apila en memoria; `flush` escribe lo pendiente. Claves:
/// - `objects`: `label \0 ts_be id_be` (último por etiqueta = último de su prefijo)
/// - `objects_by_time`: `ts_be id_be` (último instante = última clave)
/// - `containers`: `id_be`
pub struct SledDetectionStore {
    db: sled::Db,
    objects: sled::Tree,
    by_time: sled::Tree,
    containers: sled::Tree,
    pending: Mutex<VecDeque<DetectionRecord>>,
    capacity: usize,
}

impl SledDetectionStore {
    pub fn open(path: impl AsRef<Path>) -> DomainResult<Self> {
        let db = sled::open(path.as_ref()).map_err(storage_err)?;
        Self::with_db(db, DEFAULT_PENDING_CAPACITY)
    }

    /// Base de datos en un directorio temporal que sled borra al cerrarse.
    pub fn temporary(capacity: usize) -> DomainResult<Self> {
        let db = sled::Config::new().temporary(true).open().map_err(storage_err)?;
        Self::with_db(db, capacity)
    }

    fn with_db(db: sled::Db, capacity: usize) -> DomainResult<Self> {
        Ok(Self {
            objects: db.open_tree(OBJECTS_TREE).map_err(storage_err)?,
            by_time: db.open_tree(BY_TIME_TREE).map_err(storage_err)?,
            containers: db.open_tree(CONTAINERS_TREE).map_err(storage_err)?,
            db,
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        })
    }

    fn write_record(&self, record: &DetectionRecord) -> DomainResult<()> {
        let id = self.db.generate_id().map_err(storage_err)?;
        let ts = record.detection_time.timestamp_micros().max(0) as u64;
        let value = serde_json::to_vec(record).map_err(storage_err)?;

        let mut time_key = Vec::with_capacity(16);
        time_key.extend_from_slice(&ts.to_be_bytes());
        time_key.extend_from_slice(&id.to_be_bytes());

        let mut object_key = label_prefix(&record.label);
        object_key.extend_from_slice(&time_key);

        self.objects.insert(object_key, value.clone()).map_err(storage_err)?;
        self.by_time.insert(time_key, value).map_err(storage_err)?;
        Ok(())
    }

    fn decode(&self, raw: &[u8]) -> DomainResult<StoredObject> {
        let record: DetectionRecord = serde_json::from_slice(raw).map_err(storage_err)?;
        let container = match record.container_reference {
            Some(id) => self.container(id)?,
            None => None,
        };
        Ok(StoredObject { record, container })
    }

    pub fn container(&self, id: u64) -> DomainResult<Option<Container>> {
        self.containers
            .get(&id.to_be_bytes()[..])
            .map_err(storage_err)?
            .map(|raw| serde_json::from_slice(&raw).map_err(storage_err))
            .transpose()
    }
}

fn label_prefix(label: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(label.len() + 17);
    key.extend_from_slice(label.as_bytes());
    key.push(0);
    key
}

impl DetectionSink for SledDetectionStore {
    fn enqueue(&self, record: DetectionRecord) -> DomainResult<()> {
        let mut pending = self.pending.lock();
        pending.push_back(record);
        if pending.len() > self.capacity {
            pending.pop_front();
            warn!(capacity = self.capacity, "cola de detecciones llena; se descarta la más antigua");
        }
        Ok(())
    }
}

impl DetectionStore for SledDetectionStore {
    fn flush(&self) -> DomainResult<usize> {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for record in &batch {
            match self.write_record(record) {
                Ok(()) => written += 1,
                Err(e) => warn!(label = %record.label, error = %e, "no se pudo guardar el registro"),
            }
        }
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "sled flush");
        }
        debug!(written, total = batch.len(), "volcado a sled");
        Ok(written)
    }

    fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn query_latest(&self, name: &str) -> DomainResult<Option<StoredObject>> {
        match self.objects.scan_prefix(label_prefix(name)).next_back() {
            Some(entry) => {
                let (_, raw) = entry.map_err(storage_err)?;
                self.decode(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    fn query_all_at_latest_timestamp(&self) -> DomainResult<Vec<StoredObject>> {
        let Some((last_key, _)) = self.by_time.last().map_err(storage_err)? else {
            return Ok(Vec::new());
        };
        let ts_prefix = last_key.get(..8).ok_or_else(|| storage_err("clave temporal corrupta"))?;
        self.by_time
            .scan_prefix(ts_prefix)
            .map(|entry| {
                let (_, raw) = entry.map_err(storage_err)?;
                self.decode(&raw)
            })
            .collect()
    }

    fn register_container(
        &self,
        name: &str,
        position: Option<String>,
        photo_path: Option<PathBuf>,
    ) -> DomainResult<Container> {
        let container = Container {
            id: self.db.generate_id().map_err(storage_err)?,
            name: name.to_string(),
            position,
            photo_path,
        };
        let value = serde_json::to_vec(&container).map_err(storage_err)?;
        self.containers
            .insert(&container.id.to_be_bytes()[..], value)
            .map_err(storage_err)?;
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(label: &str, secs: i64) -> DetectionRecord {
        DetectionRecord {
            label: label.into(),
            confidence: 0.7,
            detection_time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            bounding_box: [1.0, 2.0, 3.0, 4.0],
            photo_path: None,
            container_reference: None,
        }
    }

    #[test]
    fn enqueue_does_not_write_until_flush() {
        let store = SledDetectionStore::temporary(100).unwrap();
        store.enqueue(record("cup", 0)).unwrap();
        assert_eq!(store.pending(), 1);
        assert!(store.query_latest("cup").unwrap().is_none());

        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(store.pending(), 0);
        assert!(store.query_latest("cup").unwrap().is_some());
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let store = SledDetectionStore::temporary(2).unwrap();
        for (i, label) in ["cup", "bottle", "person"].into_iter().enumerate() {
            store.enqueue(record(label, i as i64)).unwrap();
        }
        assert_eq!(store.pending(), 2);
        assert_eq!(store.flush().unwrap(), 2);
        assert!(store.query_latest("cup").unwrap().is_none());
        assert!(store.query_latest("person").unwrap().is_some());
    }

    #[test]
    fn latest_is_per_label_and_not_confused_by_prefixes() {
        let store = SledDetectionStore::temporary(100).unwrap();
        store.enqueue(record("cup", 5)).unwrap();
        store.enqueue(record("cup", 1)).unwrap();
        store.enqueue(record("cupboard", 9)).unwrap();
        store.flush().unwrap();

        let cup = store.query_latest("cup").unwrap().unwrap();
        assert_eq!(cup.record.label, "cup");
        assert_eq!(cup.record.detection_time, record("cup", 5).detection_time);
        assert!(store.query_latest("person").unwrap().is_none());
    }

    #[test]
    fn all_at_latest_timestamp_groups_one_frame() {
        let store = SledDetectionStore::temporary(100).unwrap();
        store.enqueue(record("cup", 1)).unwrap();
        store.enqueue(record("cup", 2)).unwrap();
        store.enqueue(record("person", 2)).unwrap();
        store.flush().unwrap();

        let mut labels: Vec<_> = store
            .query_all_at_latest_timestamp()
            .unwrap()
            .into_iter()
            .map(|o| o.record.label)
            .collect();
        labels.sort();
        assert_eq!(labels, ["cup", "person"]);
    }

    #[test]
    fn containers_are_joined_on_read() {
        let store = SledDetectionStore::temporary(100).unwrap();
        let shelf = store.register_container("shelf", Some("A3".into()), None).unwrap();
        let mut r = record("cup", 0);
        r.container_reference = Some(shelf.id);
        store.enqueue(r).unwrap();
        store.flush().unwrap();

        let stored = store.query_latest("cup").unwrap().unwrap();
        assert_eq!(stored.container, Some(shelf));
    }

    #[test]
    fn empty_store_queries() {
        let store = SledDetectionStore::temporary(100).unwrap();
        assert_eq!(store.flush().unwrap(), 0);
        assert!(store.query_all_at_latest_timestamp().unwrap().is_empty());
    }
}
