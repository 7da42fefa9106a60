use crate::error::MetadataError;
use crate::types::{Kind, Record, now};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;

const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
const IDS: TableDefinition<u64, &str> = TableDefinition::new("ids");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_ID_KEY: &str = "next_id";

fn encode(record: &Record) -> Result<Vec<u8>, MetadataError> {
    Ok(serde_json::to_vec(record)?)
}

fn decode(bytes: &[u8]) -> Result<Record, MetadataError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Embedded, crash-consistent metadata store: one writer, many readers, strict serialisable
/// transactions. Backed by `redb`, a pure-Rust single-file ACID store.
pub struct MetadataStore {
    db: Database,
}

impl MetadataStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let db = Database::create(path.as_ref())?;
        // touch every table once so readers never hit a "table does not exist" error.
        let txn = db.begin_write()?;
        {
            txn.open_table(SNAPSHOTS)?;
            txn.open_table(IDS)?;
            let mut counters = txn.open_table(COUNTERS)?;
            if counters.get(NEXT_ID_KEY)?.is_none() {
                counters.insert(NEXT_ID_KEY, 1u64)?;
            }
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn begin_write(&self) -> Result<WriteTxn, MetadataError> {
        Ok(WriteTxn { inner: self.db.begin_write()? })
    }

    pub fn begin_read(&self) -> Result<ReadTxn, MetadataError> {
        Ok(ReadTxn { inner: self.db.begin_read()? })
    }
}

pub struct WriteTxn {
    inner: redb::WriteTransaction,
}

impl WriteTxn {
    pub fn get_info(&self, key: &str) -> Result<Record, MetadataError> {
        let table = self.inner.open_table(SNAPSHOTS)?;
        let bytes = table
            .get(key)?
            .ok_or_else(|| MetadataError::NotFound(key.to_string()))?;
        decode(bytes.value())
    }

    /// Returns the snapshot's id and the ids of its ancestor chain, nearest-first.
    pub fn get_snapshot(&self, key: &str) -> Result<(u64, Vec<u64>), MetadataError> {
        let table = self.inner.open_table(SNAPSHOTS)?;
        let record = {
            let bytes = table
                .get(key)?
                .ok_or_else(|| MetadataError::NotFound(key.to_string()))?;
            decode(bytes.value())?
        };
        let mut parent_ids = Vec::new();
        let mut current = record.parent.clone();
        while let Some(k) = current {
            let bytes = table
                .get(k.as_str())?
                .ok_or_else(|| MetadataError::NotFound(k.clone()))?;
            let parent_record = decode(bytes.value())?;
            parent_ids.push(parent_record.id);
            current = parent_record.parent.clone();
        }
        Ok((record.id, parent_ids))
    }

    pub fn create_snapshot(
        &self,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Record, MetadataError> {
        let mut snapshots = self.inner.open_table(SNAPSHOTS)?;
        let mut ids = self.inner.open_table(IDS)?;
        let mut counters = self.inner.open_table(COUNTERS)?;

        if snapshots.get(key)?.is_some() {
            return Err(MetadataError::AlreadyExists(key.to_string()));
        }

        if let Some(p) = parent {
            let bytes = snapshots
                .get(p)?
                .ok_or_else(|| MetadataError::ParentNotFound(p.to_string()))?;
            let parent_record = decode(bytes.value())?;
            if parent_record.kind != Kind::Committed {
                return Err(MetadataError::ParentNotCommitted(p.to_string()));
            }
        }

        let id = counters.get(NEXT_ID_KEY)?.map(|g| g.value()).unwrap_or(1);
        counters.insert(NEXT_ID_KEY, id + 1)?;

        let ts = now();
        let record = Record {
            id,
            key: key.to_string(),
            parent: parent.map(String::from),
            kind,
            labels,
            created_at: ts,
            updated_at: ts,
        };

        snapshots.insert(key, encode(&record)?.as_slice())?;
        ids.insert(id, key)?;

        Ok(record)
    }

    /// Promotes the `active` snapshot under `old_key` to `committed` under `new_key`.
    pub fn commit_snapshot(
        &self,
        new_key: &str,
        old_key: &str,
        extra_labels: BTreeMap<String, String>,
    ) -> Result<Record, MetadataError> {
        let mut snapshots = self.inner.open_table(SNAPSHOTS)?;
        let mut ids = self.inner.open_table(IDS)?;

        if snapshots.get(new_key)?.is_some() {
            return Err(MetadataError::AlreadyExists(new_key.to_string()));
        }

        let old_record = {
            let bytes = snapshots
                .get(old_key)?
                .ok_or_else(|| MetadataError::NotFound(old_key.to_string()))?;
            decode(bytes.value())?
        };

        if old_record.kind != Kind::Active {
            return Err(MetadataError::InvalidState {
                expected: "active".to_string(),
                actual: old_record.kind.to_string(),
            });
        }

        snapshots.remove(old_key)?;

        let mut labels = old_record.labels;
        labels.extend(extra_labels);

        let record = Record {
            id: old_record.id,
            key: new_key.to_string(),
            parent: old_record.parent,
            kind: Kind::Committed,
            labels,
            created_at: old_record.created_at,
            updated_at: now(),
        };

        snapshots.insert(new_key, encode(&record)?.as_slice())?;
        ids.insert(record.id, new_key)?;

        Ok(record)
    }

    pub fn update(
        &self,
        key: &str,
        labels: BTreeMap<String, String>,
        field_mask: Option<&[String]>,
    ) -> Result<Record, MetadataError> {
        let mut snapshots = self.inner.open_table(SNAPSHOTS)?;

        let mut record = {
            let bytes = snapshots
                .get(key)?
                .ok_or_else(|| MetadataError::NotFound(key.to_string()))?;
            decode(bytes.value())?
        };

        match field_mask {
            None => record.labels = labels,
            Some(paths) => {
                for path in paths {
                    if let Some(label_key) = path.strip_prefix("labels.") {
                        match labels.get(label_key) {
                            Some(v) => {
                                record.labels.insert(label_key.to_string(), v.clone());
                            }
                            None => {
                                record.labels.remove(label_key);
                            }
                        }
                    }
                }
            }
        }
        record.updated_at = now();

        snapshots.insert(key, encode(&record)?.as_slice())?;
        Ok(record)
    }

    /// Removes a snapshot's metadata record, refusing if other live records still name it
    /// as their parent. Returns the removed id.
    pub fn remove(&self, key: &str) -> Result<u64, MetadataError> {
        let mut snapshots = self.inner.open_table(SNAPSHOTS)?;
        let mut ids = self.inner.open_table(IDS)?;

        let record = {
            let bytes = snapshots
                .get(key)?
                .ok_or_else(|| MetadataError::NotFound(key.to_string()))?;
            decode(bytes.value())?
        };

        let has_dependents = {
            let mut iter = snapshots.iter()?;
            let mut found = false;
            while let Some(entry) = iter.next() {
                let (_, v) = entry?;
                let other = decode(v.value())?;
                if other.parent.as_deref() == Some(key) {
                    found = true;
                    break;
                }
            }
            found
        };
        if has_dependents {
            return Err(MetadataError::InvalidState {
                expected: "no dependents".to_string(),
                actual: "has dependents".to_string(),
            });
        }

        snapshots.remove(key)?;
        ids.remove(record.id)?;

        Ok(record.id)
    }

    pub fn id_map(&self) -> Result<BTreeMap<u64, String>, MetadataError> {
        let ids = self.inner.open_table(IDS)?;
        let mut map = BTreeMap::new();
        let mut iter = ids.iter()?;
        while let Some(entry) = iter.next() {
            let (k, v) = entry?;
            map.insert(k.value(), v.value().to_string());
        }
        Ok(map)
    }

    pub fn list(&self, parent_filter: Option<&str>) -> Result<Vec<Record>, MetadataError> {
        let snapshots = self.inner.open_table(SNAPSHOTS)?;
        let mut out = Vec::new();
        let mut iter = snapshots.iter()?;
        while let Some(entry) = iter.next() {
            let (_, v) = entry?;
            let record = decode(v.value())?;
            if parent_filter
                .map(|p| record.parent.as_deref() == Some(p))
                .unwrap_or(true)
            {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn commit(self) -> Result<(), MetadataError> {
        self.inner.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), MetadataError> {
        self.inner.abort()?;
        Ok(())
    }
}

pub struct ReadTxn {
    inner: redb::ReadTransaction,
}

impl ReadTxn {
    pub fn get_info(&self, key: &str) -> Result<Record, MetadataError> {
        let table = self.inner.open_table(SNAPSHOTS)?;
        let bytes = table
            .get(key)?
            .ok_or_else(|| MetadataError::NotFound(key.to_string()))?;
        decode(bytes.value())
    }

    pub fn get_snapshot(&self, key: &str) -> Result<(u64, Vec<u64>), MetadataError> {
        let table = self.inner.open_table(SNAPSHOTS)?;
        let record = {
            let bytes = table
                .get(key)?
                .ok_or_else(|| MetadataError::NotFound(key.to_string()))?;
            decode(bytes.value())?
        };
        let mut parent_ids = Vec::new();
        let mut current = record.parent.clone();
        while let Some(k) = current {
            let bytes = table
                .get(k.as_str())?
                .ok_or_else(|| MetadataError::NotFound(k.clone()))?;
            let parent_record = decode(bytes.value())?;
            parent_ids.push(parent_record.id);
            current = parent_record.parent.clone();
        }
        Ok((record.id, parent_ids))
    }

    pub fn id_map(&self) -> Result<BTreeMap<u64, String>, MetadataError> {
        let ids = self.inner.open_table(IDS)?;
        let mut map = BTreeMap::new();
        let mut iter = ids.iter()?;
        while let Some(entry) = iter.next() {
            let (k, v) = entry?;
            map.insert(k.value(), v.value().to_string());
        }
        Ok(map)
    }

    pub fn list(&self, parent_filter: Option<&str>) -> Result<Vec<Record>, MetadataError> {
        let snapshots = self.inner.open_table(SNAPSHOTS)?;
        let mut out = Vec::new();
        let mut iter = snapshots.iter()?;
        while let Some(entry) = iter.next() {
            let (_, v) = entry?;
            let record = decode(v.value())?;
            if parent_filter
                .map(|p| record.parent.as_deref() == Some(p))
                .unwrap_or(true)
            {
                out.push(record);
            }
        }
        Ok(out)
    }
}
