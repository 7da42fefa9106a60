mod error;
mod store;
mod types;

pub use error::MetadataError;
pub use store::{MetadataStore, ReadTxn, WriteTxn};
pub use types::{Kind, Record};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn open_store() -> (MetadataStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path().join("metadata.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn create_then_get() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        let record = txn
            .create_snapshot(Kind::Active, "a", None, BTreeMap::new())
            .unwrap();
        assert_eq!(record.id, 1);
        txn.commit().unwrap();

        let read = store.begin_read().unwrap();
        let fetched = read.get_info("a").unwrap();
        assert_eq!(fetched.key, "a");
        assert_eq!(fetched.kind, Kind::Active);
    }

    #[test]
    fn duplicate_key_rejected() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        txn.create_snapshot(Kind::Active, "a", None, BTreeMap::new())
            .unwrap();
        let err = txn.create_snapshot(Kind::Active, "a", None, BTreeMap::new());
        assert!(matches!(err, Err(MetadataError::AlreadyExists(_))));
    }

    #[test]
    fn parent_must_be_committed() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        txn.create_snapshot(Kind::Active, "a", None, BTreeMap::new())
            .unwrap();
        let err = txn.create_snapshot(Kind::Active, "b", Some("a"), BTreeMap::new());
        assert!(matches!(err, Err(MetadataError::ParentNotCommitted(_))));
    }

    #[test]
    fn commit_promotes_and_removes_old_key() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        txn.create_snapshot(Kind::Active, "a-active", None, BTreeMap::new())
            .unwrap();
        let committed = txn
            .commit_snapshot("a", "a-active", BTreeMap::new())
            .unwrap();
        assert_eq!(committed.kind, Kind::Committed);
        assert!(txn.get_info("a-active").is_err());
        txn.commit().unwrap();
    }

    #[test]
    fn remove_with_dependents_is_rejected() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        txn.create_snapshot(Kind::Active, "a-active", None, BTreeMap::new())
            .unwrap();
        txn.commit_snapshot("a", "a-active", BTreeMap::new())
            .unwrap();
        txn.create_snapshot(Kind::Active, "b", Some("a"), BTreeMap::new())
            .unwrap();
        txn.commit().unwrap();

        let txn2 = store.begin_write().unwrap();
        let err = txn2.remove("a");
        assert!(matches!(err, Err(MetadataError::InvalidState { .. })));
    }

    #[test]
    fn parent_chain_walks_to_root() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        txn.create_snapshot(Kind::Active, "l1-active", None, BTreeMap::new())
            .unwrap();
        txn.commit_snapshot("l1", "l1-active", BTreeMap::new())
            .unwrap();
        txn.create_snapshot(Kind::Active, "l2-active", Some("l1"), BTreeMap::new())
            .unwrap();
        txn.commit_snapshot("l2", "l2-active", BTreeMap::new())
            .unwrap();
        let (id, parents) = txn.get_snapshot("l2").unwrap();
        assert_eq!(id, 2);
        assert_eq!(parents, vec![1]);
        txn.commit().unwrap();
    }

    #[test]
    fn update_with_field_mask_merges_single_label() {
        let (store, _dir) = open_store();
        let txn = store.begin_write().unwrap();
        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), "1".to_string());
        labels.insert("b".to_string(), "2".to_string());
        txn.create_snapshot(Kind::Active, "k", None, labels).unwrap();

        let mut update = BTreeMap::new();
        update.insert("a".to_string(), "99".to_string());
        let record = txn
            .update("k", update, Some(&["labels.a".to_string()]))
            .unwrap();
        assert_eq!(record.labels.get("a"), Some(&"99".to_string()));
        assert_eq!(record.labels.get("b"), Some(&"2".to_string()));
        txn.commit().unwrap();
    }
}
