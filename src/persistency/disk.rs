//! On-disk `PersistencyLayer`.
//!
//! Ported from `original_source/include/qclient/RocksDBPersistency.hh`. The
//! original opens a RocksDB column family; we use `sled` instead (a
//! dependency substitution — see DESIGN.md) but keep the exact same key
//! scheme: item `index` is stored under `b'I' || index.to_be_bytes() || b'\n'`,
//! and the two counters live under the literal keys `START-INDEX` and
//! `END-INDEX`, each an 8-byte big-endian `ItemIndex`.

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::request::ItemIndex;

use super::{deserialize_vec, serialize_vec, PersistencyLayer, QueueItem};

const START_INDEX_KEY: &[u8] = b"START-INDEX";
const END_INDEX_KEY: &[u8] = b"END-INDEX";

fn item_key(index: ItemIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.push(b'I');
    key.extend_from_slice(&index.to_be_bytes());
    key.push(b'\n');
    key
}

fn encode_counter(value: ItemIndex) -> [u8; 8] {
    value.to_be_bytes()
}

fn decode_counter(bytes: &[u8]) -> RedisResult<ItemIndex> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| RedisError::new(ErrorKind::PersistencyCorruption, "malformed counter value"))?;
    Ok(ItemIndex::from_be_bytes(arr))
}

pub struct DiskPersistency {
    db: sled::Db,
}

impl DiskPersistency {
    pub fn open(path: impl AsRef<std::path::Path>) -> RedisResult<Self> {
        let db = sled::open(path)?;
        Ok(DiskPersistency { db })
    }

    fn read_counter(&self, key: &[u8]) -> ItemIndex {
        match self.db.get(key) {
            Ok(Some(bytes)) => decode_counter(&bytes).unwrap_or(0),
            _ => 0,
        }
    }

    fn write_counter(&self, key: &[u8], value: ItemIndex) {
        let _ = self.db.insert(key, &encode_counter(value));
    }
}

impl PersistencyLayer for DiskPersistency {
    fn record_at(&self, index: ItemIndex, item: &QueueItem) {
        let current_end = self.read_counter(END_INDEX_KEY);
        assert_eq!(
            index, current_end,
            "queue corruption: recorded index {} does not match ending index {}",
            index, current_end
        );

        let mut batch = sled::Batch::default();
        batch.insert(item_key(index), serialize_vec(item));
        batch.insert(END_INDEX_KEY, &encode_counter(index + 1));
        self.db.apply_batch(batch).expect("persistency write failed");
    }

    fn record(&self, item: &QueueItem) -> ItemIndex {
        let index = self.read_counter(END_INDEX_KEY);
        self.record_at(index, item);
        index
    }

    fn pop(&self) {
        let start = self.read_counter(START_INDEX_KEY);
        let end = self.read_counter(END_INDEX_KEY);
        assert!(
            start < end,
            "queue corruption: cannot pop, startIndex {} >= endIndex {}",
            start,
            end
        );

        let mut batch = sled::Batch::default();
        batch.remove(item_key(start));
        batch.insert(START_INDEX_KEY, &encode_counter(start + 1));
        self.db.apply_batch(batch).expect("persistency write failed");
    }

    fn pop_index(&self, index: ItemIndex) {
        let _ = self.db.remove(item_key(index));
        let start = self.read_counter(START_INDEX_KEY);
        if index >= start {
            self.write_counter(START_INDEX_KEY, index + 1);
        }
    }

    fn starting_index(&self) -> ItemIndex {
        self.read_counter(START_INDEX_KEY)
    }

    fn ending_index(&self) -> ItemIndex {
        self.read_counter(END_INDEX_KEY)
    }

    fn retrieve(&self, index: ItemIndex) -> Option<QueueItem> {
        match self.db.get(item_key(index)) {
            Ok(Some(bytes)) => Some(deserialize_vec(&bytes)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_and_retrieves_across_handles() {
        let dir = tempdir().unwrap();
        {
            let layer = DiskPersistency::open(dir.path()).unwrap();
            layer.record(&vec![b"SET".to_vec(), b"k".to_vec()]);
            layer.record(&vec![b"GET".to_vec(), b"k".to_vec()]);
        }

        let layer = DiskPersistency::open(dir.path()).unwrap();
        assert_eq!(layer.ending_index(), 2);
        assert_eq!(layer.retrieve(0), Some(vec![b"SET".to_vec(), b"k".to_vec()]));
    }

    #[test]
    fn pop_advances_starting_index_and_removes_item() {
        let dir = tempdir().unwrap();
        let layer = DiskPersistency::open(dir.path()).unwrap();
        layer.record(&vec![b"A".to_vec()]);
        layer.record(&vec![b"B".to_vec()]);

        layer.pop();
        assert_eq!(layer.starting_index(), 1);
        assert_eq!(layer.retrieve(0), None);
        assert_eq!(layer.retrieve(1), Some(vec![b"B".to_vec()]));
    }
}
