use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    DeadLetter, DurableRecord, MasteryRecord, PersistenceError, QValueRecord, RecordFilter,
    RecordStore, StoreSnapshot,
};

/// In-process journal used when no database is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<DurableRecord>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    failing_appends: AtomicU32,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` appends fail with `Unavailable`.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<DurableRecord> {
        self.records.read().clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().clone()
    }

    fn take_failure(&self) -> bool {
        self.failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn append(&self, record: &DurableRecord) -> Result<(), PersistenceError> {
        if self.take_failure() {
            return Err(PersistenceError::Unavailable(
                "injected append failure".to_string(),
            ));
        }

        let mut records = self.records.write();
        if let Some(id) = record.record_id() {
            if records.iter().any(|r| r.record_id().as_deref() == Some(id.as_str())) {
                return Ok(());
            }
        }
        records.push(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<DurableRecord>, PersistenceError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.matches(filter))
            .cloned()
            .collect())
    }

    async fn dead_letter(
        &self,
        record: &DurableRecord,
        reason: &str,
    ) -> Result<(), PersistenceError> {
        self.dead_letters.write().push(DeadLetter {
            record: record.clone(),
            reason: reason.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<StoreSnapshot, PersistenceError> {
        let mut q_values: HashMap<(String, String), QValueRecord> = HashMap::new();
        let mut mastery: HashMap<(String, String), MasteryRecord> = HashMap::new();

        // Appends may land out of order; the highest seq per key wins.
        for record in self.records.read().iter() {
            match record {
                DurableRecord::QValue(q) => {
                    let key = (q.state_key.clone(), q.action_key.clone());
                    if q_values.get(&key).map_or(true, |held| q.seq > held.seq) {
                        q_values.insert(key, q.clone());
                    }
                }
                DurableRecord::Mastery(m) => {
                    let key = (m.user_id.clone(), m.skill_category.clone());
                    if mastery.get(&key).map_or(true, |held| m.seq > held.seq) {
                        mastery.insert(key, m.clone());
                    }
                }
                _ => {}
            }
        }

        Ok(StoreSnapshot {
            q_values: q_values.into_values().collect(),
            mastery: mastery.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(value: f64, seq: u64) -> DurableRecord {
        DurableRecord::QValue(QValueRecord {
            state_key: "k0_p0_s0".to_string(),
            action_key: "0|THEORY|GUIDED".to_string(),
            value,
            updated_at: seq as i64,
            seq,
        })
    }

    #[tokio::test]
    async fn snapshot_keeps_latest_value_per_key() {
        let store = MemoryRecordStore::new();
        store.append(&q(0.1, 1)).await.unwrap();
        store.append(&q(0.3, 2)).await.unwrap();

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.q_values.len(), 1);
        assert_eq!(snapshot.q_values[0].value, 0.3);
    }

    #[tokio::test]
    async fn late_stale_append_does_not_win_snapshot() {
        let store = MemoryRecordStore::new();
        store.append(&q(0.3, 2)).await.unwrap();
        store.append(&q(0.1, 1)).await.unwrap();

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.q_values.len(), 1);
        assert_eq!(snapshot.q_values[0].seq, 2);
        assert_eq!(snapshot.q_values[0].value, 0.3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryRecordStore::new();
        store.fail_next_appends(1);
        assert!(store.append(&q(0.1, 1)).await.is_err());
        assert!(store.append(&q(0.1, 1)).await.is_ok());
        assert_eq!(store.records().len(), 1);
    }
}
