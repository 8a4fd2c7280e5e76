use std::sync::{Mutex, MutexGuard};
use crate::ChangeRecord;

/// Arrival-ordered list of records waiting for the next reconciliation pass.
///
/// Ingestion threads append; the reconciler takes the whole batch at the
/// start of a pass. Records pushed while a pass runs stay for the next one.
#[derive(Debug, Default)]
pub struct PendingChangeSet {
    records: Mutex<Vec<ChangeRecord>>,
}

impl PendingChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ChangeRecord) {
        self.lock().push(record);
    }

    /// Take every pending record, leaving the set empty.
    pub fn drain(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ChangeRecord> {
        self.lock().clone()
    }

    // A panic while holding the lock cannot leave a Vec half-updated.
    fn lock(&self) -> MutexGuard<'_, Vec<ChangeRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_preserves_arrival_order_and_duplicates() {
        let set = PendingChangeSet::new();
        set.push(ChangeRecord::changed("a.txt"));
        set.push(ChangeRecord::changed("a.txt"));
        set.push(ChangeRecord::deleted("a.txt"));

        let drained = set.drain();
        assert_eq!(
            drained,
            vec![
                ChangeRecord::changed("a.txt"),
                ChangeRecord::changed("a.txt"),
                ChangeRecord::deleted("a.txt"),
            ]
        );
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_pushes_are_not_lost() {
        let set = Arc::new(PendingChangeSet::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let set = Arc::clone(&set);
                thread::spawn(move || {
                    for i in 0..250 {
                        set.push(ChangeRecord::created(format!("t{}/{}.txt", t, i)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.len(), 2000);
        assert_eq!(set.drain().len(), 2000);
        assert_eq!(set.len(), 0);
    }
}
