use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{Error, Note, NoteStore, Sign, VisitOutcome};

/// In-memory store for tests and throwaway servers.
///
/// One mutex guards the whole map, so every operation is linearizable
/// within the process. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    notes: Mutex<HashMap<Sign, Note>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notes(&self) -> Result<MutexGuard<'_, HashMap<Sign, Note>>, Error> {
        self.notes
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait::async_trait]
impl NoteStore for MemoryStore {
    async fn insert_if_absent(&self, note: &Note) -> Result<bool, Error> {
        let mut notes = self.notes()?;
        if notes.contains_key(&note.sign) {
            return Ok(false);
        }
        notes.insert(note.sign.clone(), note.clone());
        Ok(true)
    }

    async fn contains(&self, sign: &Sign) -> Result<bool, Error> {
        Ok(self.notes()?.contains_key(sign))
    }

    async fn get(&self, sign: &Sign) -> Result<Option<Note>, Error> {
        Ok(self.notes()?.get(sign).cloned())
    }

    async fn record_visit(&self, sign: &Sign) -> Result<VisitOutcome, Error> {
        let mut notes = self.notes()?;
        let Some(mut note) = notes.remove(sign) else {
            return Ok(VisitOutcome::Missing);
        };

        if note.consume_visit() {
            Ok(VisitOutcome::Deleted(note))
        } else {
            notes.insert(sign.clone(), note.clone());
            Ok(VisitOutcome::Visited(note))
        }
    }

    async fn delete(&self, sign: &Sign) -> Result<bool, Error> {
        Ok(self.notes()?.remove(sign).is_some())
    }

    async fn count(&self) -> Result<u64, Error> {
        Ok(self.notes()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentType;
    use std::sync::Arc;

    fn note(sign: &str, max_number_visits: Option<u32>) -> Note {
        Note {
            sign: Sign::parse(&sign.repeat(43)).unwrap(),
            name: "note".into(),
            content_type: ContentType::Text,
            max_number_visits,
            current_number_visits: 0,
            encryption: None,
            text: b"body".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryStore::new();
        let n = note("a", None);

        assert!(store.insert_if_absent(&n).await.unwrap());
        assert!(!store.insert_if_absent(&n).await.unwrap());
        assert!(store.contains(&n.sign).await.unwrap());
        assert_eq!(store.get(&n.sign).await.unwrap(), Some(n));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_visit_until_deleted() {
        let store = MemoryStore::new();
        let n = note("b", Some(2));
        store.insert_if_absent(&n).await.unwrap();

        match store.record_visit(&n.sign).await.unwrap() {
            VisitOutcome::Visited(updated) => assert_eq!(updated.current_number_visits, 1),
            other => panic!("expected Visited, got {:?}", other),
        }
        match store.record_visit(&n.sign).await.unwrap() {
            VisitOutcome::Deleted(last) => assert_eq!(last.current_number_visits, 2),
            other => panic!("expected Deleted, got {:?}", other),
        }
        assert_eq!(store.record_visit(&n.sign).await.unwrap(), VisitOutcome::Missing);
        assert!(store.get(&n.sign).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        let n = note("c", None);
        store.insert_if_absent(&n).await.unwrap();

        assert!(store.delete(&n.sign).await.unwrap());
        assert!(!store.delete(&n.sign).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_visits_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let n = note("d", Some(1));
        store.insert_if_absent(&n).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let sign = n.sign.clone();
                tokio::spawn(async move { store.record_visit(&sign).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() != VisitOutcome::Missing {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
