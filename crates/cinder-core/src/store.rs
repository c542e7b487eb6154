use std::sync::Arc;

use crate::{Error, Note, Sign};

/// Result of consuming one visit of a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Counter incremented, the note is still live.
    Visited(Note),
    /// Counter reached the limit and the note was removed in the same step.
    Deleted(Note),
    /// No live note with that sign (never existed, or already burned).
    Missing,
}

/// Storage abstraction shared by the SQLite, files and memory backends.
///
/// `insert_if_absent` and `record_visit` must each be a single atomic unit:
/// two concurrent callers can never both insert the same sign, and two
/// concurrent visits of a note with one read left can never both succeed.
/// Transient contention is reported as `Error::Conflict`.
#[async_trait::async_trait]
pub trait NoteStore: Send + Sync {
    /// Store a new note. Returns false if the sign is already held.
    async fn insert_if_absent(&self, note: &Note) -> Result<bool, Error>;

    /// Whether a live note holds this sign.
    async fn contains(&self, sign: &Sign) -> Result<bool, Error>;

    /// Get a note by sign.
    async fn get(&self, sign: &Sign) -> Result<Option<Note>, Error>;

    /// Increment the visit counter and delete the note if it reached its
    /// limit.
    async fn record_visit(&self, sign: &Sign) -> Result<VisitOutcome, Error>;

    /// Delete a note by sign. Returns true if deleted, false if not found.
    async fn delete(&self, sign: &Sign) -> Result<bool, Error>;

    /// Number of live notes.
    async fn count(&self) -> Result<u64, Error>;
}

macro_rules! forward_note_store {
    ($wrapper:ident) => {
        #[async_trait::async_trait]
        impl<T: NoteStore + ?Sized> NoteStore for $wrapper<T> {
            async fn insert_if_absent(&self, note: &Note) -> Result<bool, Error> {
                (**self).insert_if_absent(note).await
            }

            async fn contains(&self, sign: &Sign) -> Result<bool, Error> {
                (**self).contains(sign).await
            }

            async fn get(&self, sign: &Sign) -> Result<Option<Note>, Error> {
                (**self).get(sign).await
            }

            async fn record_visit(&self, sign: &Sign) -> Result<VisitOutcome, Error> {
                (**self).record_visit(sign).await
            }

            async fn delete(&self, sign: &Sign) -> Result<bool, Error> {
                (**self).delete(sign).await
            }

            async fn count(&self) -> Result<u64, Error> {
                (**self).count().await
            }
        }
    };
}

forward_note_store!(Box);
forward_note_store!(Arc);
