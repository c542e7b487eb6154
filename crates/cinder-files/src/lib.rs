//! File-based storage implementation for cinder.
//!
//! One JSON file per live note, named after its sign:
//!
//! ```text
//! .cinder/
//!   .lock                    # Held exclusively by every write
//!   notes/
//!     3q2-7wEjR....json
//! ```
//!
//! Writes go through a temp file and a rename, so readers never see a
//! half-written note. Several processes may share one directory. File
//! access and lock waits run on the blocking thread pool.

use base64ct::{Base64, Encoding};
use cinder_core::{ContentType, Error, Note, NoteStore, Sign, VisitOutcome};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A note as stored on disk. The sign is the file name.
#[derive(Debug, Serialize, Deserialize)]
struct NoteFile {
    name: String,
    #[serde(default)]
    content_type: ContentType,
    #[serde(default)]
    max_number_visits: Option<u32>,
    #[serde(default)]
    current_number_visits: u32,
    #[serde(default)]
    is_encrypted: bool,
    #[serde(default)]
    encrypt_password_hash: Option<String>,
    #[serde(default)]
    encrypt_metadata: Option<String>,
    /// Standard base64, since encrypted text is arbitrary bytes.
    text: String,
}

impl NoteFile {
    fn from_note(note: &Note) -> Self {
        let (encrypt_password_hash, encrypt_metadata) = note.encryption_columns();
        Self {
            name: note.name.clone(),
            content_type: note.content_type,
            max_number_visits: note.max_number_visits,
            current_number_visits: note.current_number_visits,
            is_encrypted: note.is_encrypted(),
            encrypt_password_hash,
            encrypt_metadata,
            text: Base64::encode_string(&note.text),
        }
    }

    fn into_note(self, sign: Sign) -> Result<Note, Error> {
        let text = Base64::decode_vec(&self.text)
            .map_err(|_| Error::Storage(format!("note {} has malformed text", sign.redacted())))?;
        Note::from_parts(
            sign,
            self.name,
            self.content_type,
            self.max_number_visits,
            self.current_number_visits,
            self.is_encrypted,
            self.encrypt_password_hash,
            self.encrypt_metadata,
            text,
        )
    }
}

/// File-based note store.
#[derive(Clone)]
pub struct FilesStore {
    root: PathBuf,
}

impl FilesStore {
    /// Open a store at the given directory, creating it if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("notes"))
            .map_err(|e| Error::Storage(format!("Failed to create notes dir: {}", e)))?;

        Ok(Self { root })
    }

    /// Run `f` against a handle to this store on the blocking thread pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&FilesStore) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| Error::Internal(format!("files task failed: {}", e)))?
    }

    /// Acquire an exclusive lock on the store.
    fn lock(&self) -> Result<FileLock, Error> {
        let lock_path = self.root.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| Error::Storage(format!("Failed to open lock file: {}", e)))?;

        file.lock_exclusive()
            .map_err(|e| Error::Storage(format!("Failed to acquire lock: {}", e)))?;

        Ok(FileLock { file })
    }

    fn note_path(&self, sign: &Sign) -> PathBuf {
        self.root.join("notes").join(format!("{}.json", sign))
    }

    fn read_note(&self, sign: &Sign) -> Result<Option<Note>, Error> {
        let contents = match fs::read_to_string(self.note_path(sign)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Storage(format!("Failed to read note: {}", e))),
        };

        let file: NoteFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("Failed to parse note: {}", e)))?;

        file.into_note(sign.clone()).map(Some)
    }

    /// Write a note file to disk atomically. Caller holds the lock.
    fn write_note(&self, note: &Note) -> Result<(), Error> {
        let path = self.note_path(&note.sign);
        let temp_path = self
            .root
            .join("notes")
            .join(format!("{}.json.tmp", note.sign));

        let contents = serde_json::to_string_pretty(&NoteFile::from_note(note))
            .map_err(|e| Error::Storage(format!("Failed to serialize note: {}", e)))?;

        let mut temp = File::create(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(contents.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to write temp file: {}", e)))?;
        temp.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync temp file: {}", e)))?;

        fs::rename(&temp_path, &path)
            .map_err(|e| Error::Storage(format!("Failed to rename temp file: {}", e)))
    }

    /// Remove a note file. Caller holds the lock.
    fn remove_note(&self, sign: &Sign) -> Result<bool, Error> {
        match fs::remove_file(self.note_path(sign)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(format!("Failed to delete note: {}", e))),
        }
    }
}

/// RAII guard for file locking.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[async_trait::async_trait]
impl NoteStore for FilesStore {
    async fn insert_if_absent(&self, note: &Note) -> Result<bool, Error> {
        let note = note.clone();
        self.blocking(move |store| {
            let _lock = store.lock()?;

            if store.note_path(&note.sign).exists() {
                return Ok(false);
            }
            store.write_note(&note)?;
            Ok(true)
        })
        .await
    }

    async fn contains(&self, sign: &Sign) -> Result<bool, Error> {
        let sign = sign.clone();
        self.blocking(move |store| Ok(store.note_path(&sign).exists()))
            .await
    }

    async fn get(&self, sign: &Sign) -> Result<Option<Note>, Error> {
        let sign = sign.clone();
        self.blocking(move |store| store.read_note(&sign)).await
    }

    async fn record_visit(&self, sign: &Sign) -> Result<VisitOutcome, Error> {
        let sign = sign.clone();
        self.blocking(move |store| {
            let _lock = store.lock()?;

            let Some(mut note) = store.read_note(&sign)? else {
                return Ok(VisitOutcome::Missing);
            };

            if note.consume_visit() {
                store.remove_note(&sign)?;
                Ok(VisitOutcome::Deleted(note))
            } else {
                store.write_note(&note)?;
                Ok(VisitOutcome::Visited(note))
            }
        })
        .await
    }

    async fn delete(&self, sign: &Sign) -> Result<bool, Error> {
        let sign = sign.clone();
        self.blocking(move |store| {
            let _lock = store.lock()?;
            store.remove_note(&sign)
        })
        .await
    }

    async fn count(&self) -> Result<u64, Error> {
        self.blocking(|store| {
            let entries = fs::read_dir(store.root.join("notes"))
                .map_err(|e| Error::Storage(format!("Failed to read notes dir: {}", e)))?;

            let mut count = 0;
            for entry in entries {
                let entry = entry
                    .map_err(|e| Error::Storage(format!("Failed to read dir entry: {}", e)))?;
                if entry.path().extension().is_some_and(|ext| ext == "json") {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{EncryptMetadata, Encryption, NONCE_LEN};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn setup() -> (TempDir, FilesStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesStore::open(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn note(fill: &str, max_number_visits: Option<u32>) -> Note {
        Note {
            sign: Sign::parse(&fill.repeat(43)).unwrap(),
            name: "note".into(),
            content_type: ContentType::Text,
            max_number_visits,
            current_number_visits: 0,
            encryption: None,
            text: b"body".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (_temp, store) = setup();
        let plain = note("a", None);
        let sealed = Note {
            encryption: Some(Encryption {
                password_hash: "$argon2id$v=19$m=64,t=1,p=1$c2FsdHNhbHQ$aGFzaA".into(),
                metadata: EncryptMetadata { nonce: [9; NONCE_LEN] },
            }),
            text: vec![0, 255, 128, 7],
            ..note("b", Some(2))
        };

        assert!(store.insert_if_absent(&plain).await.unwrap());
        assert!(store.insert_if_absent(&sealed).await.unwrap());
        assert!(!store.insert_if_absent(&plain).await.unwrap());

        assert_eq!(store.get(&plain.sign).await.unwrap(), Some(plain.clone()));
        assert_eq!(store.get(&sealed.sign).await.unwrap(), Some(sealed));
        assert!(store.contains(&plain.sign).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_file_layout() {
        let (temp, store) = setup();
        let n = note("c", Some(3));
        store.insert_if_absent(&n).await.unwrap();

        let path = temp.path().join("notes").join(format!("{}.json", n.sign));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["name"], "note");
        assert_eq!(value["text"], "Ym9keQ==");
        assert_eq!(value["is_encrypted"], false);
        assert_eq!(value["max_number_visits"], 3);
        assert!(value["encrypt_password_hash"].is_null());
    }

    #[tokio::test]
    async fn test_rewrite_stores_only_note_fields() {
        let (temp, store) = setup();
        let n = note("i", Some(3));
        store.insert_if_absent(&n).await.unwrap();
        store.record_visit(&n.sign).await.unwrap();

        let path = temp.path().join("notes").join(format!("{}.json", n.sign));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "content_type",
                "current_number_visits",
                "encrypt_metadata",
                "encrypt_password_hash",
                "is_encrypted",
                "max_number_visits",
                "name",
                "text",
            ]
        );
        assert_eq!(value["current_number_visits"], 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_lock_wait_does_not_stall_runtime() {
        let (temp, store) = setup();
        let n = note("j", Some(1));
        store.insert_if_absent(&n).await.unwrap();

        let held = File::create(temp.path().join(".lock")).unwrap();
        held.lock_exclusive().unwrap();

        let visit = tokio::spawn({
            let store = store.clone();
            let sign = n.sign.clone();
            async move { store.record_visit(&sign).await }
        });

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!visit.is_finished());

        held.unlock().unwrap();
        assert!(matches!(
            visit.await.unwrap().unwrap(),
            VisitOutcome::Deleted(_)
        ));
    }

    #[tokio::test]
    async fn test_record_visit_until_deleted() {
        let (temp, store) = setup();
        let n = note("d", Some(2));
        store.insert_if_absent(&n).await.unwrap();

        match store.record_visit(&n.sign).await.unwrap() {
            VisitOutcome::Visited(updated) => assert_eq!(updated.current_number_visits, 1),
            other => panic!("expected Visited, got {:?}", other),
        }
        assert!(matches!(
            store.record_visit(&n.sign).await.unwrap(),
            VisitOutcome::Deleted(_)
        ));
        assert_eq!(store.record_visit(&n.sign).await.unwrap(), VisitOutcome::Missing);

        let leftovers = fs::read_dir(temp.path().join("notes")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_temp, store) = setup();
        let n = note("e", None);
        store.insert_if_absent(&n).await.unwrap();

        assert!(store.delete(&n.sign).await.unwrap());
        assert!(!store.delete(&n.sign).await.unwrap());
        assert!(store.get(&n.sign).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let (temp, store) = setup();
        let n = note("f", None);
        fs::write(
            temp.path().join("notes").join(format!("{}.json", n.sign)),
            "{not json",
        )
        .unwrap();

        assert!(matches!(store.get(&n.sign).await, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_concurrent_visits_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let n = note("g", Some(1));

        FilesStore::open(&root)
            .unwrap()
            .insert_if_absent(&n)
            .await
            .unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let root = root.clone();
                let sign = n.sign.clone();
                thread::spawn(move || {
                    let rt = tokio::runtime::Runtime::new().unwrap();
                    rt.block_on(async {
                        let store = FilesStore::open(&root).unwrap();
                        store.record_visit(&sign).await.unwrap()
                    })
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome != VisitOutcome::Missing)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_same_sign() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        FilesStore::open(&root).unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let root = root.clone();
                thread::spawn(move || {
                    let rt = tokio::runtime::Runtime::new().unwrap();
                    rt.block_on(async {
                        let store = FilesStore::open(&root).unwrap();
                        store.insert_if_absent(&note("h", None)).await.unwrap()
                    })
                })
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(inserted, 1);
    }
}
