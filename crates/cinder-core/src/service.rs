use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    AeadCipher, Argon2Hasher, CreateNote, Encryption, Error, Note, NoteContent, NoteStore,
    PasswordHasher, Sign, SignGenerator, VisitOutcome, MAX_NAME_LEN,
};

/// Default number of retries on transient storage conflicts.
pub const DEFAULT_RETRIES: u32 = 3;

const WRONG_PASSWORD: &str = "this note is encrypted, but the password is wrong";
const MISSING_PASSWORD: &str = "this note is encrypted, but no password was given";

/// The main service that contains all business logic.
/// Generic over the storage implementation.
pub struct NoteService<S: NoteStore> {
    store: S,
    cipher: AeadCipher,
    hasher: Arc<dyn PasswordHasher>,
    signs: SignGenerator,
    retries: u32,
}

impl<S: NoteStore> NoteService<S> {
    pub fn new(store: S, cipher: AeadCipher) -> Self {
        Self {
            store,
            cipher,
            hasher: Arc::new(Argon2Hasher::default()),
            signs: SignGenerator::default(),
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_sign_generator(mut self, signs: SignGenerator) -> Self {
        self.signs = signs;
        self
    }

    /// How often a conflicting storage operation is retried before it
    /// surfaces as `Error::Storage`.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a note and return its sign.
    pub async fn create(&self, note: CreateNote) -> Result<Sign, Error> {
        // Validation
        let name = note.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("name cannot be empty".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::Validation(format!(
                "name cannot be longer than {} characters",
                MAX_NAME_LEN
            )));
        }

        // A password on a plaintext note is ignored.
        let password = if note.is_encrypted {
            match note.encrypt_password.filter(|p| !p.is_empty()) {
                Some(password) => Some(password),
                None => {
                    return Err(Error::Configuration(
                        "is_encrypted is set, but encrypt_password is missing".into(),
                    ))
                }
            }
        } else {
            None
        };

        let (text, encryption) = match password {
            Some(password) => {
                let (sealed, encryption) = self.seal(password, note.text).await?;
                (sealed, Some(encryption))
            }
            None => (note.text.into_bytes(), None),
        };

        let mut record = Note {
            sign: self.fresh_sign().await?,
            name,
            content_type: note.content_type,
            max_number_visits: (note.max_number_visits > 0).then_some(note.max_number_visits),
            current_number_visits: 0,
            encryption,
            text,
        };

        let mut taken = 0;
        loop {
            let store = &self.store;
            let candidate = &record;
            if self
                .retrying("insert", move || store.insert_if_absent(candidate))
                .await?
            {
                tracing::info!(
                    sign = record.sign.redacted(),
                    encrypted = record.is_encrypted(),
                    max_number_visits = ?record.max_number_visits,
                    "note created"
                );
                return Ok(record.sign);
            }

            taken += 1;
            if taken > self.retries {
                tracing::warn!(attempts = taken, "giving up on storing note");
                return Err(Error::Storage(format!(
                    "note not stored after {} attempts",
                    taken
                )));
            }
            tracing::debug!("sign taken before insert, drawing again");
            record.sign = self.fresh_sign().await?;
        }
    }

    /// Read a note, consuming one of its visits.
    pub async fn read(&self, sign: &str, password: Option<&str>) -> Result<NoteContent, Error> {
        let sign = Sign::parse(sign)?;

        let Note {
            name,
            encryption,
            text,
            ..
        } = {
            let store = &self.store;
            let sign = &sign;
            self.retrying("fetch", move || store.get(sign))
                .await?
                .ok_or(Error::NotFound)?
        };

        let text = match encryption {
            Some(encryption) => {
                let password = password
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| Error::Password(MISSING_PASSWORD.into()))?;
                self.open(password.to_string(), encryption, text).await?
            }
            None => text,
        };

        let message = String::from_utf8(text)
            .map_err(|_| Error::Internal("note text is not valid UTF-8".into()))?;

        self.consume_visit(&sign).await?;

        Ok(NoteContent { name, message })
    }

    /// Number of live notes.
    pub async fn count(&self) -> Result<u64, Error> {
        let store = &self.store;
        self.retrying("count", move || store.count()).await
    }

    async fn fresh_sign(&self) -> Result<Sign, Error> {
        let (signs, store) = (&self.signs, &self.store);
        self.retrying("sign lookup", move || signs.generate(store))
            .await
    }

    /// Run a store operation, retrying `Error::Conflict` with backoff.
    /// Exhausted retries surface as `Error::Storage`.
    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut failures = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && failures < self.retries => {
                    failures += 1;
                    tracing::debug!(attempt = failures, error = %e, "{} conflicted, retrying", what);
                    tokio::time::sleep(backoff(failures)).await;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempts = failures + 1, error = %e, "giving up on {}", what);
                    return Err(Error::Storage(format!(
                        "{} failed after {} attempts",
                        what,
                        failures + 1
                    )));
                }
                other => return other,
            }
        }
    }

    async fn seal(&self, password: String, text: String) -> Result<(Vec<u8>, Encryption), Error> {
        let cipher = self.cipher.clone();
        let hasher = self.hasher.clone();

        tokio::task::spawn_blocking(move || {
            let ctx = cipher.for_encrypt(&password);
            let sealed = ctx.encrypt(text.as_bytes())?;
            let password_hash = hasher.hash(&password)?;
            Ok((
                sealed,
                Encryption {
                    password_hash,
                    metadata: ctx.metadata(),
                },
            ))
        })
        .await
        .map_err(|e| Error::Internal(format!("encryption task failed: {}", e)))?
    }

    async fn open(
        &self,
        password: String,
        encryption: Encryption,
        sealed: Vec<u8>,
    ) -> Result<Vec<u8>, Error> {
        let cipher = self.cipher.clone();
        let hasher = self.hasher.clone();

        tokio::task::spawn_blocking(move || {
            if !hasher.verify(&password, &encryption.password_hash) {
                return Err(Error::Password(WRONG_PASSWORD.into()));
            }
            // Corrupt ciphertext is reported exactly like a wrong password.
            cipher
                .for_decrypt(&password, &encryption.metadata)
                .decrypt(&sealed)
                .map_err(|_| Error::Password(WRONG_PASSWORD.into()))
        })
        .await
        .map_err(|e| Error::Internal(format!("decryption task failed: {}", e)))?
    }

    async fn consume_visit(&self, sign: &Sign) -> Result<(), Error> {
        let store = &self.store;
        match self.retrying("visit", move || store.record_visit(sign)).await? {
            VisitOutcome::Visited(note) => {
                tracing::debug!(
                    sign = sign.redacted(),
                    remaining = ?note.remaining_visits(),
                    "note read"
                );
                Ok(())
            }
            VisitOutcome::Deleted(_) => {
                tracing::info!(sign = sign.redacted(), "note burned after its last read");
                Ok(())
            }
            // Another reader took the last visit after our fetch.
            VisitOutcome::Missing => Err(Error::NotFound),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(5u64 << attempt.min(6))
}
