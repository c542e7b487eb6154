//! Cinder core library - note types, crypto, the storage contract and the
//! note lifecycle.
//!
//! Backends implement [`NoteStore`]; everything else goes through
//! [`NoteService`].

mod cipher;
mod error;
mod hasher;
mod memory;
mod note;
mod service;
mod sign;
mod store;

pub mod migrations;

pub use cipher::{AeadCipher, AuthenticationError, CipherContext, NONCE_LEN, TAG_LEN};
pub use error::Error;
pub use hasher::{Argon2Hasher, HasherConfig, PasswordHasher};
pub use memory::MemoryStore;
pub use note::{
    ContentType, CreateNote, EncryptMetadata, Encryption, Note, NoteContent, MAX_NAME_LEN,
};
pub use service::{NoteService, DEFAULT_RETRIES};
pub use sign::{OsRandom, RandomSource, Sign, SignGenerator, MAX_SIGN_ATTEMPTS, SIGN_LEN};
pub use store::{NoteStore, VisitOutcome};
