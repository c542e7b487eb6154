//! Public note identifiers.
//!
//! A sign is 32 random bytes rendered as unpadded URL-safe base64, which is
//! always 43 characters long.

use std::fmt;
use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Serialize, Serializer};

use crate::{Error, NoteStore};

/// Number of random bytes behind a sign.
pub const SIGN_BYTES_LEN: usize = 32;

/// Length of a sign in characters.
pub const SIGN_LEN: usize = 43;

/// How many candidates `SignGenerator` draws before giving up.
pub const MAX_SIGN_ATTEMPTS: usize = 32;

/// A syntactically valid sign. Says nothing about whether a note exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sign(String);

impl Sign {
    /// Check the shape of a caller-supplied sign.
    pub fn parse(value: &str) -> Result<Self, Error> {
        if value.len() != SIGN_LEN {
            return Err(Error::SignFormat { expected: SIGN_LEN });
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::SignFormat { expected: SIGN_LEN });
        }
        Ok(Sign(value.to_string()))
    }

    fn from_bytes(bytes: &[u8; SIGN_BYTES_LEN]) -> Self {
        Sign(Base64UrlUnpadded::encode_string(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix that is safe to put in logs.
    pub fn redacted(&self) -> &str {
        &self.0[..6]
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sign {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Sign {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Source of random bytes for new signs.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// The operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// Mints signs that no live note currently holds.
#[derive(Clone)]
pub struct SignGenerator {
    source: Arc<dyn RandomSource>,
}

impl Default for SignGenerator {
    fn default() -> Self {
        Self::new(Arc::new(OsRandom))
    }
}

impl SignGenerator {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        Self { source }
    }

    fn candidate(&self) -> Sign {
        let mut bytes = [0u8; SIGN_BYTES_LEN];
        self.source.fill(&mut bytes);
        Sign::from_bytes(&bytes)
    }

    /// Draw signs until one is free in `store`.
    ///
    /// Signs starting with `_` are skipped since document stores reserve
    /// them. The store is only queried, never written; the caller still has
    /// to insert with `insert_if_absent` to close the race with other
    /// writers.
    pub async fn generate<S: NoteStore + ?Sized>(&self, store: &S) -> Result<Sign, Error> {
        for attempt in 1..=MAX_SIGN_ATTEMPTS {
            let sign = self.candidate();
            if sign.as_str().starts_with('_') {
                continue;
            }
            if store.contains(&sign).await? {
                tracing::debug!(attempt, "sign collision, drawing again");
                continue;
            }
            return Ok(sign);
        }

        tracing::warn!(attempts = MAX_SIGN_ATTEMPTS, "could not draw a free sign");
        Err(Error::Internal(format!(
            "no free sign after {} attempts",
            MAX_SIGN_ATTEMPTS
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedRandom;
    use super::*;
    use crate::{ContentType, MemoryStore, Note};
    use std::collections::HashSet;

    fn note_with(sign: Sign) -> Note {
        Note {
            sign,
            name: "n".into(),
            content_type: ContentType::Text,
            max_number_visits: None,
            current_number_visits: 0,
            encryption: None,
            text: b"hello".to_vec(),
        }
    }

    #[test]
    fn test_parse_checks_length() {
        assert!(matches!(
            Sign::parse("123"),
            Err(Error::SignFormat { expected: SIGN_LEN })
        ));
        assert!(Sign::parse(&"a".repeat(44)).is_err());
        assert!(Sign::parse("").is_err());
        assert!(Sign::parse(&"a".repeat(43)).is_ok());
    }

    #[test]
    fn test_parse_rejects_path_characters() {
        let sneaky = format!("../{}", "a".repeat(40));
        assert_eq!(sneaky.len(), SIGN_LEN);
        assert!(Sign::parse(&sneaky).is_err());
        assert!(Sign::parse(&format!("{}==", "a".repeat(41))).is_err());
    }

    #[test]
    fn test_generated_shape() {
        let sign = SignGenerator::default().candidate();
        assert_eq!(sign.as_str().len(), SIGN_LEN);
        assert!(Sign::parse(sign.as_str()).is_ok());
        let decoded = Base64UrlUnpadded::decode_vec(sign.as_str()).unwrap();
        assert_eq!(decoded.len(), SIGN_BYTES_LEN);
    }

    #[tokio::test]
    async fn test_generate_is_unique() {
        let store = MemoryStore::new();
        let generator = SignGenerator::default();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let sign = generator.generate(&store).await.unwrap();
            assert!(seen.insert(sign.clone()));
            assert!(store.insert_if_absent(&note_with(sign)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_generate_skips_taken_signs() {
        let store = MemoryStore::new();
        let taken = Sign::from_bytes(&[1; SIGN_BYTES_LEN]);
        store.insert_if_absent(&note_with(taken.clone())).await.unwrap();

        let generator = SignGenerator::new(Arc::new(ScriptedRandom::new(&[1, 1, 2])));
        let sign = generator.generate(&store).await.unwrap();

        assert_eq!(sign, Sign::from_bytes(&[2; SIGN_BYTES_LEN]));
    }

    #[tokio::test]
    async fn test_generate_skips_leading_underscore() {
        // 0xff bytes encode to "____..."
        let generator = SignGenerator::new(Arc::new(ScriptedRandom::new(&[0xff, 3])));
        let sign = generator.generate(&MemoryStore::new()).await.unwrap();

        assert!(!sign.as_str().starts_with('_'));
        assert_eq!(sign, Sign::from_bytes(&[3; SIGN_BYTES_LEN]));
    }

    #[tokio::test]
    async fn test_generate_gives_up_on_stuck_source() {
        let store = MemoryStore::new();
        store
            .insert_if_absent(&note_with(Sign::from_bytes(&[9; SIGN_BYTES_LEN])))
            .await
            .unwrap();

        let generator = SignGenerator::new(Arc::new(ScriptedRandom::new(&[9; MAX_SIGN_ATTEMPTS])));
        assert!(matches!(
            generator.generate(&store).await,
            Err(Error::Internal(_))
        ));
    }
}
