use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cipher::NONCE_LEN;
use crate::{Error, Sign};

/// Longest accepted note name, in characters.
pub const MAX_NAME_LEN: usize = 200;

/// Kind of content a note holds. Only text exists today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "text" => Ok(ContentType::Text),
            other => Err(Error::Storage(format!("unknown content type: {}", other))),
        }
    }
}

/// Everything needed to check a password and decrypt the note text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encryption {
    /// PHC-formatted Argon2 hash of the note password.
    pub password_hash: String,
    pub metadata: EncryptMetadata,
}

/// Per-note cipher parameters persisted next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptMetadata {
    #[serde(with = "nonce_base64")]
    pub nonce: [u8; NONCE_LEN],
}

impl EncryptMetadata {
    /// Encode for storage: `{"nonce":"<base64>"}`.
    pub fn encode(&self) -> String {
        // Serializing a struct of one fixed-size byte field cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(encoded: &str) -> Result<Self, Error> {
        serde_json::from_str(encoded)
            .map_err(|e| Error::Storage(format!("invalid encrypt metadata: {}", e)))
    }
}

mod nonce_base64 {
    use super::NONCE_LEN;
    use base64ct::{Base64, Encoding};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &[u8; NONCE_LEN], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; NONCE_LEN], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = Base64::decode_vec(&encoded)
            .map_err(|_| D::Error::custom("nonce is not valid base64"))?;
        <[u8; NONCE_LEN]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::custom(format!("nonce must be {} bytes", NONCE_LEN)))
    }
}

/// A stored note, as seen by the core. The backend key is not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub sign: Sign,
    pub name: String,
    pub content_type: ContentType,
    /// `None` means unlimited reads.
    pub max_number_visits: Option<u32>,
    pub current_number_visits: u32,
    pub encryption: Option<Encryption>,
    /// Ciphertext when encrypted, plaintext otherwise.
    pub text: Vec<u8>,
}

impl Note {
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Reads left before self-destruct, or `None` when unlimited.
    pub fn remaining_visits(&self) -> Option<u32> {
        self.max_number_visits
            .map(|max| max.saturating_sub(self.current_number_visits))
    }

    /// Apply one read. Returns true when the note has used up its visits
    /// and must be removed.
    pub fn consume_visit(&mut self) -> bool {
        self.current_number_visits = self.current_number_visits.saturating_add(1);
        match self.max_number_visits {
            Some(max) => self.current_number_visits >= max,
            None => false,
        }
    }

    /// Rebuild a note from the flat column layout shared by all backends,
    /// checking that the hash and metadata are present exactly when the
    /// note is encrypted.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        sign: Sign,
        name: String,
        content_type: ContentType,
        max_number_visits: Option<u32>,
        current_number_visits: u32,
        is_encrypted: bool,
        encrypt_password_hash: Option<String>,
        encrypt_metadata: Option<String>,
        text: Vec<u8>,
    ) -> Result<Self, Error> {
        let encryption = match (is_encrypted, encrypt_password_hash, encrypt_metadata) {
            (true, Some(password_hash), Some(metadata)) => Some(Encryption {
                password_hash,
                metadata: EncryptMetadata::decode(&metadata)?,
            }),
            (false, None, None) => None,
            _ => {
                return Err(Error::Storage(
                    "encryption fields do not match is_encrypted".into(),
                ))
            }
        };

        Ok(Note {
            sign,
            name,
            content_type,
            max_number_visits: max_number_visits.filter(|max| *max > 0),
            current_number_visits,
            encryption,
            text,
        })
    }

    /// Flat `(encrypt_password_hash, encrypt_metadata)` columns.
    pub fn encryption_columns(&self) -> (Option<String>, Option<String>) {
        match &self.encryption {
            Some(enc) => (Some(enc.password_hash.clone()), Some(enc.metadata.encode())),
            None => (None, None),
        }
    }
}

/// Parameters for creating a new note.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct CreateNote {
    pub name: String,
    pub text: String,
    #[serde(default)]
    pub content_type: ContentType,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_number_visits: u32,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub encrypt_password: Option<String>,
}

/// What a reader gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct NoteContent {
    pub name: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign() -> Sign {
        Sign::parse(&"A".repeat(43)).unwrap()
    }

    #[test]
    fn test_metadata_encoding_is_stable() {
        let metadata = EncryptMetadata { nonce: [7; NONCE_LEN] };
        let encoded = metadata.encode();
        assert_eq!(encoded, r#"{"nonce":"BwcHBwcHBwcHBwcH"}"#);
        assert_eq!(EncryptMetadata::decode(&encoded).unwrap(), metadata);
    }

    #[test]
    fn test_metadata_rejects_short_nonce() {
        assert!(EncryptMetadata::decode(r#"{"nonce":"BwcH"}"#).is_err());
        assert!(EncryptMetadata::decode("not json").is_err());
    }

    #[test]
    fn test_from_parts_enforces_encryption_presence() {
        let metadata = EncryptMetadata { nonce: [1; NONCE_LEN] }.encode();

        let plain = Note::from_parts(sign(), "n".into(), ContentType::Text, Some(0), 0, false, None, None, b"x".to_vec())
            .unwrap();
        assert!(!plain.is_encrypted());
        assert_eq!(plain.max_number_visits, None);

        let encrypted = Note::from_parts(
            sign(),
            "n".into(),
            ContentType::Text,
            Some(2),
            1,
            true,
            Some("$argon2id$...".into()),
            Some(metadata.clone()),
            b"x".to_vec(),
        )
        .unwrap();
        assert!(encrypted.is_encrypted());
        assert_eq!(encrypted.remaining_visits(), Some(1));

        assert!(Note::from_parts(sign(), "n".into(), ContentType::Text, None, 0, true, None, Some(metadata.clone()), vec![])
            .is_err());
        assert!(Note::from_parts(sign(), "n".into(), ContentType::Text, None, 0, false, None, Some(metadata), vec![])
            .is_err());
    }

    #[test]
    fn test_consume_visit() {
        let mut note = Note::from_parts(sign(), "n".into(), ContentType::Text, Some(2), 0, false, None, None, vec![])
            .unwrap();
        assert!(!note.consume_visit());
        assert_eq!(note.remaining_visits(), Some(1));
        assert!(note.consume_visit());

        let mut unlimited = Note { max_number_visits: None, ..note };
        for _ in 0..10 {
            assert!(!unlimited.consume_visit());
        }
    }

    #[test]
    fn test_content_type_names() {
        assert_eq!(ContentType::Text.as_str(), "text");
        assert_eq!(ContentType::parse("text").unwrap(), ContentType::Text);
        assert!(ContentType::parse("image").is_err());
    }
}
