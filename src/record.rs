use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Record kinds ──────────────────────────────────────────────────

/// Data-shape discriminator. Immutable for the life of a record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    CredentialPair,
    Card,
    Note,
    File,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::CredentialPair,
        RecordKind::Card,
        RecordKind::Note,
        RecordKind::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::CredentialPair => "credential-pair",
            RecordKind::Card => "card",
            RecordKind::Note => "note",
            RecordKind::File => "file",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credential-pair" => Ok(RecordKind::CredentialPair),
            "card" => Ok(RecordKind::Card),
            "note" => Ok(RecordKind::Note),
            "file" => Ok(RecordKind::File),
            other => Err(KeeperError::UnknownKind(other.to_string())),
        }
    }
}

// ── Typed bodies ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CredentialPair {
    pub login: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CardDetails {
    pub number: String,
    /// `mm/yy`
    pub expires_at: String,
    pub cvv: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NoteText {
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    #[serde(with = "content_base64")]
    pub content: Vec<u8>,
}

/// Decrypted payload of a record. The variant is fixed by the record's kind;
/// an unknown kind exists only at wire/disk boundaries where the kind string
/// is parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordBody {
    CredentialPair(CredentialPair),
    Card(CardDetails),
    Note(NoteText),
    File(FilePayload),
}

impl RecordBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBody::CredentialPair(_) => RecordKind::CredentialPair,
            RecordBody::Card(_) => RecordKind::Card,
            RecordBody::Note(_) => RecordKind::Note,
            RecordBody::File(_) => RecordKind::File,
        }
    }

    /// JSON-serialize the variant payload. The kind travels next to the
    /// blob, never inside it.
    pub fn encode(&self) -> Result<Vec<u8>, KeeperError> {
        let result = match self {
            RecordBody::CredentialPair(body) => serde_json::to_vec(body),
            RecordBody::Card(body) => serde_json::to_vec(body),
            RecordBody::Note(body) => serde_json::to_vec(body),
            RecordBody::File(body) => serde_json::to_vec(body),
        };

        result.map_err(|e| {
            tracing::error!(error = %e, "Failed to serialize record body");
            KeeperError::Integrity("body-encode-failed")
        })
    }

    pub fn decode(kind: RecordKind, bytes: &[u8]) -> Result<Self, KeeperError> {
        let parsed = match kind {
            RecordKind::CredentialPair => {
                serde_json::from_slice(bytes).map(RecordBody::CredentialPair)
            }
            RecordKind::Card => serde_json::from_slice(bytes).map(RecordBody::Card),
            RecordKind::Note => serde_json::from_slice(bytes).map(RecordBody::Note),
            RecordKind::File => serde_json::from_slice(bytes).map(RecordBody::File),
        };

        parsed.map_err(|e| {
            tracing::error!(error = %e, kind = %kind, "Failed to parse record body");
            KeeperError::Integrity("body-decode-failed")
        })
    }
}

impl fmt::Display for RecordBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordBody::CredentialPair(body) => {
                write!(f, "login: {} password: {}", body.login, body.password)
            }
            RecordBody::Card(body) => {
                write!(f, "{} {} {}", body.number, body.expires_at, body.cvv)
            }
            RecordBody::Note(body) => f.write_str(&body.text),
            RecordBody::File(body) => {
                write!(f, "file {} ({} bytes)", body.name, body.content.len())
            }
        }
    }
}

mod content_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ── Record ────────────────────────────────────────────────────────

/// One stored item, in its wire shape. The `data` field is always the
/// ciphertext envelope; plaintext bodies never leave the client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    #[serde(rename = "user_id", default)]
    pub owner_id: i64,
    #[serde(rename = "data_type")]
    pub kind: RecordKind,
    #[serde(rename = "data")]
    pub ciphertext: String,
    pub meta: String,
    pub version: i64,
    #[serde(default)]
    pub created_at: u64,
}

impl Record {
    /// A record that has not been uploaded yet. Either predicate alone
    /// suffices; both are kept so a half-remapped row still reads as local.
    pub fn is_local(&self) -> bool {
        self.version == -1 || self.id < 0
    }
}

// ── Listing filters ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
pub struct ListFilters {
    pub pagination: Option<Pagination>,
    pub newest_first: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct Pagination {
    /// 1-based page number.
    pub page: usize,
    pub count: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PaginatedRecords {
    pub data: Vec<Record>,
    pub current_page: usize,
    pub count: usize,
    pub page_count: usize,
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_display() {
        for kind in RecordKind::ALL {
            let parsed: RecordKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("passwords".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&RecordKind::CredentialPair).unwrap();
        assert_eq!(json, "\"credential-pair\"");
        let kind: RecordKind = serde_json::from_str("\"note\"").unwrap();
        assert_eq!(kind, RecordKind::Note);
    }

    #[test]
    fn test_body_roundtrip_every_kind() {
        let bodies = vec![
            RecordBody::CredentialPair(CredentialPair {
                login: "user@example.com".to_string(),
                password: "hunter2".to_string(),
            }),
            RecordBody::Card(CardDetails {
                number: "4111111111111111".to_string(),
                expires_at: "12/30".to_string(),
                cvv: "123".to_string(),
            }),
            RecordBody::Note(NoteText {
                text: "remember the milk".to_string(),
            }),
            RecordBody::File(FilePayload {
                name: "id_rsa".to_string(),
                content: vec![0, 1, 2, 255],
            }),
        ];

        for body in bodies {
            let bytes = body.encode().unwrap();
            let decoded = RecordBody::decode(body.kind(), &bytes).unwrap();
            assert_eq!(decoded, body);
        }
    }

    #[test]
    fn test_body_decode_wrong_shape_fails() {
        let bytes = serde_json::to_vec(&NoteText {
            text: "just a note".to_string(),
        })
        .unwrap();
        let result = RecordBody::decode(RecordKind::Card, &bytes);
        assert!(matches!(result, Err(KeeperError::Integrity(_))));
    }

    #[test]
    fn test_file_content_base64_on_wire() {
        let payload = FilePayload {
            name: "blob.bin".to_string(),
            content: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("3q2+7w=="));
        let back: FilePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_is_local_predicate() {
        let mut record = Record {
            id: -3,
            owner_id: 0,
            kind: RecordKind::Note,
            ciphertext: String::new(),
            meta: String::new(),
            version: -1,
            created_at: 0,
        };
        assert!(record.is_local());

        // Either predicate alone is enough.
        record.version = 1;
        assert!(record.is_local());
        record.id = 3;
        record.version = -1;
        assert!(record.is_local());

        record.version = 2;
        assert!(!record.is_local());
    }

    #[test]
    fn test_record_wire_field_names() {
        let record = Record {
            id: 7,
            owner_id: 2,
            kind: RecordKind::Card,
            ciphertext: "abc".to_string(),
            meta: "m".to_string(),
            version: 3,
            created_at: 100,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"user_id\":2"));
        assert!(json.contains("\"data_type\":\"card\""));
        assert!(json.contains("\"data\":\"abc\""));
    }
}
