//! Player record decoding.
//!
//! A record file holds one player's persisted state. The registry only needs
//! the player's name out of it, so decoding is a single pure function from
//! bytes to [`Identity`].

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use thiserror::Error;

use super::nbt::{self, Tag};
use super::Identity;
use crate::config::RegistryConfig;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Why a single record could not be turned into an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of record data")]
    UnexpectedEof,

    #[error("unknown tag id 0x{0:02x}")]
    UnknownTag(u8),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("missing name field {field}")]
    MissingName { field: String },

    #[error("name field {field} is a {found}, not a string")]
    NameNotString { field: String, found: String },
}

/// Decodes the raw bytes of one record file into the player's identity.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Identity, DecodeError>;
}

/// Decoder for the game's NBT player records.
///
/// The name lives at `<root>.<compound>.<field>`, by default
/// `bukkit.lastKnownName`. Input may be gzip-compressed or raw NBT.
#[derive(Debug, Clone)]
pub struct NbtRecordDecoder {
    compound: String,
    field: String,
}

impl Default for NbtRecordDecoder {
    fn default() -> Self {
        Self::new(RegistryConfig::NAME_COMPOUND, RegistryConfig::NAME_FIELD)
    }
}

impl NbtRecordDecoder {
    pub fn new(compound: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            compound: compound.into(),
            field: field.into(),
        }
    }

    fn field_path(&self) -> String {
        format!("{}.{}", self.compound, self.field)
    }
}

impl RecordDecoder for NbtRecordDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Identity, DecodeError> {
        let raw = inflate(bytes)?;
        let (_, root) = nbt::decode_root(raw)?;

        let root = root
            .as_compound()
            .ok_or_else(|| DecodeError::Malformed(format!("root is a {}", root.type_name())))?;

        let name = root
            .get(&self.compound)
            .and_then(Tag::as_compound)
            .and_then(|c| c.get(&self.field))
            .ok_or_else(|| DecodeError::MissingName {
                field: self.field_path(),
            })?;

        match name.as_str() {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            Some(_) => Err(DecodeError::MissingName {
                field: self.field_path(),
            }),
            None => Err(DecodeError::NameNotString {
                field: self.field_path(),
                found: name.type_name().to_string(),
            }),
        }
    }
}

fn inflate(bytes: &[u8]) -> Result<Bytes, DecodeError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(Bytes::copy_from_slice(bytes));
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Decompress(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// Build a gzip-compressed record carrying `name` at the default location.
///
/// Mirrors what the game writes closely enough for fixtures and tooling.
pub fn encode_player_record(name: &str) -> std::io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashMap;
    use std::io::Write;

    let mut bukkit = HashMap::new();
    bukkit.insert(
        RegistryConfig::NAME_FIELD.to_string(),
        Tag::String(name.to_string()),
    );
    let mut root = HashMap::new();
    root.insert("DataVersion".to_string(), Tag::Int(3465));
    root.insert(
        RegistryConfig::NAME_COMPOUND.to_string(),
        Tag::Compound(bukkit),
    );

    let raw = nbt::encode_root("", &Tag::Compound(root));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    encoder.finish()
}
