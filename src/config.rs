use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    crypto::{CipherSettings, kdf::KeyMaterial},
    mapper::layout::SchemaLayout,
    types::error::{DatabaseError, Result},
};

/// Where the database key comes from.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KeySource {
    Passphrase(String),
    /// 64 hex digits, optionally in `x'…'` form.
    HexKey(String),
    /// Signal Desktop's `config.json`, which holds the raw key under `"key"`.
    SignalConfig(PathBuf),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            KeySource::HexKey(_) => f.write_str("HexKey(<redacted>)"),
            KeySource::SignalConfig(path) => f.debug_tuple("SignalConfig").field(path).finish(),
        }
    }
}

#[derive(Deserialize)]
struct SignalDesktopConfig {
    key: Option<String>,
    #[serde(rename = "encryptedKey")]
    encrypted_key: Option<String>,
}

impl KeySource {
    pub fn resolve(&self) -> Result<KeyMaterial> {
        match self {
            KeySource::Passphrase(passphrase) => KeyMaterial::passphrase(passphrase),
            KeySource::HexKey(hex_key) => {
                let material = KeyMaterial::parse(hex_key)?;
                if material.is_raw() {
                    Ok(material)
                } else {
                    KeyMaterial::raw_hex(hex_key)
                }
            }
            KeySource::SignalConfig(path) => {
                let text = fs::read_to_string(path)?;
                let config: SignalDesktopConfig = serde_json::from_str(&text)?;
                match (config.key, config.encrypted_key) {
                    (Some(key), _) => {
                        debug!(path = %path.display(), "using key from Signal config");
                        KeyMaterial::raw_hex(&key)
                    }
                    (None, Some(_)) => Err(DatabaseError::UnsupportedInput {
                        details: "config.json holds only an OS-keychain encryptedKey; decrypt it first \
                                  and pass the result with --hex-key"
                            .to_string(),
                    }),
                    (None, None) => Err(DatabaseError::KeyDerivation {
                        reason: format!("{} has no \"key\" entry", path.display()),
                    }),
                }
            }
        }
    }
}

/// Inputs of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub database: PathBuf,
    /// Explicit WAL path; when `None` the `<database>-wal` sibling is used
    /// if it exists.
    pub wal: Option<PathBuf>,
    /// Further WAL files. More than one WAL in total is not supported.
    pub extra_wals: Vec<PathBuf>,
    pub key: KeySource,
    pub cipher: CipherSettings,
    pub layout: SchemaLayout,
    pub workers: Option<usize>,
}

impl AnalysisConfig {
    pub fn new(database: impl Into<PathBuf>, key: KeySource) -> Self {
        Self {
            database: database.into(),
            wal: None,
            extra_wals: Vec::new(),
            key,
            cipher: CipherSettings::default(),
            layout: SchemaLayout::default(),
            workers: None,
        }
    }

    pub fn with_wal(mut self, wal: impl Into<PathBuf>) -> Self {
        self.wal = Some(wal.into());
        self
    }

    pub fn with_cipher(mut self, cipher: CipherSettings) -> Self {
        self.cipher = cipher;
        self
    }

    /// Reads a layout override from a JSON file.
    pub fn with_layout_file(mut self, path: &Path) -> Result<Self> {
        self.layout = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(self)
    }

    pub fn wal_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        match &self.wal {
            Some(wal) => candidates.push(wal.clone()),
            None => {
                let mut sibling = self.database.clone().into_os_string();
                sibling.push("-wal");
                let sibling = PathBuf::from(sibling);
                if sibling.is_file() {
                    candidates.push(sibling);
                }
            }
        }
        candidates.extend(self.extra_wals.iter().cloned());
        candidates
    }
}
