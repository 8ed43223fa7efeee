use std::fmt;

use sha2::Sha512;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    crypto::{CipherSettings, HMAC_SALT_MASK, KEY_SIZE},
    types::{
        SALT_SIZE,
        error::{DatabaseError, Result},
    },
};

/// The secret handed to SQLCipher: either a passphrase that goes through
/// PBKDF2, or a raw 32-byte key (`x'<64 hex>'`) used as-is.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
    raw: bool,
}

impl KeyMaterial {
    pub fn passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(DatabaseError::KeyDerivation {
                reason: "passphrase is empty".to_string(),
            });
        }
        Ok(Self {
            bytes: passphrase.as_bytes().to_vec(),
            raw: false,
        })
    }

    /// A raw key given as 64 hex digits.
    pub fn raw_hex(hex_key: &str) -> Result<Self> {
        let hex_key = hex_key.trim();
        let bytes = hex::decode(hex_key).map_err(|e| DatabaseError::KeyDerivation {
            reason: format!("raw key is not valid hex: {e}"),
        })?;
        if bytes.len() != KEY_SIZE {
            return Err(DatabaseError::KeyDerivation {
                reason: format!("raw key must be {KEY_SIZE} bytes, got {}", bytes.len()),
            });
        }
        Ok(Self { bytes, raw: true })
    }

    /// Accepts SQLCipher `PRAGMA key` syntax: `x'…'` selects raw-key mode,
    /// anything else is a passphrase.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let quoted = trimmed
            .strip_prefix("x'")
            .or_else(|| trimmed.strip_prefix("X'"))
            .and_then(|rest| rest.strip_suffix('\''));
        match quoted {
            Some(hex_key) => Self::raw_hex(hex_key),
            None => Self::passphrase(input),
        }
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("raw", &self.raw)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    encryption_key: [u8; KEY_SIZE],
    hmac_key: [u8; KEY_SIZE],
}

impl DerivedKeys {
    pub fn from_parts(encryption_key: [u8; KEY_SIZE], hmac_key: [u8; KEY_SIZE]) -> Self {
        Self {
            encryption_key,
            hmac_key,
        }
    }

    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    pub fn hmac_key(&self) -> &[u8; KEY_SIZE] {
        &self.hmac_key
    }
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeys([REDACTED])")
    }
}

pub struct KeyDeriver {
    kdf_iterations: u32,
    hmac_kdf_iterations: u32,
}

impl KeyDeriver {
    pub fn new(settings: &CipherSettings) -> Self {
        Self {
            kdf_iterations: settings.kdf_iterations,
            hmac_kdf_iterations: settings.hmac_kdf_iterations,
        }
    }

    /// SQLCipher 4 key schedule:
    ///
    /// ```text
    /// enc_key   = PBKDF2-HMAC-SHA512(passphrase, salt, kdf_iterations, 32)
    /// hmac_salt = salt XOR 0x3a
    /// hmac_key  = PBKDF2-HMAC-SHA512(enc_key, hmac_salt, hmac_kdf_iterations, 32)
    /// ```
    ///
    /// A raw key replaces the first step.
    pub fn derive(&self, key: &KeyMaterial, salt: &[u8]) -> Result<DerivedKeys> {
        if salt.len() != SALT_SIZE {
            return Err(DatabaseError::KeyDerivation {
                reason: format!("salt must be {SALT_SIZE} bytes, got {}", salt.len()),
            });
        }
        if key.as_bytes().is_empty() {
            return Err(DatabaseError::KeyDerivation {
                reason: "passphrase is empty".to_string(),
            });
        }
        if self.kdf_iterations == 0 || self.hmac_kdf_iterations == 0 {
            return Err(DatabaseError::KeyDerivation {
                reason: "iteration counts must be positive".to_string(),
            });
        }

        debug!(
            raw = key.is_raw(),
            kdf_iterations = self.kdf_iterations,
            hmac_iterations = self.hmac_kdf_iterations,
            salt = %hex::encode(salt),
            "deriving page keys"
        );

        let mut keys = DerivedKeys::from_parts([0u8; KEY_SIZE], [0u8; KEY_SIZE]);
        if key.is_raw() {
            keys.encryption_key.copy_from_slice(key.as_bytes());
        } else {
            pbkdf2::pbkdf2_hmac::<Sha512>(
                key.as_bytes(),
                salt,
                self.kdf_iterations,
                &mut keys.encryption_key,
            );
        }

        let mut hmac_salt = [0u8; SALT_SIZE];
        for (dst, src) in hmac_salt.iter_mut().zip(salt) {
            *dst = src ^ HMAC_SALT_MASK;
        }
        pbkdf2::pbkdf2_hmac::<Sha512>(
            &keys.encryption_key,
            &hmac_salt,
            self.hmac_kdf_iterations,
            &mut keys.hmac_key,
        );
        Ok(keys)
    }
}
