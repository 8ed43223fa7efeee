pub mod codec;
pub mod kdf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::types::{
    MAX_PAGE_SIZE, MIN_PAGE_SIZE, PAGE_SIZE,
    error::{DatabaseError, Result},
};

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;

pub const DEFAULT_KDF_ITERATIONS: u32 = 256_000;
pub const DEFAULT_HMAC_KDF_ITERATIONS: u32 = 2;
pub const HMAC_SALT_MASK: u8 = 0x3a;

const MIN_USABLE_SIZE: usize = 480;

/// Digest used for the per-page HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgorithm {
    Sha1,
    Sha256,
    #[default]
    Sha512,
}

impl HmacAlgorithm {
    pub fn output_size(&self) -> usize {
        match self {
            HmacAlgorithm::Sha1 => 20,
            HmacAlgorithm::Sha256 => 32,
            HmacAlgorithm::Sha512 => 64,
        }
    }
}

/// SQLCipher page-format parameters. Defaults are SQLCipher 4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherSettings {
    pub page_size: usize,
    pub kdf_iterations: u32,
    pub hmac_kdf_iterations: u32,
    pub hmac_algorithm: HmacAlgorithm,
}

impl Default for CipherSettings {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            hmac_kdf_iterations: DEFAULT_HMAC_KDF_ITERATIONS,
            hmac_algorithm: HmacAlgorithm::Sha512,
        }
    }
}

impl CipherSettings {
    /// IV plus HMAC, rounded up to a whole AES block.
    pub fn reserved_size(&self) -> usize {
        (IV_SIZE + self.hmac_algorithm.output_size()).div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE
    }

    pub fn usable_size(&self) -> usize {
        self.page_size - self.reserved_size()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(DatabaseError::UnsupportedInput {
                details: format!("page size {} is not a power of two in 512..=65536", self.page_size),
            });
        }
        if self.usable_size() < MIN_USABLE_SIZE {
            return Err(DatabaseError::UnsupportedInput {
                details: format!(
                    "page size {} leaves too few usable bytes after {} reserved",
                    self.page_size,
                    self.reserved_size()
                ),
            });
        }
        if self.kdf_iterations == 0 || self.hmac_kdf_iterations == 0 {
            return Err(DatabaseError::KeyDerivation {
                reason: "iteration counts must be positive".to_string(),
            });
        }
        Ok(())
    }
}
