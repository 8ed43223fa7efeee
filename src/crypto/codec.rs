use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use hmac::{Hmac, Mac, digest::KeyInit};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::{
    crypto::{CipherSettings, HmacAlgorithm, IV_SIZE, kdf::DerivedKeys},
    types::{
        PageId, SALT_SIZE,
        error::{DatabaseError, Result},
        page::{PlaintextPage, RawPage},
    },
};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Per-page SQLCipher decryption and authentication.
///
/// On-disk layout of page `n`:
///
/// ```text
/// [salt (page 1 only)] [ciphertext ........] [IV 16] [HMAC] [pad]
///                      ^offset               ^usable
/// ```
///
/// The HMAC covers `ciphertext || IV || n as u32 LE`.
#[derive(Debug)]
pub struct PageCodec {
    keys: DerivedKeys,
    settings: CipherSettings,
}

impl PageCodec {
    pub fn new(keys: DerivedKeys, settings: &CipherSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            keys,
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &CipherSettings {
        &self.settings
    }

    pub fn usable_size(&self) -> usize {
        self.settings.usable_size()
    }

    fn content_offset(page_id: PageId) -> usize {
        if page_id == 1 { SALT_SIZE } else { 0 }
    }

    pub fn decrypt(&self, raw: &RawPage) -> Result<PlaintextPage> {
        let page_size = self.settings.page_size;
        if raw.bytes.len() != page_size {
            return Err(DatabaseError::InvalidPageSize {
                expected: page_size,
                actual: raw.bytes.len(),
            });
        }

        let offset = Self::content_offset(raw.page_id);
        let usable = self.usable_size();
        let tag_len = self.settings.hmac_algorithm.output_size();
        let authenticated = &raw.bytes[offset..usable + IV_SIZE];
        let stored_tag = &raw.bytes[usable + IV_SIZE..usable + IV_SIZE + tag_len];
        if !self.verify_tag(raw.page_id, authenticated, stored_tag)? {
            return Err(DatabaseError::Integrity {
                page_id: raw.page_id,
            });
        }

        let iv = &raw.bytes[usable..usable + IV_SIZE];
        let mut data = Vec::with_capacity(usable);
        data.extend_from_slice(&raw.bytes[..offset]);
        data.extend_from_slice(&raw.bytes[offset..usable]);
        Aes256CbcDec::new_from_slices(self.keys.encryption_key(), iv)
            .map_err(|e| DatabaseError::KeyDerivation {
                reason: format!("cipher init: {e}"),
            })?
            .decrypt_padded_mut::<NoPadding>(&mut data[offset..])
            .map_err(|_| DatabaseError::CorruptedPage {
                page_id: raw.page_id,
                reason: "ciphertext is not a whole number of AES blocks".to_string(),
            })?;

        Ok(PlaintextPage {
            page_id: raw.page_id,
            data,
            origin: raw.origin,
        })
    }

    /// Inverse of [`decrypt`](Self::decrypt). `plaintext` is the usable
    /// region; on page 1 its first 16 bytes are written through as the salt.
    pub fn encrypt(&self, page_id: PageId, plaintext: &[u8], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>> {
        let usable = self.usable_size();
        if plaintext.len() != usable {
            return Err(DatabaseError::InvalidPageSize {
                expected: usable,
                actual: plaintext.len(),
            });
        }
        let offset = Self::content_offset(page_id);

        let mut page = vec![0u8; self.settings.page_size];
        page[..usable].copy_from_slice(plaintext);
        let len = usable - offset;
        Aes256CbcEnc::new_from_slices(self.keys.encryption_key(), iv)
            .map_err(|e| DatabaseError::KeyDerivation {
                reason: format!("cipher init: {e}"),
            })?
            .encrypt_padded_mut::<NoPadding>(&mut page[offset..usable], len)
            .map_err(|_| DatabaseError::CorruptedPage {
                page_id,
                reason: "plaintext is not a whole number of AES blocks".to_string(),
            })?;
        page[usable..usable + IV_SIZE].copy_from_slice(iv);

        let tag = self.compute_tag(page_id, &page[offset..usable + IV_SIZE])?;
        page[usable + IV_SIZE..usable + IV_SIZE + tag.len()].copy_from_slice(&tag);
        Ok(page)
    }

    fn verify_tag(&self, page_id: PageId, authenticated: &[u8], tag: &[u8]) -> Result<bool> {
        let key = self.keys.hmac_key();
        Ok(match self.settings.hmac_algorithm {
            HmacAlgorithm::Sha1 => keyed::<Hmac<Sha1>>(key, authenticated, page_id)?
                .verify_slice(tag)
                .is_ok(),
            HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, authenticated, page_id)?
                .verify_slice(tag)
                .is_ok(),
            HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, authenticated, page_id)?
                .verify_slice(tag)
                .is_ok(),
        })
    }

    fn compute_tag(&self, page_id: PageId, authenticated: &[u8]) -> Result<Vec<u8>> {
        let key = self.keys.hmac_key();
        Ok(match self.settings.hmac_algorithm {
            HmacAlgorithm::Sha1 => keyed::<Hmac<Sha1>>(key, authenticated, page_id)?
                .finalize()
                .into_bytes()
                .to_vec(),
            HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, authenticated, page_id)?
                .finalize()
                .into_bytes()
                .to_vec(),
            HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, authenticated, page_id)?
                .finalize()
                .into_bytes()
                .to_vec(),
        })
    }
}

fn keyed<M: Mac + KeyInit>(key: &[u8], authenticated: &[u8], page_id: PageId) -> Result<M> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|e| DatabaseError::KeyDerivation {
        reason: format!("hmac init: {e}"),
    })?;
    mac.update(authenticated);
    mac.update(&page_id.to_le_bytes());
    Ok(mac)
}
