use crate::{
    storage::{
        WAL_FORMAT_VERSION, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE, WAL_MAGIC_BE, WAL_MAGIC_LE,
    },
    types::{
        HEADER_SIZE, MAX_PAGE_SIZE, PageId, SALT_SIZE,
        error::{DatabaseError, Result},
        page::PlaintextPage,
        record::TextEncoding,
    },
};

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// The 100-byte SQLite database header at the start of decrypted page 1.
/// Under SQLCipher the first 16 bytes hold the KDF salt instead of the
/// "SQLite format 3" magic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub salt: [u8; SALT_SIZE],
    pub page_size: u32,
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    pub reserved_space: u8,
    pub max_embedded_payload_fraction: u8,
    pub min_embedded_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    pub database_size_pages: u32,
    pub freelist_trunk_page: u32,
    pub freelist_pages_count: u32,
    pub schema_cookie: u32,
    pub schema_format_number: u32,
    pub default_page_cache_size: u32,
    pub largest_root_btree_page: u32,
    pub text_encoding: u32,
    pub user_version: u32,
    pub incremental_vacuum_mode: u32,
    pub application_id: u32,
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl DatabaseHeader {
    pub fn new(salt: [u8; SALT_SIZE], page_size: usize, reserved_space: u8, database_size_pages: u32) -> Self {
        Self {
            salt,
            page_size: page_size as u32,
            // WAL journal mode
            file_format_write_version: 2,
            file_format_read_version: 2,
            reserved_space,
            max_embedded_payload_fraction: 64,
            min_embedded_payload_fraction: 32,
            leaf_payload_fraction: 32,
            file_change_counter: 1,
            database_size_pages,
            freelist_trunk_page: 0,
            freelist_pages_count: 0,
            schema_cookie: 1,
            schema_format_number: 4,
            default_page_cache_size: 0,
            largest_root_btree_page: 0,
            text_encoding: 1,
            user_version: 0,
            incremental_vacuum_mode: 0,
            application_id: 0,
            version_valid_for: 1,
            sqlite_version_number: 3_046_001,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE);

        buffer.extend_from_slice(&self.salt);
        // 65536 is stored as 1
        let page_size = if self.page_size as usize == MAX_PAGE_SIZE { 1 } else { self.page_size as u16 };
        buffer.extend_from_slice(&page_size.to_be_bytes());
        buffer.push(self.file_format_write_version);
        buffer.push(self.file_format_read_version);
        buffer.push(self.reserved_space);
        buffer.push(self.max_embedded_payload_fraction);
        buffer.push(self.min_embedded_payload_fraction);
        buffer.push(self.leaf_payload_fraction);
        for field in [
            self.file_change_counter,
            self.database_size_pages,
            self.freelist_trunk_page,
            self.freelist_pages_count,
            self.schema_cookie,
            self.schema_format_number,
            self.default_page_cache_size,
            self.largest_root_btree_page,
            self.text_encoding,
            self.user_version,
            self.incremental_vacuum_mode,
            self.application_id,
        ] {
            buffer.extend_from_slice(&field.to_be_bytes());
        }
        buffer.extend_from_slice(&[0u8; 20]);
        buffer.extend_from_slice(&self.version_valid_for.to_be_bytes());
        buffer.extend_from_slice(&self.sqlite_version_number.to_be_bytes());

        buffer.resize(HEADER_SIZE, 0);
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DatabaseError::CorruptedPage {
                page_id: 1,
                reason: "database header too short".to_string(),
            });
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[..SALT_SIZE]);
        let page_size = match u16::from_be_bytes([bytes[16], bytes[17]]) {
            1 => MAX_PAGE_SIZE as u32,
            n => u32::from(n),
        };

        Ok(Self {
            salt,
            page_size,
            file_format_write_version: bytes[18],
            file_format_read_version: bytes[19],
            reserved_space: bytes[20],
            max_embedded_payload_fraction: bytes[21],
            min_embedded_payload_fraction: bytes[22],
            leaf_payload_fraction: bytes[23],
            file_change_counter: be_u32(bytes, 24),
            database_size_pages: be_u32(bytes, 28),
            freelist_trunk_page: be_u32(bytes, 32),
            freelist_pages_count: be_u32(bytes, 36),
            schema_cookie: be_u32(bytes, 40),
            schema_format_number: be_u32(bytes, 44),
            default_page_cache_size: be_u32(bytes, 48),
            largest_root_btree_page: be_u32(bytes, 52),
            text_encoding: be_u32(bytes, 56),
            user_version: be_u32(bytes, 60),
            incremental_vacuum_mode: be_u32(bytes, 64),
            application_id: be_u32(bytes, 68),
            version_valid_for: be_u32(bytes, 92),
            sqlite_version_number: be_u32(bytes, 96),
        })
    }

    pub fn from_page(page: &PlaintextPage) -> Result<Self> {
        if page.page_id != 1 {
            return Err(DatabaseError::CorruptedPage {
                page_id: page.page_id,
                reason: "database header lives on page 1".to_string(),
            });
        }
        Self::from_bytes(&page.data)
    }

    /// Unset (0) means UTF-8, as in a freshly created database.
    pub fn encoding(&self) -> Result<TextEncoding> {
        if self.text_encoding == 0 {
            return Ok(TextEncoding::Utf8);
        }
        TextEncoding::from_header(self.text_encoding).ok_or_else(|| DatabaseError::CorruptedPage {
            page_id: 1,
            reason: format!("unknown text encoding {}", self.text_encoding),
        })
    }
}

/// WAL file header. Every field is stored big-endian; the low bit of the
/// magic only selects the byte order of the checksum words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: u32,
    pub format_version: u32,
    pub page_size: u32,
    pub checkpoint_seq: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum1: u32,
    pub checksum2: u32,
}

impl WalHeader {
    pub fn big_endian_checksums(&self) -> bool {
        self.magic == WAL_MAGIC_BE
    }

    pub fn page_size_bytes(&self) -> usize {
        if self.page_size == 1 { MAX_PAGE_SIZE } else { self.page_size as usize }
    }

    pub fn salts(&self) -> (u32, u32) {
        (self.salt1, self.salt2)
    }

    pub fn to_bytes(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buffer = [0u8; WAL_HEADER_SIZE];
        for (i, field) in [
            self.magic,
            self.format_version,
            self.page_size,
            self.checkpoint_seq,
            self.salt1,
            self.salt2,
            self.checksum1,
            self.checksum2,
        ]
        .into_iter()
        .enumerate()
        {
            buffer[i * 4..i * 4 + 4].copy_from_slice(&field.to_be_bytes());
        }
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAL_HEADER_SIZE {
            return Err(DatabaseError::InvalidWalHeader {
                reason: format!("header is {} bytes, need {WAL_HEADER_SIZE}", bytes.len()),
            });
        }
        let header = Self {
            magic: be_u32(bytes, 0),
            format_version: be_u32(bytes, 4),
            page_size: be_u32(bytes, 8),
            checkpoint_seq: be_u32(bytes, 12),
            salt1: be_u32(bytes, 16),
            salt2: be_u32(bytes, 20),
            checksum1: be_u32(bytes, 24),
            checksum2: be_u32(bytes, 28),
        };
        if header.magic != WAL_MAGIC_LE && header.magic != WAL_MAGIC_BE {
            return Err(DatabaseError::InvalidWalHeader {
                reason: format!("bad magic {:#010x}", header.magic),
            });
        }
        if header.format_version != WAL_FORMAT_VERSION {
            return Err(DatabaseError::InvalidWalHeader {
                reason: format!("unsupported format version {}", header.format_version),
            });
        }
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalFrameHeader {
    pub page_id: PageId,
    /// Database size in pages after a commit; zero on non-commit frames.
    pub commit_size: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub checksum1: u32,
    pub checksum2: u32,
}

impl WalFrameHeader {
    pub fn is_commit(&self) -> bool {
        self.commit_size != 0
    }

    pub fn to_bytes(&self) -> [u8; WAL_FRAME_HEADER_SIZE] {
        let mut buffer = [0u8; WAL_FRAME_HEADER_SIZE];
        for (i, field) in [
            self.page_id,
            self.commit_size,
            self.salt1,
            self.salt2,
            self.checksum1,
            self.checksum2,
        ]
        .into_iter()
        .enumerate()
        {
            buffer[i * 4..i * 4 + 4].copy_from_slice(&field.to_be_bytes());
        }
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAL_FRAME_HEADER_SIZE {
            return Err(DatabaseError::InvalidWalHeader {
                reason: "truncated frame header".to_string(),
            });
        }
        Ok(Self {
            page_id: be_u32(bytes, 0),
            commit_size: be_u32(bytes, 4),
            salt1: be_u32(bytes, 8),
            salt2: be_u32(bytes, 12),
            checksum1: be_u32(bytes, 16),
            checksum2: be_u32(bytes, 20),
        })
    }
}
