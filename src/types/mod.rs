pub mod error;
pub mod page;
pub mod record;
pub mod row;
pub mod value;

// Common type aliases
pub type PageId = u32;
pub type RowId = i64;
pub type FrameSeq = u64;

// Constants following SQLite / SQLCipher file formats
pub const PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 65536;
pub const HEADER_SIZE: usize = 100; // Database header size, page 1 only
pub const SALT_SIZE: usize = 16; // Plaintext KDF salt at the start of page 1

pub const CELL_POINTER_SIZE: usize = 2;
pub const OVERFLOW_POINTER_SIZE: usize = 4;
pub const MAX_OVERFLOW_CHAIN: usize = 1 << 20; // hard cap on pages in one overflow chain
