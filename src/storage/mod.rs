pub mod bplus_tree;
pub mod header;
pub mod main_db;
pub mod page_store;
pub mod schema;
pub mod wal;

pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;
pub const WAL_MAGIC_LE: u32 = 0x377f_0682;
pub const WAL_MAGIC_BE: u32 = 0x377f_0683;
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;
