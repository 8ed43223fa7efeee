//! Writes real SQLCipher-format databases and WAL files from logical table
//! contents. Used by the integration tests and benchmarks.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::{
    crypto::{CipherSettings, IV_SIZE, codec::PageCodec, kdf::{KeyDeriver, KeyMaterial}},
    storage::{
        WAL_FORMAT_VERSION, WAL_MAGIC_BE, WAL_MAGIC_LE, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE,
        bplus_tree::local_payload_size,
        header::{DatabaseHeader, WalFrameHeader, WalHeader},
    },
    types::{
        HEADER_SIZE, OVERFLOW_POINTER_SIZE, PageId, RowId, SALT_SIZE,
        error::Result,
        page::PageType,
        value::Value,
    },
    utils::hash::wal_checksum,
};

pub const TEST_PASSPHRASE: &str = "correct horse battery staple";
pub const TEST_SALT: [u8; SALT_SIZE] = *b"pulih-test-salt!";
pub const TEST_KDF_ITERATIONS: u32 = 4;

/// SQLCipher 4 layout with a cheap KDF.
pub fn test_settings() -> CipherSettings {
    CipherSettings {
        kdf_iterations: TEST_KDF_ITERATIONS,
        ..CipherSettings::default()
    }
}

pub fn test_key() -> KeyMaterial {
    KeyMaterial::passphrase(TEST_PASSPHRASE).expect("test passphrase is not empty")
}

/// A scratch directory holding `db.sqlite` and, optionally, its WAL.
pub struct TempDatabase {
    dir: TempDir,
    pub path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> io::Result<Self> {
        Self::with_prefix("pulih")
    }

    pub fn with_prefix(prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.path().join("db.sqlite");
        Ok(Self { dir, path })
    }

    pub fn wal_path(&self) -> PathBuf {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");
        PathBuf::from(wal)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

pub fn write_varint(value: u64, out: &mut Vec<u8>) {
    if value > 0x00ff_ffff_ffff_ffff {
        let mut buf = [0u8; 9];
        buf[8] = value as u8;
        let mut rest = value >> 8;
        for byte in buf[..8].iter_mut().rev() {
            *byte = (rest & 0x7f) as u8 | 0x80;
            rest >>= 7;
        }
        out.extend_from_slice(&buf);
        return;
    }
    let mut groups = Vec::with_capacity(9);
    let mut rest = value;
    loop {
        groups.push((rest & 0x7f) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (i, group) in groups.iter().rev().enumerate() {
        out.push(if i < last { group | 0x80 } else { *group });
    }
}

fn varint_len(value: u64) -> usize {
    let mut buf = Vec::with_capacity(9);
    write_varint(value, &mut buf);
    buf.len()
}

fn integer_width(v: i64) -> (u64, usize) {
    match v {
        0 => (8, 0),
        1 => (9, 0),
        -128..=127 => (1, 1),
        -32768..=32767 => (2, 2),
        -8_388_608..=8_388_607 => (3, 3),
        -2_147_483_648..=2_147_483_647 => (4, 4),
        -140_737_488_355_328..=140_737_488_355_327 => (5, 6),
        _ => (6, 8),
    }
}

/// Serializes values in SQLite record format, UTF-8 text.
pub fn encode_record(values: &[Value]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut body = Vec::new();
    for value in values {
        match value {
            Value::Null => write_varint(0, &mut types),
            Value::Integer(v) => {
                let (code, width) = integer_width(*v);
                write_varint(code, &mut types);
                body.extend_from_slice(&v.to_be_bytes()[8 - width..]);
            }
            Value::Real(f) => {
                write_varint(7, &mut types);
                body.extend_from_slice(&f.to_be_bytes());
            }
            Value::Text(s) => {
                write_varint(13 + 2 * s.len() as u64, &mut types);
                body.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                write_varint(12 + 2 * b.len() as u64, &mut types);
                body.extend_from_slice(b);
            }
        }
    }
    let header_len = (1..=9)
        .map(|n| types.len() + n)
        .find(|len| varint_len(*len as u64) == len - types.len())
        .unwrap_or(types.len() + 9);

    let mut record = Vec::with_capacity(header_len + body.len());
    write_varint(header_len as u64, &mut record);
    record.extend_from_slice(&types);
    record.extend_from_slice(&body);
    record
}

/// Lays out a b-tree page in a usable-size buffer. Cells are packed from
/// the end of the page downward.
fn btree_page(usable: usize, offset: usize, page_type: PageType, cells: &[Vec<u8>], right_child: Option<PageId>) -> Vec<u8> {
    let mut page = vec![0u8; usable];
    let header_size = page_type.header_size();
    let mut content_start = usable;
    let mut pointers = Vec::with_capacity(cells.len());
    for cell in cells {
        content_start -= cell.len();
        page[content_start..content_start + cell.len()].copy_from_slice(cell);
        pointers.push(content_start as u16);
    }

    page[offset] = page_type.as_u8();
    page[offset + 3..offset + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
    page[offset + 5..offset + 7].copy_from_slice(&(content_start as u16).to_be_bytes());
    if let Some(child) = right_child {
        page[offset + 8..offset + 12].copy_from_slice(&child.to_be_bytes());
    }
    let mut at = offset + header_size;
    for pointer in pointers {
        page[at..at + 2].copy_from_slice(&pointer.to_be_bytes());
        at += 2;
    }
    page
}

fn interior_cells(children: &[(PageId, RowId)]) -> Vec<Vec<u8>> {
    children
        .iter()
        .map(|(child, max_row)| {
            let mut cell = child.to_be_bytes().to_vec();
            write_varint(*max_row as u64, &mut cell);
            cell
        })
        .collect()
}

fn fits(usable: usize, offset: usize, header_size: usize, cells: &[Vec<u8>], extra: &[u8]) -> bool {
    let content: usize = cells.iter().map(Vec::len).sum::<usize>() + extra.len();
    offset + header_size + 2 * (cells.len() + 1) + content <= usable
}

/// Builds an encrypted database image page by page.
pub struct FixtureBuilder {
    settings: CipherSettings,
    codec: PageCodec,
    salt: [u8; SALT_SIZE],
    pages: BTreeMap<PageId, Vec<u8>>,
    next_page: PageId,
    schema: Vec<Vec<Value>>,
}

impl FixtureBuilder {
    pub fn new(key: &KeyMaterial, settings: CipherSettings, salt: [u8; SALT_SIZE]) -> Result<Self> {
        let keys = KeyDeriver::new(&settings).derive(key, &salt)?;
        Ok(Self {
            codec: PageCodec::new(keys, &settings)?,
            settings,
            salt,
            pages: BTreeMap::new(),
            next_page: 2,
            schema: Vec::new(),
        })
    }

    /// Test key, salt and settings.
    pub fn standard() -> Result<Self> {
        Self::new(&test_key(), test_settings(), TEST_SALT)
    }

    pub fn settings(&self) -> &CipherSettings {
        &self.settings
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    pub fn codec(&self) -> &PageCodec {
        &self.codec
    }

    pub fn usable(&self) -> usize {
        self.settings.usable_size()
    }

    pub fn page_count(&self) -> u32 {
        self.next_page - 1
    }

    /// Reserves a page number past everything written so far.
    pub fn allocate(&mut self) -> PageId {
        let page_id = self.next_page;
        self.next_page += 1;
        page_id
    }

    /// Encodes one table-leaf cell, spilling to newly allocated overflow
    /// pages when the record does not fit locally.
    fn leaf_cell(&mut self, row_id: RowId, values: &[Value], overflow: &mut Vec<(PageId, Vec<u8>)>) -> Vec<u8> {
        let payload = encode_record(values);
        let usable = self.usable();
        let local = local_payload_size(payload.len() as u64, usable);

        let mut cell = Vec::with_capacity(local + 18 + OVERFLOW_POINTER_SIZE);
        write_varint(payload.len() as u64, &mut cell);
        write_varint(row_id as u64, &mut cell);
        cell.extend_from_slice(&payload[..local]);
        if local < payload.len() {
            let chunks: Vec<&[u8]> = payload[local..].chunks(usable - OVERFLOW_POINTER_SIZE).collect();
            let ids: Vec<PageId> = chunks.iter().map(|_| self.allocate()).collect();
            cell.extend_from_slice(&ids[0].to_be_bytes());
            for (i, chunk) in chunks.iter().enumerate() {
                let mut page = vec![0u8; usable];
                let next = ids.get(i + 1).copied().unwrap_or(0);
                page[..OVERFLOW_POINTER_SIZE].copy_from_slice(&next.to_be_bytes());
                page[OVERFLOW_POINTER_SIZE..OVERFLOW_POINTER_SIZE + chunk.len()].copy_from_slice(chunk);
                overflow.push((ids[i], page));
            }
        }
        cell
    }

    /// Packs rows into as many leaf pages as needed. Returns each leaf's
    /// plaintext and largest rowid, plus any overflow pages.
    fn leaves(&mut self, rows: &[(RowId, Vec<Value>)]) -> (Vec<(Vec<u8>, RowId)>, Vec<(PageId, Vec<u8>)>) {
        let usable = self.usable();
        let header_size = PageType::LeafTable.header_size();
        let mut overflow = Vec::new();
        let mut leaves = Vec::new();
        let mut cells: Vec<Vec<u8>> = Vec::new();
        let mut max_row = 0;
        for (row_id, values) in rows {
            let cell = self.leaf_cell(*row_id, values, &mut overflow);
            if !cells.is_empty() && !fits(usable, 0, header_size, &cells, &cell) {
                leaves.push((btree_page(usable, 0, PageType::LeafTable, &cells, None), max_row));
                cells.clear();
            }
            cells.push(cell);
            max_row = *row_id;
        }
        leaves.push((btree_page(usable, 0, PageType::LeafTable, &cells, None), max_row));
        (leaves, overflow)
    }

    /// Adds a table and its rows (ascending rowids). Returns the root page.
    pub fn create_table(&mut self, name: &str, sql: &str, rows: &[(RowId, Vec<Value>)]) -> PageId {
        let (leaves, overflow) = self.leaves(rows);
        self.pages.extend(overflow);

        let root = if leaves.len() == 1 {
            let page_id = self.allocate();
            if let Some((page, _)) = leaves.into_iter().next() {
                self.pages.insert(page_id, page);
            }
            page_id
        } else {
            let mut children = Vec::with_capacity(leaves.len());
            for (page, max_row) in leaves {
                let page_id = self.allocate();
                self.pages.insert(page_id, page);
                children.push((page_id, max_row));
            }
            let right = children.pop().map(|(id, _)| id);
            let root = self.allocate();
            let page = btree_page(self.usable(), 0, PageType::InteriorTable, &interior_cells(&children), right);
            self.pages.insert(root, page);
            root
        };

        self.schema.push(vec![
            Value::Text("table".to_string()),
            Value::Text(name.to_string()),
            Value::Text(name.to_string()),
            Value::Integer(i64::from(root)),
            Value::Text(sql.to_string()),
        ]);
        root
    }

    /// Leaf pages currently making up the tree rooted at `root`.
    pub fn leaf_pages(&self, root: PageId) -> Vec<PageId> {
        let Some(page) = self.pages.get(&root) else {
            return Vec::new();
        };
        if page[0] == PageType::LeafTable.as_u8() {
            return vec![root];
        }
        let count = u16::from_be_bytes([page[3], page[4]]) as usize;
        let header_size = PageType::InteriorTable.header_size();
        let mut leaves: Vec<PageId> = (0..count)
            .map(|i| {
                let pointer = u16::from_be_bytes([page[header_size + 2 * i], page[header_size + 2 * i + 1]]) as usize;
                u32::from_be_bytes([page[pointer], page[pointer + 1], page[pointer + 2], page[pointer + 3]])
            })
            .collect();
        leaves.push(u32::from_be_bytes([page[8], page[9], page[10], page[11]]));
        leaves
    }

    /// Plaintext of page 1: database header plus the schema leaf.
    pub fn schema_page(&self) -> Vec<u8> {
        let cells: Vec<Vec<u8>> = self
            .schema
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let payload = encode_record(record);
                let mut cell = Vec::new();
                write_varint(payload.len() as u64, &mut cell);
                write_varint(i as u64 + 1, &mut cell);
                cell.extend_from_slice(&payload);
                cell
            })
            .collect();
        let mut page = btree_page(self.usable(), HEADER_SIZE, PageType::LeafTable, &cells, None);
        let header = DatabaseHeader::new(
            self.salt,
            self.settings.page_size,
            self.settings.reserved_size() as u8,
            self.page_count(),
        );
        page[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        page
    }

    fn iv(page_id: PageId, plaintext: &[u8]) -> [u8; IV_SIZE] {
        let digest = Sha256::new()
            .chain_update(page_id.to_be_bytes())
            .chain_update(plaintext)
            .finalize();
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&digest[..IV_SIZE]);
        iv
    }

    pub fn encrypt_page(&self, page_id: PageId, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.codec.encrypt(page_id, plaintext, &Self::iv(page_id, plaintext))
    }

    /// Encrypted page as it would appear in the main file.
    pub fn page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let plaintext = if page_id == 1 {
            self.schema_page()
        } else {
            self.pages
                .get(&page_id)
                .cloned()
                .unwrap_or_else(|| vec![0u8; self.usable()])
        };
        self.encrypt_page(page_id, &plaintext)
    }

    pub fn write_main(&self, path: &Path) -> Result<()> {
        let mut file = Vec::with_capacity(self.settings.page_size * self.page_count() as usize);
        for page_id in 1..=self.page_count() {
            file.extend_from_slice(&self.page(page_id)?);
        }
        fs::write(path, file)?;
        Ok(())
    }

    /// A new version of leaf `page_id` holding `rows`, encrypted, followed
    /// by any overflow pages it needs (freshly allocated page numbers).
    pub fn leaf_frames(&mut self, page_id: PageId, rows: &[(RowId, Vec<Value>)]) -> Result<Vec<(PageId, Vec<u8>)>> {
        let usable = self.usable();
        let mut overflow = Vec::new();
        let cells: Vec<Vec<u8>> = rows
            .iter()
            .map(|(row_id, values)| self.leaf_cell(*row_id, values, &mut overflow))
            .collect();
        let leaf = btree_page(usable, 0, PageType::LeafTable, &cells, None);

        let mut frames = vec![(page_id, self.encrypt_page(page_id, &leaf)?)];
        for (id, page) in overflow {
            frames.push((id, self.encrypt_page(id, &page)?));
        }
        Ok(frames)
    }

    /// An interior table page whose cells point at `children` (page,
    /// largest rowid), encrypted as page `page_id`.
    pub fn interior_frame(&self, page_id: PageId, children: &[(PageId, RowId)], right_child: PageId) -> Result<Vec<u8>> {
        let page = btree_page(self.usable(), 0, PageType::InteriorTable, &interior_cells(children), Some(right_child));
        self.encrypt_page(page_id, &page)
    }
}

struct PendingFrame {
    page_id: PageId,
    commit_size: u32,
    salts: (u32, u32),
    page: Vec<u8>,
}

/// Writes a WAL with valid salts and a cumulative checksum chain.
pub struct WalBuilder {
    page_size: usize,
    big_endian: bool,
    salts: (u32, u32),
    checkpoint_seq: u32,
    frames: Vec<PendingFrame>,
}

impl WalBuilder {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            big_endian: false,
            salts: (0x5a17_0001, 0x0bad_cafe),
            checkpoint_seq: 0,
            frames: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn salts(&self) -> (u32, u32) {
        self.salts
    }

    /// `commit_size` is the database size in pages for a commit frame and
    /// zero otherwise.
    pub fn push(&mut self, page_id: PageId, page: Vec<u8>, commit_size: u32) -> &mut Self {
        let salts = self.salts;
        self.push_with_salts(page_id, page, commit_size, salts)
    }

    /// A frame left over from an earlier WAL generation.
    pub fn push_with_salts(&mut self, page_id: PageId, page: Vec<u8>, commit_size: u32, salts: (u32, u32)) -> &mut Self {
        self.frames.push(PendingFrame {
            page_id,
            commit_size,
            salts,
            page,
        });
        self
    }

    /// File offset of the page bytes of frame `seq` (1-based).
    pub fn page_offset(&self, seq: u64) -> u64 {
        WAL_HEADER_SIZE as u64 + (seq - 1) * (WAL_FRAME_HEADER_SIZE + self.page_size) as u64 + WAL_FRAME_HEADER_SIZE as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = WalHeader {
            magic: if self.big_endian { WAL_MAGIC_BE } else { WAL_MAGIC_LE },
            format_version: WAL_FORMAT_VERSION,
            page_size: if self.page_size == 65536 { 1 } else { self.page_size as u32 },
            checkpoint_seq: self.checkpoint_seq,
            salt1: self.salts.0,
            salt2: self.salts.1,
            checksum1: 0,
            checksum2: 0,
        };
        let (c1, c2) = wal_checksum(&header.to_bytes()[..24], self.big_endian, (0, 0));
        header.checksum1 = c1;
        header.checksum2 = c2;

        let mut out = header.to_bytes().to_vec();
        let mut running = (c1, c2);
        for frame in &self.frames {
            let mut fh = WalFrameHeader {
                page_id: frame.page_id,
                commit_size: frame.commit_size,
                salt1: frame.salts.0,
                salt2: frame.salts.1,
                checksum1: 0,
                checksum2: 0,
            };
            let sum = wal_checksum(&fh.to_bytes()[..8], self.big_endian, running);
            let sum = wal_checksum(&frame.page, self.big_endian, sum);
            running = sum;
            fh.checksum1 = sum.0;
            fh.checksum2 = sum.1;
            out.extend_from_slice(&fh.to_bytes());
            out.extend_from_slice(&frame.page);
        }
        out
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }
}
