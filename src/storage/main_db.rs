use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    storage::page_store::PageSource,
    types::{
        PageId, SALT_SIZE,
        error::{DatabaseError, Result},
        page::{PageOrigin, RawPage},
    },
};

/// The encrypted main database file, read one page at a time.
#[derive(Debug)]
pub struct MainDatabase {
    file: File,
    path: PathBuf,
    page_size: usize,
    page_count: usize,
    salt: [u8; SALT_SIZE],
}

impl MainDatabase {
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();
        if size == 0 || size % page_size as u64 != 0 {
            return Err(DatabaseError::TruncatedFile { size, page_size });
        }

        let mut salt = [0u8; SALT_SIZE];
        file.read_exact(&mut salt)?;
        let page_count = (size / page_size as u64) as usize;
        debug!(path = %path.display(), page_count, "opened main database");

        Ok(Self {
            file,
            path,
            page_size,
            page_count,
            salt,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_page(&mut self, page_id: PageId) -> Result<RawPage> {
        if page_id == 0 || page_id as usize > self.page_count {
            return Err(DatabaseError::PageOutOfRange {
                page_id,
                page_count: self.page_count,
            });
        }
        let offset = (u64::from(page_id) - 1) * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; self.page_size];
        self.file.read_exact(&mut bytes)?;
        Ok(RawPage {
            page_id,
            bytes,
            origin: PageOrigin::MainDb,
        })
    }
}

impl PageSource for MainDatabase {
    fn unit_count(&self) -> usize {
        self.page_count
    }

    fn read_unit(&mut self, index: usize) -> Result<RawPage> {
        self.read_page(index as PageId + 1)
    }
}
