use crate::{
    crypto::codec::PageCodec,
    storage::{main_db::MainDatabase, wal::WalFile},
    types::{
        FrameSeq, PageId,
        error::{DatabaseError, Result},
        page::{PlaintextPage, RawPage},
    },
};

/// A finite sequence of encrypted pages addressable by position.
pub trait PageSource {
    fn unit_count(&self) -> usize;
    fn read_unit(&mut self, index: usize) -> Result<RawPage>;

    /// Lazy pass over every unit from the start. Call again to restart.
    fn units(&mut self) -> PageUnits<'_, Self>
    where
        Self: Sized,
    {
        PageUnits {
            source: self,
            next: 0,
        }
    }
}

pub struct PageUnits<'a, S: PageSource> {
    source: &'a mut S,
    next: usize,
}

impl<S: PageSource> Iterator for PageUnits<'_, S> {
    type Item = Result<RawPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.unit_count() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.source.read_unit(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.source.unit_count().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// Supplies decrypted pages by page number to the b-tree walkers.
pub trait PageFetcher {
    fn fetch(&mut self, page_id: PageId) -> Result<PlaintextPage>;

    /// Upper bound on distinct pages a single traversal may visit.
    fn page_limit(&self) -> usize;
}

/// Which version of the database a [`PageResolver`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// The main file alone, ignoring the WAL.
    MainOnly,
    /// Main file overlaid with every committed WAL frame.
    Live,
    /// The state right after WAL frame `n`, within that frame's generation.
    AsOf(FrameSeq),
}

pub struct PageResolver<'a> {
    main: &'a mut MainDatabase,
    wal: Option<&'a mut WalFile>,
    codec: &'a PageCodec,
    horizon: Horizon,
}

impl<'a> PageResolver<'a> {
    pub fn new(
        main: &'a mut MainDatabase,
        wal: Option<&'a mut WalFile>,
        codec: &'a PageCodec,
        horizon: Horizon,
    ) -> Self {
        Self {
            main,
            wal,
            codec,
            horizon,
        }
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    fn wal_frame_for(&self, page_id: PageId) -> Option<FrameSeq> {
        let wal = self.wal.as_deref()?;
        match self.horizon {
            Horizon::MainOnly => None,
            Horizon::Live => wal.latest_committed(page_id),
            Horizon::AsOf(bound) => wal.frame_as_of(page_id, bound),
        }
    }

    pub fn read_raw(&mut self, page_id: PageId) -> Result<RawPage> {
        match (self.wal_frame_for(page_id), self.wal.as_deref_mut()) {
            (Some(seq), Some(wal)) => wal.read_frame(seq),
            _ => self.main.read_page(page_id),
        }
    }
}

impl PageFetcher for PageResolver<'_> {
    fn fetch(&mut self, page_id: PageId) -> Result<PlaintextPage> {
        if page_id == 0 {
            return Err(DatabaseError::PageOutOfRange {
                page_id,
                page_count: self.page_limit(),
            });
        }
        let raw = self.read_raw(page_id)?;
        self.codec.decrypt(&raw)
    }

    fn page_limit(&self) -> usize {
        let wal_pages = self.wal.as_deref().map_or(0, |w| w.max_page_id() as usize);
        self.main.page_count().max(wal_pages)
    }
}
