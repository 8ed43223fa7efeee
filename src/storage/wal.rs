use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    storage::{
        WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE,
        header::{WalFrameHeader, WalHeader},
        page_store::PageSource,
    },
    types::{
        FrameSeq, PageId, SALT_SIZE,
        error::{DatabaseError, Result},
        page::{PageOrigin, RawPage},
    },
    utils::hash::wal_checksum,
};

/// How a frame relates to the current WAL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    /// Intact checksum chain, at or before the last commit frame.
    Committed,
    /// Intact checksum chain after the last commit: an unfinished transaction.
    Uncommitted,
    /// Past a salt or checksum break: left over from an earlier generation.
    Stale,
}

#[derive(Debug, Clone)]
pub struct WalFrame {
    /// 1-based position in the file.
    pub seq: FrameSeq,
    pub page_id: PageId,
    pub commit_size: u32,
    pub salts: (u32, u32),
    /// WAL resets since the frame was written, 0 for the current
    /// generation. Each reset increments salt-1.
    pub generation: u32,
    pub offset: u64,
    pub state: FrameState,
}

impl WalFrame {
    pub fn is_commit(&self) -> bool {
        self.commit_size != 0
    }
}

#[derive(Debug)]
pub struct WalFile {
    file: File,
    path: PathBuf,
    page_size: usize,
    header: Option<WalHeader>,
    header_checksum_ok: bool,
    frames: Vec<WalFrame>,
    by_page: BTreeMap<PageId, Vec<FrameSeq>>,
    txn_end: Vec<FrameSeq>,
}

impl WalFile {
    /// Opens and indexes a WAL. Every frame is read once to verify the
    /// checksum chain; page bytes are not retained.
    ///
    /// `expected_salt` is the main database's SQLCipher salt. A WAL whose
    /// page-1 frames carry a different salt belongs to another database.
    pub fn open(path: impl AsRef<Path>, page_size: usize, expected_salt: &[u8; SALT_SIZE]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();

        if size == 0 {
            debug!(path = %path.display(), "empty WAL");
            return Ok(Self {
                file,
                path,
                page_size,
                header: None,
                header_checksum_ok: true,
                frames: Vec::new(),
                by_page: BTreeMap::new(),
                txn_end: Vec::new(),
            });
        }
        if size < WAL_HEADER_SIZE as u64 {
            return Err(DatabaseError::InvalidWalHeader {
                reason: format!("file is {size} bytes, shorter than the header"),
            });
        }

        let mut header_bytes = [0u8; WAL_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = WalHeader::from_bytes(&header_bytes)?;
        if header.page_size_bytes() != page_size {
            return Err(DatabaseError::InvalidWalHeader {
                reason: format!(
                    "page size {} does not match database page size {page_size}",
                    header.page_size_bytes()
                ),
            });
        }
        let big_endian = header.big_endian_checksums();
        let header_checksum_ok =
            wal_checksum(&header_bytes[..24], big_endian, (0, 0)) == (header.checksum1, header.checksum2);
        if !header_checksum_ok {
            warn!(path = %path.display(), "WAL header checksum mismatch, no frame is treated as committed");
        }

        let frame_size = (WAL_FRAME_HEADER_SIZE + page_size) as u64;
        let frame_count = (size - WAL_HEADER_SIZE as u64) / frame_size;
        let trailing = (size - WAL_HEADER_SIZE as u64) % frame_size;
        if trailing != 0 {
            debug!(trailing, "ignoring partial frame at end of WAL");
        }

        let mut frames = Vec::with_capacity(frame_count as usize);
        let mut in_prefix = Vec::with_capacity(frame_count as usize);
        let mut chain_intact = header_checksum_ok;
        let mut running = (header.checksum1, header.checksum2);
        let mut last_commit: Option<FrameSeq> = None;
        let mut salt_probe: Option<(bool, [u8; SALT_SIZE])> = None;

        let mut frame_header = [0u8; WAL_FRAME_HEADER_SIZE];
        let mut page = vec![0u8; page_size];
        for index in 0..frame_count {
            let seq = index + 1;
            let offset = WAL_HEADER_SIZE as u64 + index * frame_size;
            file.read_exact(&mut frame_header)?;
            file.read_exact(&mut page)?;
            let fh = WalFrameHeader::from_bytes(&frame_header)?;

            let salts_match = (fh.salt1, fh.salt2) == header.salts();
            if chain_intact && salts_match {
                let sum = wal_checksum(&frame_header[..8], big_endian, running);
                let sum = wal_checksum(&page, big_endian, sum);
                if sum == (fh.checksum1, fh.checksum2) {
                    running = sum;
                    if fh.is_commit() {
                        last_commit = Some(seq);
                    }
                } else {
                    debug!(frame_seq = seq, "WAL checksum chain breaks");
                    chain_intact = false;
                }
            } else if chain_intact {
                debug!(frame_seq = seq, "WAL salt changes, later frames are stale");
                chain_intact = false;
            }

            if fh.page_id == 1 {
                let mut salt = [0u8; SALT_SIZE];
                salt.copy_from_slice(&page[..SALT_SIZE]);
                // prefer a frame from the current generation
                if salt_probe.is_none_or(|(current, _)| !current && chain_intact) {
                    salt_probe = Some((chain_intact, salt));
                }
            }

            in_prefix.push(chain_intact);
            frames.push(WalFrame {
                seq,
                page_id: fh.page_id,
                commit_size: fh.commit_size,
                salts: (fh.salt1, fh.salt2),
                generation: generation_of((fh.salt1, fh.salt2), header.salts()),
                offset,
                state: FrameState::Stale,
            });
        }

        if let Some((_, salt)) = salt_probe {
            if &salt != expected_salt {
                return Err(DatabaseError::InvalidWalHeader {
                    reason: "salt does not match the main database".to_string(),
                });
            }
        } else if !frames.is_empty() {
            debug!("WAL has no page-1 frame, salt cannot be cross-checked");
        }

        for (frame, intact) in frames.iter_mut().zip(&in_prefix) {
            frame.state = match (intact, last_commit) {
                (true, Some(commit)) if frame.seq <= commit => FrameState::Committed,
                (true, _) => FrameState::Uncommitted,
                (false, _) => FrameState::Stale,
            };
        }

        let mut by_page: BTreeMap<PageId, Vec<FrameSeq>> = BTreeMap::new();
        for frame in &frames {
            by_page.entry(frame.page_id).or_default().push(frame.seq);
        }

        // A frame's transaction closes at the next commit frame of the same
        // generation, or at the generation's last frame.
        let mut txn_end = vec![0; frames.len()];
        let mut closing: Option<(FrameSeq, (u32, u32))> = None;
        for frame in frames.iter().rev() {
            let end = match closing {
                Some((end, salts)) if salts == frame.salts && !frame.is_commit() => end,
                _ => frame.seq,
            };
            if frame.is_commit() || closing.is_none_or(|(_, salts)| salts != frame.salts) {
                closing = Some((frame.seq, frame.salts));
            }
            txn_end[(frame.seq - 1) as usize] = end;
        }

        debug!(
            path = %path.display(),
            frames = frames.len(),
            last_commit = ?last_commit,
            "indexed WAL"
        );

        Ok(Self {
            file,
            path,
            page_size,
            header: Some(header),
            header_checksum_ok,
            frames,
            by_page,
            txn_end,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Option<&WalHeader> {
        self.header.as_ref()
    }

    pub fn header_checksum_ok(&self) -> bool {
        self.header_checksum_ok
    }

    pub fn frames(&self) -> &[WalFrame] {
        &self.frames
    }

    pub fn frame(&self, seq: FrameSeq) -> Option<&WalFrame> {
        seq.checked_sub(1).and_then(|i| self.frames.get(i as usize))
    }

    pub fn max_page_id(&self) -> PageId {
        self.by_page.keys().next_back().copied().unwrap_or(0)
    }

    pub fn read_frame(&mut self, seq: FrameSeq) -> Result<RawPage> {
        let frame = self.frame(seq).cloned().ok_or(DatabaseError::PageOutOfRange {
            page_id: 0,
            page_count: self.frames.len(),
        })?;
        self.file
            .seek(SeekFrom::Start(frame.offset + WAL_FRAME_HEADER_SIZE as u64))?;
        let mut bytes = vec![0u8; self.page_size];
        self.file.read_exact(&mut bytes)?;
        Ok(RawPage {
            page_id: frame.page_id,
            bytes,
            origin: PageOrigin::Wal {
                frame_seq: frame.seq,
                commit: frame.is_commit(),
            },
        })
    }

    /// Newest committed frame for `page_id`: the page as a reader of the
    /// live database would see it.
    pub fn latest_committed(&self, page_id: PageId) -> Option<FrameSeq> {
        self.by_page.get(&page_id)?.iter().rev().copied().find(|seq| {
            self.frame(*seq)
                .is_some_and(|f| f.state == FrameState::Committed)
        })
    }

    /// Newest frame for `page_id` at or before `bound` written in the same
    /// generation as frame `bound`.
    pub fn frame_as_of(&self, page_id: PageId, bound: FrameSeq) -> Option<FrameSeq> {
        let salts = self.frame(bound)?.salts;
        self.by_page
            .get(&page_id)?
            .iter()
            .rev()
            .copied()
            .filter(|seq| *seq <= bound)
            .find(|seq| self.frame(*seq).is_some_and(|f| f.salts == salts))
    }

    /// Last frame of the transaction containing `seq`.
    pub fn txn_end(&self, seq: FrameSeq) -> FrameSeq {
        seq.checked_sub(1)
            .and_then(|i| self.txn_end.get(i as usize))
            .copied()
            .unwrap_or(seq)
    }
}

impl PageSource for WalFile {
    fn unit_count(&self) -> usize {
        self.frames.len()
    }

    fn read_unit(&mut self, index: usize) -> Result<RawPage> {
        self.read_frame(index as FrameSeq + 1)
    }
}

/// Generations between a frame's salts and the header's. A frame whose
/// salt-1 cannot be placed behind the header's is ranked oldest.
fn generation_of(frame: (u32, u32), header: (u32, u32)) -> u32 {
    if frame == header {
        return 0;
    }
    match header.0.wrapping_sub(frame.0) {
        0 => u32::MAX,
        resets => resets,
    }
}
