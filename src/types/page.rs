use serde::{Deserialize, Serialize};

use crate::types::{
    CELL_POINTER_SIZE, FrameSeq, HEADER_SIZE, PageId,
    error::{DatabaseError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageType {
    InteriorIndex = 2,
    InteriorTable = 5,
    LeafIndex = 10,
    LeafTable = 13,
}

impl PageType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            2 => Ok(PageType::InteriorIndex),
            5 => Ok(PageType::InteriorTable),
            10 => Ok(PageType::LeafIndex),
            13 => Ok(PageType::LeafTable),
            _ => Err(DatabaseError::InvalidPageType(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PageType::InteriorIndex => 2,
            PageType::InteriorTable => 5,
            PageType::LeafIndex => 10,
            PageType::LeafTable => 13,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn header_size(&self) -> usize {
        if self.is_leaf() { 8 } else { 12 }
    }
}

/// Where a page's bytes were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageOrigin {
    MainDb,
    Wal { frame_seq: FrameSeq, commit: bool },
}

impl PageOrigin {
    pub fn frame_seq(&self) -> Option<FrameSeq> {
        match self {
            PageOrigin::MainDb => None,
            PageOrigin::Wal { frame_seq, .. } => Some(*frame_seq),
        }
    }
}

/// Encrypted page bytes exactly as stored on disk.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub page_id: PageId,
    pub bytes: Vec<u8>,
    pub origin: PageOrigin,
}

/// A decrypted, authenticated page. `data` holds the usable region only;
/// the IV and HMAC tail is gone. On page 1 the salt sits in bytes 0..16.
#[derive(Debug, Clone)]
pub struct PlaintextPage {
    pub page_id: PageId,
    pub data: Vec<u8>,
    pub origin: PageOrigin,
}

impl PlaintextPage {
    pub fn header_offset(&self) -> usize {
        if self.page_id == 1 { HEADER_SIZE } else { 0 }
    }

    pub fn usable_size(&self) -> usize {
        self.data.len()
    }

    pub fn btree_header(&self) -> Result<BtreePageHeader> {
        BtreePageHeader::parse(&self.data, self.header_offset(), self.page_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtreePageHeader {
    pub page_type: PageType,
    pub first_freeblock: u16,
    pub cell_count: u16,
    pub cell_content_start: u32,
    pub fragmented_free_bytes: u8,
    pub right_child: Option<PageId>,
    offset: usize,
}

impl BtreePageHeader {
    pub fn parse(data: &[u8], offset: usize, page_id: PageId) -> Result<Self> {
        let type_byte = *data.get(offset).ok_or_else(|| DatabaseError::CorruptedPage {
            page_id,
            reason: "page too small for b-tree header".to_string(),
        })?;
        let page_type = PageType::from_u8(type_byte)?;
        let size = page_type.header_size();
        let header = data
            .get(offset..offset + size)
            .ok_or_else(|| DatabaseError::CorruptedPage {
                page_id,
                reason: format!("truncated {size}-byte b-tree header"),
            })?;

        let raw_content_start = u16::from_be_bytes([header[5], header[6]]);
        let right_child = if page_type.is_leaf() {
            None
        } else {
            Some(u32::from_be_bytes([header[8], header[9], header[10], header[11]]))
        };

        Ok(Self {
            page_type,
            first_freeblock: u16::from_be_bytes([header[1], header[2]]),
            cell_count: u16::from_be_bytes([header[3], header[4]]),
            // zero means 65536
            cell_content_start: if raw_content_start == 0 { 65536 } else { u32::from(raw_content_start) },
            fragmented_free_bytes: header[7],
            right_child,
            offset,
        })
    }

    pub fn size(&self) -> usize {
        self.page_type.header_size()
    }

    /// Offsets of every cell on the page, in cell-pointer order.
    pub fn cell_offsets(&self, data: &[u8], page_id: PageId) -> Result<Vec<usize>> {
        let start = self.offset + self.size();
        let end = start + self.cell_count as usize * CELL_POINTER_SIZE;
        let pointers = data.get(start..end).ok_or_else(|| DatabaseError::CorruptedPage {
            page_id,
            reason: format!("cell pointer array of {} entries overruns page", self.cell_count),
        })?;
        Ok(pointers
            .chunks_exact(CELL_POINTER_SIZE)
            .map(|p| u16::from_be_bytes([p[0], p[1]]) as usize)
            .collect())
    }
}
