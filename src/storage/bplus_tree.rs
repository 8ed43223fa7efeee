use std::collections::HashSet;

use tracing::warn;

use crate::{
    storage::page_store::PageFetcher,
    types::{
        MAX_OVERFLOW_CHAIN, OVERFLOW_POINTER_SIZE, PageId, RowId,
        error::{DatabaseError, Result},
        page::{PageType, PlaintextPage},
        record::read_varint,
    },
};

// SQLITE_MAX_LENGTH
const MAX_PAYLOAD_SIZE: usize = 1_000_000_000;

/// A table-leaf cell with its payload split into the on-page part and the
/// head of the overflow chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub page_id: PageId,
    pub row_id: RowId,
    pub payload_size: u64,
    pub local: Vec<u8>,
    pub first_overflow: Option<PageId>,
}

#[derive(Debug)]
pub enum BtreeNode {
    /// Cells in cell-pointer order. A cell that cannot be decoded is kept
    /// as an error so the rest of the page is still usable.
    Leaf(Vec<Result<LeafCell>>),
    /// Child pages left to right, the right-most child last.
    Interior(Vec<PageId>),
    /// Index b-tree pages carry no table rows.
    Index(PageType),
}

/// Bytes of a table-leaf payload stored on the page itself, given the
/// total payload size and the usable page size.
pub fn local_payload_size(payload_size: u64, usable: usize) -> usize {
    let max_local = usable - 35;
    if payload_size <= max_local as u64 {
        return payload_size as usize;
    }
    let min_local = ((usable - 12) * 32 / 255) - 23;
    let surplus = min_local as u64 + (payload_size - min_local as u64) % (usable as u64 - 4);
    if surplus <= max_local as u64 {
        surplus as usize
    } else {
        min_local
    }
}

pub fn parse_table_page(page: &PlaintextPage) -> Result<BtreeNode> {
    let header = page.btree_header()?;
    let offsets = header.cell_offsets(&page.data, page.page_id)?;

    match header.page_type {
        PageType::LeafTable => Ok(BtreeNode::Leaf(
            offsets
                .into_iter()
                .map(|offset| parse_leaf_cell(page, offset))
                .collect(),
        )),
        PageType::InteriorTable => {
            let mut children = Vec::with_capacity(offsets.len() + 1);
            for offset in offsets {
                let pointer = page
                    .data
                    .get(offset..offset + 4)
                    .ok_or_else(|| DatabaseError::CorruptedPage {
                        page_id: page.page_id,
                        reason: format!("interior cell at {offset} overruns page"),
                    })?;
                children.push(u32::from_be_bytes([pointer[0], pointer[1], pointer[2], pointer[3]]));
            }
            children.extend(header.right_child);
            Ok(BtreeNode::Interior(children))
        }
        other => Ok(BtreeNode::Index(other)),
    }
}

fn parse_leaf_cell(page: &PlaintextPage, offset: usize) -> Result<LeafCell> {
    let usable = page.usable_size();
    let data = &page.data;
    let corrupt = |reason: &str| DatabaseError::corrupt_record(page.page_id, format!("cell at {offset}: {reason}"));

    if offset < page.header_offset() || offset >= usable {
        return Err(corrupt("pointer outside the page"));
    }
    let (payload_size, n1) = read_varint(&data[offset..usable]).ok_or_else(|| corrupt("payload size truncated"))?;
    let (row_id, n2) = read_varint(&data[offset + n1..usable]).ok_or_else(|| corrupt("rowid truncated"))?;

    let local_len = local_payload_size(payload_size, usable);
    let start = offset + n1 + n2;
    let end = start + local_len;
    if end > usable {
        return Err(corrupt("local payload overruns page"));
    }

    let first_overflow = if (local_len as u64) < payload_size {
        let pointer = data
            .get(end..end + OVERFLOW_POINTER_SIZE)
            .ok_or_else(|| corrupt("overflow pointer overruns page"))?;
        Some(u32::from_be_bytes([pointer[0], pointer[1], pointer[2], pointer[3]]))
    } else {
        None
    };

    Ok(LeafCell {
        page_id: page.page_id,
        row_id: row_id as i64,
        payload_size,
        local: data[start..end].to_vec(),
        first_overflow,
    })
}

/// Follows an overflow chain and returns exactly `remaining` bytes.
///
/// The chain is bounded by the fetcher's page limit; a revisited page or a
/// chain that ends early is a corrupt record, not a panic.
pub fn read_overflow_chain<F: PageFetcher>(
    fetcher: &mut F,
    cell_page: PageId,
    first: PageId,
    remaining: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(remaining);
    let mut visited = HashSet::new();
    let limit = fetcher.page_limit().min(MAX_OVERFLOW_CHAIN);
    let mut next = first;

    while out.len() < remaining {
        if next == 0 {
            return Err(DatabaseError::corrupt_record(
                cell_page,
                format!("overflow chain ended after {} of {remaining} bytes", out.len()),
            ));
        }
        if !visited.insert(next) {
            warn!(page_id = cell_page, overflow_page = next, "cyclic overflow chain");
            return Err(DatabaseError::corrupt_record(
                cell_page,
                format!("overflow chain revisits page {next}"),
            ));
        }
        if visited.len() > limit {
            return Err(DatabaseError::corrupt_record(
                cell_page,
                format!("overflow chain longer than {limit} pages"),
            ));
        }

        let page = fetcher.fetch(next)?;
        if page.data.len() < OVERFLOW_POINTER_SIZE {
            return Err(DatabaseError::corrupt_record(cell_page, "overflow page too small"));
        }
        let body = &page.data[OVERFLOW_POINTER_SIZE..];
        let take = (remaining - out.len()).min(body.len());
        out.extend_from_slice(&body[..take]);
        next = u32::from_be_bytes([page.data[0], page.data[1], page.data[2], page.data[3]]);
    }
    Ok(out)
}

/// Full record payload for a cell: local bytes plus its overflow chain.
pub fn assemble_payload<F: PageFetcher>(fetcher: &mut F, cell: &LeafCell) -> Result<Vec<u8>> {
    let Some(first) = cell.first_overflow else {
        return Ok(cell.local.clone());
    };
    let total = usize::try_from(cell.payload_size)
        .ok()
        .filter(|total| *total <= MAX_PAYLOAD_SIZE)
        .ok_or_else(|| DatabaseError::corrupt_record(cell.page_id, format!("payload size {} is implausible", cell.payload_size)))?;
    let mut payload = Vec::with_capacity(total);
    payload.extend_from_slice(&cell.local);
    let tail = read_overflow_chain(fetcher, cell.page_id, first, total - cell.local.len())?;
    payload.extend_from_slice(&tail);
    Ok(payload)
}
