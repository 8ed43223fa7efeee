use std::collections::{HashSet, VecDeque};

use tracing::trace;

use crate::{
    executor::scan::{ScanIterator, Scanner},
    storage::{
        bplus_tree::{BtreeNode, LeafCell, assemble_payload, parse_table_page},
        page_store::PageFetcher,
        schema::TableSchema,
    },
    types::{
        PageId,
        error::{DatabaseError, Result},
        record::{TextEncoding, decode_record},
        row::Row,
    },
};

/// Walks one table b-tree depth first with an explicit stack, yielding rows
/// lazily in rowid order. Each page is visited at most once and the walk
/// stops at the fetcher's page limit, so cyclic child pointers cannot loop.
pub struct TableScanner<'a, F: PageFetcher> {
    fetcher: &'a mut F,
    schema: &'a TableSchema,
    encoding: TextEncoding,
    stack: Vec<PageId>,
    visited: HashSet<PageId>,
    table_pages: Vec<PageId>,
    cells: VecDeque<Result<LeafCell>>,
    current_page: PageId,
    limit: usize,
    is_exhausted: bool,
}

impl<'a, F: PageFetcher> TableScanner<'a, F> {
    pub fn new(fetcher: &'a mut F, schema: &'a TableSchema, encoding: TextEncoding) -> Self {
        let limit = fetcher.page_limit();
        Self {
            fetcher,
            schema,
            encoding,
            stack: vec![schema.root_page],
            visited: HashSet::new(),
            table_pages: Vec::new(),
            cells: VecDeque::new(),
            current_page: schema.root_page,
            limit,
            is_exhausted: false,
        }
    }

    pub fn into_rows(self) -> ScanIterator<Self> {
        ScanIterator::new(self)
    }

    /// Page the scanner is currently reading, for attributing errors.
    pub fn current_page(&self) -> PageId {
        self.current_page
    }

    /// Table b-tree pages parsed so far, in visit order.
    pub fn table_pages(&self) -> &[PageId] {
        &self.table_pages
    }

    fn row_from_cell(&mut self, cell: LeafCell) -> Result<Row> {
        let payload = assemble_payload(&mut *self.fetcher, &cell)?;
        let record = decode_record(&payload, self.encoding, cell.page_id)?;
        Ok(self.schema.materialize(cell.row_id, record))
    }

    fn descend(&mut self) -> Result<bool> {
        let Some(page_id) = self.stack.pop() else {
            self.is_exhausted = true;
            return Ok(false);
        };
        self.current_page = page_id;
        if !self.visited.insert(page_id) {
            return Err(DatabaseError::corrupt_record(
                page_id,
                format!("page reached twice while walking '{}'", self.schema.name),
            ));
        }
        if self.visited.len() > self.limit {
            self.is_exhausted = true;
            self.stack.clear();
            return Err(DatabaseError::corrupt_record(
                page_id,
                format!("walk of '{}' exceeded {} pages", self.schema.name, self.limit),
            ));
        }

        let page = self.fetcher.fetch(page_id)?;
        match parse_table_page(&page)? {
            BtreeNode::Leaf(cells) => {
                trace!(page_id, cells = cells.len(), table = %self.schema.name, "leaf");
                self.cells = cells.into();
            }
            BtreeNode::Interior(children) => {
                // leftmost child on top
                self.stack.extend(children.into_iter().rev());
            }
            BtreeNode::Index(page_type) => {
                return Err(DatabaseError::CorruptedPage {
                    page_id,
                    reason: format!("{page_type:?} page inside table b-tree '{}'", self.schema.name),
                });
            }
        }
        self.table_pages.push(page_id);
        Ok(true)
    }
}

impl<F: PageFetcher> Scanner for TableScanner<'_, F> {
    fn scan(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(cell) = self.cells.pop_front() {
                return self.row_from_cell(cell?).map(Some);
            }
            if self.is_exhausted || !self.descend()? {
                return Ok(None);
            }
        }
    }

    fn scan_batch(&mut self, batch_size: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(batch_size);
        while rows.len() < batch_size {
            match self.scan()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    fn reset(&mut self) {
        self.stack = vec![self.schema.root_page];
        self.visited.clear();
        self.table_pages.clear();
        self.cells.clear();
        self.current_page = self.schema.root_page;
        self.is_exhausted = false;
    }
}
