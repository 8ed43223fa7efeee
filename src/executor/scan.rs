use crate::types::{error::Result, row::Row};

/// A pull-based row source. An `Err` from [`scan`](Scanner::scan) reports a
/// skipped unit; calling `scan` again continues with the next one.
pub trait Scanner {
    fn scan(&mut self) -> Result<Option<Row>>;
    fn scan_batch(&mut self, batch_size: usize) -> Result<Vec<Row>>;
    fn reset(&mut self);
}

pub struct ScanIterator<S: Scanner> {
    scanner: S,
}

impl<S: Scanner> ScanIterator<S> {
    pub fn new(scanner: S) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }
}

impl<S: Scanner> Iterator for ScanIterator<S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.scanner.scan() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
