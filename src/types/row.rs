use serde::{Deserialize, Serialize};

use crate::types::{RowId, value::Value};

/// One logical table row. Identity is `(table, row_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub table: String,
    pub row_id: RowId,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(table: impl Into<String>, row_id: RowId, values: Vec<Value>) -> Self {
        Self {
            table: table.into(),
            row_id,
            values,
        }
    }

    pub fn key(&self) -> (String, RowId) {
        (self.table.clone(), self.row_id)
    }

    pub fn get_value(&self, column_index: usize) -> Option<&Value> {
        self.values.get(column_index)
    }
}
