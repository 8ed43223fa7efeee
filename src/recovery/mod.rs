pub mod engine;
pub mod row_set;
pub mod session;
