pub mod config;
pub mod crypto;
pub mod executor;
pub mod logging;
pub mod mapper;
pub mod pipeline;
pub mod recovery;
pub mod storage;
pub mod types;
pub mod utils;
