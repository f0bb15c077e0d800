// src/ingest/providers/mod.rs
pub mod ncsc;
pub mod nvd;
pub mod rss;

pub use ncsc::NcscBoardAdapter;
pub use nvd::NvdAdapter;
pub use rss::{FeedSpec, RssAdapter};
