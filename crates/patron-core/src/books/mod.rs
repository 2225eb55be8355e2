//! Books held by accounts
//!
//! - `feed`: feed entries and acquisition links
//! - `status`: the borrow/revoke status lifecycle
//! - `database`: per-account on-disk book storage
//! - `registry`: in-memory status map with change notifications

pub mod database;
pub mod feed;
pub mod registry;
pub mod status;

pub use database::{BookDatabase, BookDatabaseError, BookRecord};
pub use feed::{Acquisition, AcquisitionType, FeedEntry};
pub use registry::BookRegistry;
pub use status::{BookStatus, BookStatusEvent, BorrowError, FetchStage, RevokeError};
