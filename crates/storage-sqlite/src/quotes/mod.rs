//! Cold-store quote records.

mod model;
mod repository;

pub use model::{timestamp_text, QuoteRecordDB};
pub use repository::SqliteColdStore;
