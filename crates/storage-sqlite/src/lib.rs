//! SQLite cold store for the coinfeed market data engine.
//!
//! Validated quote points are kept here so the engine can serve fallback
//! responses when every exchange is down, and build historical candles.
//! This is the only crate with Diesel dependencies; the engine talks to it
//! through the `ColdStore` trait.
//!
//! ```text
//! coinfeed-market-data (ColdStore trait)
//!                  │
//!                  ▼
//!     storage-sqlite (this crate)
//!         │               │
//!   writer actor     r2d2 read pool
//!         └───────┬───────┘
//!                 ▼
//!             SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod quotes;
pub mod schema;
pub mod utils;

pub use db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};
pub use errors::{IntoMarketData, StorageError};
pub use quotes::SqliteColdStore;
