//! Stock data storage for stockchat.
//!
//! Implements [`stockchat_core::StockStore`] on SQLite. The store also owns
//! ingestion (`upsert_stocks`, `upsert_daily`), which the tools never see.

pub mod sqlite;

pub use sqlite::SqliteStockStore;
