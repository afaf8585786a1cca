pub mod database;
pub mod error;
pub mod history;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use history::{
    HistoryScope, HistoryStore, HistoryStoreFactory, SqliteHistoryFactory, SqliteHistoryStore,
};
