pub mod store;

pub use store::{SqliteStore, StoredMessage, StoredToolOutput};
