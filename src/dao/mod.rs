/// Database model definitions.
pub mod models;
/// Session and grant persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
