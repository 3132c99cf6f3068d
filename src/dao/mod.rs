/// Persisted record shapes shared by every backend.
pub mod models;
/// Round and participation persistence backends.
pub mod round_store;
/// Storage abstraction layer for database operations.
pub mod storage;
