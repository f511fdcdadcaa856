//! Persisted capture preferences

pub mod store;

pub use store::{JsonFileStore, MemoryStore, SettingsError, SettingsStore, SETTINGS_KEY};
