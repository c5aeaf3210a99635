pub mod cli;
pub mod config;
pub mod error;
pub mod indexer;
pub mod probe;
pub mod query;
pub mod rescan;
pub mod scan;
pub mod server;
pub mod store;

pub use config::Config;
pub use probe::{ProbeRegistry, TranscriptProbe};
pub use store::IndexStore;
