//! Player registry built from game world directories.
//!
//! # Architecture
//!
//! ```text
//! RegistryManager (owns everything below)
//!     │
//!     ├── RegistryStore - shared grow-only set of identities
//!     │
//!     └── WorldWatcher (one per world) - OS events → re-scan → union
//!             │
//!             └── WorldScanner - lists record files, decodes each
//!                     │
//!                     └── RecordDecoder - record bytes → identity
//! ```
//!
//! The registry never forgets a player. Records deleted from disk stay
//! known until the process restarts and rebuilds the registry.

mod manager;
pub mod nbt;
pub mod record;
mod scanner;
mod store;
mod watcher;

/// A player's name exactly as stored in their record.
pub type Identity = String;

pub use manager::{RegistryManager, RegistryStatus};
pub use record::{encode_player_record, DecodeError, NbtRecordDecoder, RecordDecoder};
pub use scanner::{ScanReport, SkippedRecord, WorldDirectory, WorldScanner};
pub use store::RegistryStore;
pub use watcher::{WatcherState, WorldWatcher};
