//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host must implement for the verse
//! audio core.
//!
//! ## Overview
//!
//! The core never touches the filesystem, the wall clock, or the audio output
//! device directly. Each of those is a capability the host injects through
//! one of the traits below, which keeps the cache and the playback state
//! machine deterministic under test.
//!
//! ## Traits
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the segment cache
//!
//! ### Playback
//! - [`AudioTransport`](playback::AudioTransport) - Platform audio output (attach, seek, boundaries)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Filesystem |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it and keep the failing path or
//! operation in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared as
//! `Arc<dyn Trait>` across spawned tasks.

pub mod error;
pub mod playback;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use playback::{AudioComposition, AudioSegment, AudioTransport, TransportEvent};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
