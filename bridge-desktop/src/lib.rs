//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`, rooted in the platform cache
//!   directory reported by `dirs`
//!
//! Audio output is always host-specific and has no desktop default; hosts
//! inject their own `AudioTransport`.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::TokioFileSystem;
//! use std::sync::Arc;
//!
//! let fs = Arc::new(TokioFileSystem::new());
//! // Hand to CoreConfig::builder().file_system(fs)
//! ```

mod filesystem;

pub use filesystem::TokioFileSystem;
