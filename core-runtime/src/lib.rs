//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the verse audio core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the cache, the playback
//! orchestrator and the service façade depend on. It establishes the logging
//! conventions and the event broadcasting mechanism used throughout the
//! workspace.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
