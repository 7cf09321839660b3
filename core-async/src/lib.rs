//! Async runtime abstraction layer for the verse audio core.
//!
//! Every core crate spawns tasks, sleeps, and synchronizes through this crate
//! rather than depending on Tokio directly, so the executor can be swapped in
//! one place.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Sleep, timeout, interval and duration types
//! - `sync`: Async-aware locks, channels and cancellation
//! - `runtime`: Handles and a blocking bridge for sync call sites
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
