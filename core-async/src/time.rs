//! Time-related primitives.
//!
//! Re-exports Tokio's timer API so that tests can drive it with a paused
//! clock (`#[tokio::test(start_paused = true)]`).
//!
//! ```rust
//! use core_async::time::{sleep, timeout, Duration};
//!
//! async fn example() {
//!     let result = timeout(Duration::from_millis(50), async {
//!         sleep(Duration::from_millis(10)).await;
//!         1
//!     })
//!     .await;
//!     assert_eq!(result.ok(), Some(1));
//! }
//! ```

pub use tokio::time::{
    error::Elapsed, interval, sleep, sleep_until, timeout, Interval, MissedTickBehavior, Sleep,
    Timeout,
};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
