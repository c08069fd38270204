//! # Resilience Module
//!
//! Retry scheduling for calls to the remote run service. Delays grow
//! exponentially without jitter and are capped; the number of attempts is
//! always bounded so callers eventually surface a hard failure.
//!
//! ## Usage
//!
//! ```rust
//! use deployer_core::config::BackoffConfig;
//! use deployer_core::resilience::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::from_config(&BackoffConfig {
//!     max_attempts: 4,
//!     initial_delay_ms: 100,
//!     max_delay_ms: 250,
//!     multiplier: 2.0,
//! });
//!
//! let delays: Vec<Duration> = backoff.delays().collect();
//! assert_eq!(
//!     delays,
//!     vec![
//!         Duration::from_millis(100),
//!         Duration::from_millis(200),
//!         Duration::from_millis(250),
//!     ]
//! );
//! ```

pub mod backoff;

pub use backoff::{retry_with_backoff, ExponentialBackoff, RetryDecision};
