//! Reliability patterns for transfer task execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Fixed-delay retry budget for downstream task creation

mod retry;

pub use retry::RetryPolicy;
