//! Utility modules: backoff, retry, timeout.

pub mod backoff;
pub mod retry;
pub mod timeout;
