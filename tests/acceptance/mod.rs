//! Integration tests for the ostime clock.
//!
//! Everything here runs on a stock host: counters are either driven
//! manually or derived from the host monotonic clock.

mod common;
mod config_test;
mod interleave_test;
mod monotonic_test;
#[cfg(unix)]
mod signal_test;
