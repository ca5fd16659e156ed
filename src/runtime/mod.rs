//! Forward-pass orchestration and its bookkeeping.
//!
//! - `scheduler`: the per-pass loop over cache, bypass and layers
//! - `telemetry`: per-pass records and cumulative stats
//! - `monitor`: rolling health metrics over telemetry
//! - `clock`: timestamp sources

pub mod clock;
pub mod monitor;
pub mod scheduler;
pub mod telemetry;
