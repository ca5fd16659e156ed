//! Per-pass control decisions: which layers run, and at what precision.

pub mod bypass;
pub mod precision;
