//! Relevance frequency and the retention coefficient derived from it.
//!
//! Every decision the runtime makes (cache lifetime, layer bypass, attention
//! weighting) is a function of one scalar: how much energy a signal carries
//! relative to the rest of its batch.

pub mod retention;
pub mod score;

/// Clamp `x` into `[lo, hi]` without panicking.
///
/// NaN maps to `lo`, and an inverted or NaN `hi` collapses the range to `lo`.
pub fn clamp_range(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi.max(lo))
}
