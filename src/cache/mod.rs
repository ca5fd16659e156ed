//! Layer-output cache keyed by layer index and input fingerprint.

pub mod adaptive;
pub mod key;
pub mod shared;
