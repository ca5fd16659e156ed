//! Layer implementations: relevance-scaled attention and the block stack.

pub mod attention;
pub mod model;
