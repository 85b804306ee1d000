//! Cartography engine: tree traversal and seed-driven fetching.

pub mod seeds;
pub mod walker;

pub use seeds::{SeedRunner, SeedStats};
pub use walker::{TaxonomyWalker, WalkStats};
