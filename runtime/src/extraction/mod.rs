//! Node extraction from the level grids and display-text parsing.

pub mod parse;
pub mod siblings;

pub use parse::{parse_node_text, ParsedText};
pub use siblings::NodeExtractor;
