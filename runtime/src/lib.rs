//! Exhaustive traversal of a click-driven, three-level classification tree
//! in a live browser session.
//!
//! The [`cartography::TaxonomyWalker`] drives a [`renderer::Renderer`]
//! through the `live` action layer, reads each level with
//! [`extraction::NodeExtractor`], and collects rows in a
//! [`map::ResultSink`].

pub mod acquisition;
pub mod cartography;
pub mod cli;
pub mod config;
pub mod error;
pub mod extraction;
pub mod input;
pub mod live;
pub mod map;
pub mod renderer;
