//! Browser automation surface consumed by the walker.
//!
//! `Renderer` opens views, `RenderContext` drives one of them. The engine
//! only talks to these traits, so the traversal logic runs unchanged against
//! Chromium or against the scripted in-memory UI used by the tests.

pub mod chromium;
pub mod locator;
#[cfg(test)]
pub(crate) mod scripted;

pub use locator::{ClickTier, ElementRef, ElementState, Locator, SlotTemplate};

use crate::error::ActionError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Result of navigating a view to a URL.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub final_url: String,
    pub load_time_ms: u64,
}

/// One live application view (a browser tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to `url`, sending `referer` when given.
    async fn navigate(
        &self,
        url: &str,
        referer: Option<&str>,
        timeout_ms: u64,
    ) -> Result<NavigationResult, ActionError>;

    /// Wait until the document has finished loading and settled.
    async fn wait_for_quiescence(&self, timeout_ms: u64) -> Result<(), ActionError>;

    /// All elements currently matching `locator`, in document order.
    async fn locate(&self, locator: &Locator) -> Result<Vec<ElementRef>, ActionError>;

    /// Current visibility, enabled state and text of an element.
    async fn probe(&self, element: &ElementRef) -> Result<ElementState, ActionError>;

    /// Click with one specific tier. Starts a new snapshot epoch on success.
    async fn click(&self, element: &ElementRef, tier: ClickTier) -> Result<(), ActionError>;

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), ActionError>;

    /// Current value of an input element (text content for non-inputs).
    async fn read_value(&self, element: &ElementRef) -> Result<String, ActionError>;

    /// Replace an input's value and fire its input/change events.
    async fn fill_value(&self, element: &ElementRef, value: &str) -> Result<(), ActionError>;

    /// Wait for a view opened by this one (popup / new tab) and adopt it.
    async fn wait_for_new_view(&self, timeout_ms: u64)
        -> Result<Box<dyn RenderContext>, ActionError>;

    /// Wait for a download triggered from this view to land on disk.
    async fn wait_for_download(&self, timeout_ms: u64) -> Result<PathBuf, ActionError>;

    /// Whether the view is still attached and answering.
    async fn is_live(&self) -> bool;

    async fn close(&self) -> Result<(), ActionError>;
}

/// Factory for application views.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, ActionError>;

    /// Shut the whole browser down.
    async fn close(&self) -> Result<(), ActionError>;
}
