//! Open, close and reset the classification surface (the index modal).

use crate::config::SurfaceConfig;
use crate::error::ActionError;
use crate::live::act::{ActionExecutor, Constraints};
use crate::renderer::RenderContext;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct Surface<'a> {
    exec: &'a ActionExecutor,
    config: &'a SurfaceConfig,
}

impl<'a> Surface<'a> {
    pub fn new(exec: &'a ActionExecutor, config: &'a SurfaceConfig) -> Self {
        Self { exec, config }
    }

    pub async fn is_open(&self, view: &dyn RenderContext) -> Result<bool, ActionError> {
        self.exec.is_visible(view, &self.config.marker).await
    }

    /// Open the surface and wait for its marker. No-op when already open.
    pub async fn open(&self, view: &dyn RenderContext) -> Result<(), ActionError> {
        if self.is_open(view).await? {
            return Ok(());
        }
        self.exec
            .click(
                view,
                &self.config.open,
                Constraints::actionable(self.config.timeout_ms),
            )
            .await?;
        self.exec
            .locate(
                view,
                &self.config.marker,
                Constraints::visible(self.config.timeout_ms),
            )
            .await?;
        debug!("classification surface open");
        Ok(())
    }

    /// Close the surface and wait for its marker to go away. No-op when
    /// already closed.
    pub async fn close(&self, view: &dyn RenderContext) -> Result<(), ActionError> {
        if !self.is_open(view).await? {
            return Ok(());
        }
        self.exec
            .click(
                view,
                &self.config.close,
                Constraints::visible(self.config.timeout_ms),
            )
            .await?;

        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        while self.is_open(view).await? {
            if Instant::now() >= deadline {
                return Err(ActionError::timeout(
                    "classification surface to close",
                    self.config.timeout_ms,
                ));
            }
            tokio::time::sleep(Duration::from_millis(self.exec.timeouts().poll_ms.max(1))).await;
        }
        debug!("classification surface closed");
        Ok(())
    }

    /// Return the surface to its top level: every selection cleared, only
    /// the first-level grid populated.
    pub async fn reset_to_root(&self, view: &dyn RenderContext) -> Result<(), ActionError> {
        self.close(view).await?;
        self.open(view).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::{test_config, two_major_tree, ScriptedUi};

    #[tokio::test(start_paused = true)]
    async fn test_open_is_idempotent() {
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let surface = Surface::new(&exec, &config.surface);
        let ui = ScriptedUi::new(two_major_tree());

        surface.open(&ui).await.unwrap();
        surface.open(&ui).await.unwrap();
        assert!(surface.is_open(&ui).await.unwrap());
        assert_eq!(ui.state().lock().unwrap().opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_selection() {
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let surface = Surface::new(&exec, &config.surface);
        let ui = ScriptedUi::new(two_major_tree()).opened();
        ui.state().lock().unwrap().selected = vec![0, 0];

        surface.reset_to_root(&ui).await.unwrap();
        let state = ui.state();
        let st = state.lock().unwrap();
        assert!(st.surface_open);
        assert!(st.selected.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_when_closed_is_noop() {
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let surface = Surface::new(&exec, &config.surface);
        let ui = ScriptedUi::new(two_major_tree());
        surface.close(&ui).await.unwrap();
        assert!(ui.state().lock().unwrap().clicks.is_empty());
    }
}
