//! Session guard: owns the single live application view and re-establishes
//! it when the view closes or detaches.
//!
//! Establishing a view replays the whole entry flow (host page, menu or
//! direct navigation, ready marker, surface). Recoveries are counted against
//! a per-run budget; once it is spent the run ends.

use crate::config::{EntryConfig, SurfaceConfig, WalkerConfig};
use crate::error::{ActionError, WalkError};
use crate::live::act::{ActionExecutor, Constraints};
use crate::live::surface::Surface;
use crate::renderer::{RenderContext, Renderer};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`SessionGuard::ensure_live`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The existing view still answers.
    Same,
    /// A fresh view was established; every earlier element reference and
    /// UI position is void.
    Replaced,
}

/// One established view, plus the host view it was opened from.
pub struct SessionHandle {
    view: Box<dyn RenderContext>,
    host: Option<Box<dyn RenderContext>>,
    generation: u32,
}

impl SessionHandle {
    pub fn view(&self) -> &dyn RenderContext {
        self.view.as_ref()
    }

    async fn close(self) {
        if let Err(e) = self.view.close().await {
            debug!("closing view: {e}");
        }
        if let Some(host) = self.host {
            if let Err(e) = host.close().await {
                debug!("closing host view: {e}");
            }
        }
    }
}

pub struct SessionGuard {
    renderer: Arc<dyn Renderer>,
    entry: EntryConfig,
    surface: SurfaceConfig,
    budget: u32,
    attempts: u32,
    generation: u32,
    handle: Option<SessionHandle>,
    invalidated: bool,
}

impl SessionGuard {
    pub fn new(renderer: Arc<dyn Renderer>, config: &WalkerConfig) -> Self {
        Self {
            renderer,
            entry: config.entry.clone(),
            surface: config.surface.clone(),
            budget: config.recovery_budget,
            attempts: 0,
            generation: 0,
            handle: None,
            invalidated: false,
        }
    }

    /// Establish the first view. Does not count against the recovery budget.
    pub async fn start(&mut self, exec: &ActionExecutor) -> Result<(), WalkError> {
        let handle = self.establish(exec).await.map_err(WalkError::Bootstrap)?;
        info!(generation = handle.generation, "application view ready");
        self.handle = Some(handle);
        self.invalidated = false;
        Ok(())
    }

    /// Return immediately when the view answers; otherwise discard it and
    /// establish a new one, spending recovery budget on every attempt.
    pub async fn ensure_live(&mut self, exec: &ActionExecutor) -> Result<Liveness, WalkError> {
        if !self.invalidated {
            if let Some(handle) = &self.handle {
                if handle.view.is_live().await {
                    return Ok(Liveness::Same);
                }
            }
        }

        if let Some(old) = self.handle.take() {
            warn!(generation = old.generation, "application view lost, re-establishing");
            old.close().await;
        }

        let mut last = ActionError::SessionLost;
        while self.attempts < self.budget {
            self.attempts += 1;
            match self.establish(exec).await {
                Ok(handle) => {
                    info!(
                        generation = handle.generation,
                        attempt = self.attempts,
                        budget = self.budget,
                        "application view re-established"
                    );
                    self.handle = Some(handle);
                    self.invalidated = false;
                    return Ok(Liveness::Replaced);
                }
                Err(e) => {
                    warn!(attempt = self.attempts, budget = self.budget, "re-establish failed: {e}");
                    last = e;
                }
            }
        }

        Err(WalkError::SessionUnrecoverable {
            attempts: self.attempts,
            last: last.to_string(),
        })
    }

    /// The current view, or `SessionLost` when none is established.
    pub fn view(&self) -> Result<&dyn RenderContext, ActionError> {
        match &self.handle {
            Some(handle) if !self.invalidated => Ok(handle.view()),
            _ => Err(ActionError::SessionLost),
        }
    }

    /// Mark the view as lost after an action reported `SessionLost`.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Recovery attempts spent so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }
    }

    async fn establish(&mut self, exec: &ActionExecutor) -> Result<SessionHandle, ActionError> {
        let view = self.renderer.new_context().await?;
        let (view, host) = self.enter(exec, view).await?;

        match self.bootstrap(exec, view.as_ref()).await {
            Ok(()) => {
                self.generation += 1;
                Ok(SessionHandle {
                    view,
                    host,
                    generation: self.generation,
                })
            }
            Err(e) => {
                SessionHandle {
                    view,
                    host,
                    generation: 0,
                }
                .close()
                .await;
                Err(e)
            }
        }
    }

    /// Reach the application: via the host page's menu when configured,
    /// falling back to direct navigation with the host as referer.
    async fn enter(
        &self,
        exec: &ActionExecutor,
        view: Box<dyn RenderContext>,
    ) -> Result<(Box<dyn RenderContext>, Option<Box<dyn RenderContext>>), ActionError> {
        let entry = &self.entry;
        let Some(host_url) = entry.host_url.as_deref() else {
            if let Err(e) = open_url(view.as_ref(), &entry.app_url, None, entry.navigation_timeout_ms).await {
                let _ = view.close().await;
                return Err(e);
            }
            return Ok((view, None));
        };

        if let Err(e) = open_url(view.as_ref(), host_url, None, entry.navigation_timeout_ms).await {
            let _ = view.close().await;
            return Err(e);
        }

        if !entry.menu.is_empty() {
            let opened = async {
                exec.click(
                    view.as_ref(),
                    &entry.menu,
                    Constraints::visible(entry.new_view_timeout_ms),
                )
                .await?;
                view.wait_for_new_view(entry.new_view_timeout_ms).await
            }
            .await;
            match opened {
                Ok(app) => return Ok((app, Some(view))),
                Err(ActionError::SessionLost) => {
                    let _ = view.close().await;
                    return Err(ActionError::SessionLost);
                }
                Err(e) => debug!("menu entry did not open the application: {e}"),
            }
        }

        if let Err(e) =
            open_url(view.as_ref(), &entry.app_url, Some(host_url), entry.navigation_timeout_ms).await
        {
            let _ = view.close().await;
            return Err(e);
        }
        Ok((view, None))
    }

    async fn bootstrap(&self, exec: &ActionExecutor, view: &dyn RenderContext) -> Result<(), ActionError> {
        let timeout = self.entry.bootstrap_timeout_ms;
        view.wait_for_quiescence(timeout).await?;

        if !self.entry.ready.is_empty() {
            match exec
                .locate(view, &self.entry.ready, Constraints::visible(timeout))
                .await
            {
                Ok(_) => {}
                Err(ActionError::SessionLost) => return Err(ActionError::SessionLost),
                Err(e) => warn!("ready marker not seen, continuing: {e}"),
            }
        }

        Surface::new(exec, &self.surface).open(view).await
    }
}

async fn open_url(
    view: &dyn RenderContext,
    url: &str,
    referer: Option<&str>,
    timeout_ms: u64,
) -> Result<(), ActionError> {
    let nav = view.navigate(url, referer, timeout_ms).await?;
    debug!(final_url = %nav.final_url, load_time_ms = nav.load_time_ms, "page loaded");
    Ok(())
}
