// Copyright 2026 Omoshola Owolabi
// SPDX-License-Identifier: MIT

//! Chromium backend over the DevTools protocol (chromiumoxide).
//!
//! Locators are resolved by injected JavaScript on every call, so an
//! [`ElementRef`] is only a (locator, index, epoch) triple. The epoch is
//! bumped by every click, fill and navigation; a reference from an older
//! epoch is reported as stale instead of being re-resolved.

use super::{ClickTier, ElementRef, ElementState, Locator, NavigationResult, RenderContext, Renderer};
use crate::error::ActionError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How the browser is started.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Explicit executable; otherwise `INDEXWALK_CHROMIUM_PATH` or a search
    /// of the usual install locations.
    pub chrome_path: Option<PathBuf>,
    /// Where the browser saves downloads.
    pub download_dir: PathBuf,
}

/// Find a Chromium/Chrome binary on this system.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("INDEXWALK_CHROMIUM_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Map a CDP failure onto the action taxonomy. Transport failures mean the
/// view is gone.
fn cdp_error(err: impl std::fmt::Display) -> ActionError {
    let msg = err.to_string();
    let lost = [
        "receiver is gone",
        "channel closed",
        "connection reset",
        "broken pipe",
        "Target closed",
        "No target with given id",
        "Session with given id not found",
    ];
    if lost.iter().any(|needle| msg.contains(needle)) {
        ActionError::SessionLost
    } else {
        ActionError::Driver(msg)
    }
}

pub struct ChromiumRenderer {
    browser: Arc<Mutex<Browser>>,
    handler_alive: Arc<AtomicBool>,
    handler: JoinHandle<()>,
    download_dir: PathBuf,
}

impl ChromiumRenderer {
    pub async fn launch(options: LaunchOptions) -> Result<Self, ActionError> {
        std::fs::create_dir_all(&options.download_dir)
            .map_err(|e| ActionError::Driver(format!("creating download dir: {e}")))?;

        let bin = options.chrome_path.clone().or_else(find_chromium);
        match &bin {
            Some(p) => info!(binary = %p.display(), headless = options.headless, "launching chromium"),
            None => warn!("no chromium binary found, relying on chromiumoxide detection"),
        }

        let mut builder = BrowserConfig::builder()
            .window_size(1400, 1000)
            .args(vec![
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--disable-infobars",
                "--disable-extensions",
                "--disable-popup-blocking",
            ]);
        if let Some(b) = &bin {
            builder = builder.chrome_executable(b);
        }
        if !options.headless {
            builder = builder.with_head();
        }
        if std::env::var("CI").is_ok() || std::env::var("NO_SANDBOX").is_ok() {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(ActionError::Driver)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ActionError::Driver(format!("failed to launch chromium: {e}")))?;

        let handler_alive = Arc::new(AtomicBool::new(true));
        let alive = Arc::clone(&handler_alive);
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            alive.store(false, Ordering::SeqCst);
            warn!("chromium event loop exited");
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler_alive,
            handler,
            download_dir: options.download_dir,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, ActionError> {
        if !self.handler_alive.load(Ordering::SeqCst) {
            return Err(ActionError::SessionLost);
        }
        let (page, known) = {
            let browser = self.browser.lock().await;
            let page = browser.new_page("about:blank").await.map_err(cdp_error)?;
            let known: HashSet<TargetId> = browser
                .pages()
                .await
                .map_err(cdp_error)?
                .iter()
                .map(|p| p.target_id().clone())
                .collect();
            (page, known)
        };
        let ctx = ChromiumContext::new(
            page,
            Arc::clone(&self.browser),
            Arc::clone(&self.handler_alive),
            self.download_dir.clone(),
            known,
        );
        ctx.enable_downloads().await?;
        Ok(Box::new(ctx))
    }

    async fn close(&self) -> Result<(), ActionError> {
        let result = self.browser.lock().await.close().await;
        self.handler.abort();
        result.map(|_| ()).map_err(cdp_error)
    }
}

/// Resolves a locator to its element list, in document order.
const RESOLVE_JS: &str = r#"
const __iwResolve = (kind, value) => {
    if (kind === "id") {
        const el = document.getElementById(value);
        return el ? [el] : [];
    }
    if (kind === "css") {
        try { return Array.from(document.querySelectorAll(value)); } catch (_e) { return []; }
    }
    const all = Array.from(document.querySelectorAll("body *"))
        .filter(el => (el.textContent || "").trim() === value);
    return all.filter(el => !all.some(other => other !== el && el.contains(other)));
};
const __iwVisible = (el) => {
    const r = el.getBoundingClientRect();
    const s = window.getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.visibility !== "hidden" && s.display !== "none";
};
const __iwEnabled = (el) =>
    !el.disabled && el.getAttribute("aria-disabled") !== "true";
"#;

#[derive(Debug, Deserialize)]
struct Probe {
    found: bool,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Target {
    found: bool,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    unobstructed: bool,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Debug, Deserialize)]
struct Done {
    found: bool,
    #[serde(default)]
    value: String,
}

pub struct ChromiumContext {
    page: Page,
    browser: Arc<Mutex<Browser>>,
    handler_alive: Arc<AtomicBool>,
    epoch: AtomicU64,
    download_dir: PathBuf,
    known_targets: HashSet<TargetId>,
    seen_downloads: Mutex<HashSet<PathBuf>>,
}

impl ChromiumContext {
    fn new(
        page: Page,
        browser: Arc<Mutex<Browser>>,
        handler_alive: Arc<AtomicBool>,
        download_dir: PathBuf,
        known_targets: HashSet<TargetId>,
    ) -> Self {
        let existing = list_downloads(&download_dir).into_iter().collect();
        Self {
            page,
            browser,
            handler_alive,
            epoch: AtomicU64::new(0),
            download_dir,
            known_targets,
            seen_downloads: Mutex::new(existing),
        }
    }

    async fn enable_downloads(&self) -> Result<(), ActionError> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.download_dir.display().to_string())
            .build()
            .map_err(ActionError::Driver)?;
        self.browser
            .lock()
            .await
            .execute(params)
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn check_epoch(&self, element: &ElementRef) -> Result<(), ActionError> {
        let current = self.current_epoch();
        if element.epoch != current {
            return Err(ActionError::Stale {
                held: element.epoch,
                current,
            });
        }
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, ActionError> {
        self.page
            .evaluate(script)
            .await
            .map_err(cdp_error)?
            .into_value::<T>()
            .map_err(|e| ActionError::Driver(format!("decoding script result: {e}")))
    }

    /// Wrap `body` so it runs with `el` bound to the referenced element; a
    /// missing element yields `{ found: false }`.
    fn element_script(element: &ElementRef, body: &str) -> Result<String, ActionError> {
        let (kind, value) = locator_args(&element.locator)?;
        Ok(format!(
            r#"(() => {{
                {RESOLVE_JS}
                const el = __iwResolve("{kind}", {value})[{nth}];
                if (!el) return {{ found: false }};
                {body}
            }})()"#,
            nth = element.nth,
        ))
    }

    /// Element vanished from the document since it was located.
    fn detached(&self, element: &ElementRef) -> ActionError {
        ActionError::Stale {
            held: element.epoch,
            current: self.current_epoch(),
        }
    }

    async fn target(&self, element: &ElementRef, scroll: bool) -> Result<Target, ActionError> {
        let scroll_js = if scroll {
            r#"el.scrollIntoView({ block: "center", inline: "center", behavior: "instant" });"#
        } else {
            ""
        };
        let body = format!(
            r#"{scroll_js}
            const r = el.getBoundingClientRect();
            const x = r.left + r.width / 2;
            const y = r.top + r.height / 2;
            const hit = document.elementFromPoint(x, y);
            return {{
                found: true,
                visible: __iwVisible(el),
                enabled: __iwEnabled(el),
                unobstructed: !!hit && (hit === el || el.contains(hit)),
                x, y
            }};"#
        );
        let target: Target = self.eval(Self::element_script(element, &body)?).await?;
        if !target.found {
            return Err(self.detached(element));
        }
        Ok(target)
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), ActionError> {
        let events = [
            (DispatchMouseEventType::MouseMoved, None),
            (DispatchMouseEventType::MousePressed, Some(MouseButton::Left)),
            (DispatchMouseEventType::MouseReleased, Some(MouseButton::Left)),
        ];
        for (kind, button) in events {
            let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
            if let Some(button) = button {
                builder = builder.button(button).click_count(1);
            }
            let params = builder.build().map_err(ActionError::Driver)?;
            self.page.execute(params).await.map_err(cdp_error)?;
        }
        Ok(())
    }
}

/// Strategy name and JSON-encoded value for the injected resolver.
fn locator_args(locator: &Locator) -> Result<(&'static str, String), ActionError> {
    let (kind, value) = match locator {
        Locator::Id(v) => ("id", v),
        Locator::Css(v) => ("css", v),
        Locator::Text(v) => ("text", v),
    };
    let value = serde_json::to_string(value).map_err(|e| ActionError::Driver(e.to_string()))?;
    Ok((kind, value))
}

fn list_downloads(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            !p.extension()
                .is_some_and(|ext| ext == "crdownload" || ext == "tmp")
        })
        .collect()
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(
        &self,
        url: &str,
        referer: Option<&str>,
        timeout_ms: u64,
    ) -> Result<NavigationResult, ActionError> {
        let start = Instant::now();
        let mut builder = NavigateParams::builder().url(url);
        if let Some(referer) = referer {
            builder = builder.referrer(referer);
        }
        let params = builder.build().map_err(ActionError::Driver)?;

        self.bump();
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(params))
            .await
            .map_err(|_| ActionError::timeout(format!("navigation to {url}"), timeout_ms))?
            .map_err(cdp_error)?;

        let final_url = self
            .page
            .url()
            .await
            .map_err(cdp_error)?
            .unwrap_or_else(|| url.to_string());
        debug!(%final_url, "navigated");
        Ok(NavigationResult {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn wait_for_quiescence(&self, timeout_ms: u64) -> Result<(), ActionError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let ready: bool = self
                .eval(r#"document.readyState === "complete""#.to_string())
                .await?;
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ActionError::timeout("document to finish loading", timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn locate(&self, locator: &Locator) -> Result<Vec<ElementRef>, ActionError> {
        let epoch = self.current_epoch();
        let (kind, value) = locator_args(locator)?;
        let count: usize = self
            .eval(format!(
                r#"(() => {{ {RESOLVE_JS} return __iwResolve("{kind}", {value}).length; }})()"#
            ))
            .await?;
        Ok((0..count)
            .map(|nth| ElementRef::new(epoch, locator.clone(), nth))
            .collect())
    }

    async fn probe(&self, element: &ElementRef) -> Result<ElementState, ActionError> {
        self.check_epoch(element)?;
        let body = r#"
            const text = ("value" in el && typeof el.value === "string")
                ? el.value
                : (el.innerText || el.textContent || "");
            return { found: true, visible: __iwVisible(el), enabled: __iwEnabled(el), text };
        "#;
        let probe: Probe = self.eval(Self::element_script(element, body)?).await?;
        if !probe.found {
            return Err(self.detached(element));
        }
        Ok(ElementState {
            visible: probe.visible,
            enabled: probe.enabled,
            text: probe.text,
        })
    }

    async fn click(&self, element: &ElementRef, tier: ClickTier) -> Result<(), ActionError> {
        self.check_epoch(element)?;
        match tier {
            ClickTier::Standard => {
                let target = self.target(element, false).await?;
                if !target.visible {
                    return Err(ActionError::NotVisible(element.to_string()));
                }
                if !target.enabled {
                    return Err(ActionError::Disabled(element.to_string()));
                }
                if !target.unobstructed {
                    return Err(ActionError::NotVisible(format!("{element} is obstructed")));
                }
                self.mouse_click(target.x, target.y).await?;
            }
            ClickTier::Forced => {
                let target = self.target(element, true).await?;
                self.mouse_click(target.x, target.y).await?;
            }
            ClickTier::Programmatic => {
                let done: Done = self
                    .eval(Self::element_script(
                        element,
                        "el.click(); return { found: true };",
                    )?)
                    .await?;
                if !done.found {
                    return Err(self.detached(element));
                }
            }
        }
        self.bump();
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), ActionError> {
        self.check_epoch(element)?;
        let done: Done = self
            .eval(Self::element_script(
                element,
                r#"el.scrollIntoView({ block: "center", behavior: "instant" }); return { found: true };"#,
            )?)
            .await?;
        if !done.found {
            return Err(self.detached(element));
        }
        Ok(())
    }

    async fn read_value(&self, element: &ElementRef) -> Result<String, ActionError> {
        self.check_epoch(element)?;
        let body = r#"
            const value = ("value" in el && typeof el.value === "string")
                ? el.value
                : (el.textContent || "");
            return { found: true, value };
        "#;
        let done: Done = self.eval(Self::element_script(element, body)?).await?;
        if !done.found {
            return Err(self.detached(element));
        }
        Ok(done.value)
    }

    async fn fill_value(&self, element: &ElementRef, value: &str) -> Result<(), ActionError> {
        self.check_epoch(element)?;
        let encoded = serde_json::to_string(value).map_err(|e| ActionError::Driver(e.to_string()))?;
        let body = format!(
            r#"
            el.focus();
            const proto = Object.getPrototypeOf(el);
            const setter = Object.getOwnPropertyDescriptor(proto, "value");
            if (setter && setter.set) {{ setter.set.call(el, {encoded}); }} else {{ el.value = {encoded}; }}
            el.dispatchEvent(new Event("input", {{ bubbles: true }}));
            el.dispatchEvent(new Event("change", {{ bubbles: true }}));
            return {{ found: true }};"#
        );
        let done: Done = self.eval(Self::element_script(element, &body)?).await?;
        if !done.found {
            return Err(self.detached(element));
        }
        self.bump();
        Ok(())
    }

    async fn wait_for_new_view(
        &self,
        timeout_ms: u64,
    ) -> Result<Box<dyn RenderContext>, ActionError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let fresh = {
                let browser = self.browser.lock().await;
                browser
                    .pages()
                    .await
                    .map_err(cdp_error)?
                    .into_iter()
                    .find(|p| !self.known_targets.contains(p.target_id()))
            };
            if let Some(page) = fresh {
                let mut known = self.known_targets.clone();
                known.insert(page.target_id().clone());
                let ctx = ChromiumContext::new(
                    page,
                    Arc::clone(&self.browser),
                    Arc::clone(&self.handler_alive),
                    self.download_dir.clone(),
                    known,
                );
                ctx.enable_downloads().await?;
                info!("adopted newly opened view");
                return Ok(Box::new(ctx));
            }
            if Instant::now() >= deadline {
                return Err(ActionError::timeout("a new view to open", timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn wait_for_download(&self, timeout_ms: u64) -> Result<PathBuf, ActionError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            {
                let mut seen = self.seen_downloads.lock().await;
                if let Some(path) = list_downloads(&self.download_dir)
                    .into_iter()
                    .find(|p| !seen.contains(p))
                {
                    seen.insert(path.clone());
                    debug!(path = %path.display(), "download landed");
                    return Ok(path);
                }
            }
            if Instant::now() >= deadline {
                return Err(ActionError::DownloadTimeout(timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn is_live(&self) -> bool {
        if !self.handler_alive.load(Ordering::SeqCst) {
            return false;
        }
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.page.evaluate("1")).await,
            Ok(Ok(_))
        )
    }

    async fn close(&self) -> Result<(), ActionError> {
        self.page.clone().close().await.map_err(cdp_error)
    }
}
