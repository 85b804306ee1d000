//! ACT handler: locate, read and click elements in the live view.
//!
//! Every action goes through the [`Pacer`]. Clicks escalate through the
//! three [`ClickTier`]s, each bounded by its own budget; stale references and
//! lost sessions stop the cascade immediately.

use crate::config::ActionTimeouts;
use crate::error::ActionError;
use crate::live::pacer::Pacer;
use crate::renderer::{ClickTier, ElementRef, Locator, RenderContext};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A single UI action over an ordered list of locator strategies.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    Locate(&'a [Locator]),
    ReadField(&'a [Locator]),
    Click(&'a [Locator]),
}

/// Conditions a located element must satisfy, and how long to wait for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub visible: bool,
    pub enabled: bool,
    /// Poll budget. Zero means a single probe.
    pub wait_ms: u64,
}

impl Constraints {
    /// Present in the DOM, no other condition, no waiting.
    pub fn present() -> Self {
        Self {
            visible: false,
            enabled: false,
            wait_ms: 0,
        }
    }

    pub fn visible(wait_ms: u64) -> Self {
        Self {
            visible: true,
            enabled: false,
            wait_ms,
        }
    }

    /// Visible and enabled.
    pub fn actionable(wait_ms: u64) -> Self {
        Self {
            visible: true,
            enabled: true,
            wait_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Located(ElementRef),
    Value(String),
    Clicked,
}

/// How close a locate pass came to a usable element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Match {
    Missing,
    Hidden,
    Disabled,
}

pub struct ActionExecutor {
    pacer: Pacer,
    timeouts: ActionTimeouts,
}

impl ActionExecutor {
    pub fn new(timeouts: &ActionTimeouts) -> Self {
        Self {
            pacer: Pacer::new(timeouts.action_gap_ms),
            timeouts: timeouts.clone(),
        }
    }

    pub fn timeouts(&self) -> &ActionTimeouts {
        &self.timeouts
    }

    pub async fn perform(
        &self,
        view: &dyn RenderContext,
        action: Action<'_>,
        constraints: Constraints,
    ) -> Result<Outcome, ActionError> {
        match action {
            Action::Locate(strategies) => self
                .locate(view, strategies, constraints)
                .await
                .map(Outcome::Located),
            Action::ReadField(strategies) => {
                let element = self.locate(view, strategies, constraints).await?;
                self.pacer.pace().await;
                view.read_value(&element).await.map(Outcome::Value)
            }
            Action::Click(strategies) => {
                let element = self.locate(view, strategies, constraints).await?;
                self.click_element(view, &element).await?;
                Ok(Outcome::Clicked)
            }
        }
    }

    /// First element matched by `strategies` (in order) that satisfies
    /// `constraints`, polling until the constraint budget runs out.
    pub async fn locate(
        &self,
        view: &dyn RenderContext,
        strategies: &[Locator],
        constraints: Constraints,
    ) -> Result<ElementRef, ActionError> {
        self.pacer.pace().await;
        let deadline = Instant::now() + Duration::from_millis(constraints.wait_ms);
        let mut best = Match::Missing;

        loop {
            match self.locate_once(view, strategies, constraints).await? {
                Ok(element) => return Ok(element),
                Err(found) => best = best.max(found),
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(self.timeouts.poll_ms.max(1))).await;
        }

        let described = describe(strategies);
        Err(match best {
            Match::Missing => ActionError::NotFound(described),
            Match::Hidden if constraints.wait_ms > 0 => {
                ActionError::timeout(format!("{described} to become visible"), constraints.wait_ms)
            }
            Match::Hidden => ActionError::NotVisible(described),
            Match::Disabled => ActionError::Disabled(described),
        })
    }

    /// One pass over every strategy. The inner `Err` reports the closest miss.
    async fn locate_once(
        &self,
        view: &dyn RenderContext,
        strategies: &[Locator],
        constraints: Constraints,
    ) -> Result<Result<ElementRef, Match>, ActionError> {
        let mut best = Match::Missing;
        for locator in strategies {
            for element in view.locate(locator).await? {
                if !constraints.visible && !constraints.enabled {
                    return Ok(Ok(element));
                }
                let state = match view.probe(&element).await {
                    Ok(state) => state,
                    Err(ActionError::SessionLost) => return Err(ActionError::SessionLost),
                    // Detached between locate and probe.
                    Err(_) => continue,
                };
                if constraints.visible && !state.visible {
                    best = best.max(Match::Hidden);
                } else if constraints.enabled && !state.enabled {
                    best = best.max(Match::Disabled);
                } else {
                    return Ok(Ok(element));
                }
            }
        }
        Ok(Err(best))
    }

    /// Whether any strategy currently matches a visible element.
    pub async fn is_visible(
        &self,
        view: &dyn RenderContext,
        strategies: &[Locator],
    ) -> Result<bool, ActionError> {
        Ok(self
            .locate_once(view, strategies, Constraints::visible(0))
            .await?
            .is_ok())
    }

    /// Wait until one of `groups` yields an element satisfying `constraints`;
    /// returns the index of the first group that does.
    pub async fn wait_for_any(
        &self,
        view: &dyn RenderContext,
        groups: &[(&[Locator], Constraints)],
        timeout_ms: u64,
    ) -> Result<usize, ActionError> {
        self.pacer.pace().await;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            for (i, (strategies, constraints)) in groups.iter().enumerate() {
                if self.locate_once(view, strategies, *constraints).await?.is_ok() {
                    return Ok(i);
                }
            }
            if Instant::now() >= deadline {
                let what = groups
                    .iter()
                    .map(|(s, _)| describe(s))
                    .collect::<Vec<_>>()
                    .join(" or ");
                return Err(ActionError::timeout(what, timeout_ms));
            }
            tokio::time::sleep(Duration::from_millis(self.timeouts.poll_ms.max(1))).await;
        }
    }

    /// Locate with `constraints` and click through the tier cascade.
    pub async fn click(
        &self,
        view: &dyn RenderContext,
        strategies: &[Locator],
        constraints: Constraints,
    ) -> Result<(), ActionError> {
        self.perform(view, Action::Click(strategies), constraints)
            .await
            .map(|_| ())
    }

    /// Click an already located element, escalating Standard, Forced,
    /// Programmatic until one succeeds.
    pub async fn click_element(
        &self,
        view: &dyn RenderContext,
        element: &ElementRef,
    ) -> Result<(), ActionError> {
        self.pacer.pace().await;
        let budget = Duration::from_millis(self.timeouts.tier_ms);
        let mut last: Option<ActionError> = None;

        for tier in ClickTier::ALL {
            let attempt = tokio::time::timeout(budget, self.click_tier(view, element, tier)).await;
            let err = match attempt {
                Ok(Ok(())) => {
                    if tier != ClickTier::Standard {
                        debug!(%element, ?tier, "click landed after escalation");
                    }
                    self.settle().await;
                    return Ok(());
                }
                Ok(Err(err)) => err,
                Err(_) => ActionError::timeout(format!("{tier:?} click on {element}"), self.timeouts.tier_ms),
            };
            match err {
                ActionError::Stale { .. } | ActionError::SessionLost => return Err(err),
                other => {
                    debug!(%element, ?tier, error = %other, "click tier failed");
                    last = Some(other);
                }
            }
        }

        let reason = last.map(|e| e.to_string()).unwrap_or_default();
        Err(ActionError::Unreachable(format!("{element}: {reason}")))
    }

    async fn click_tier(
        &self,
        view: &dyn RenderContext,
        element: &ElementRef,
        tier: ClickTier,
    ) -> Result<(), ActionError> {
        match tier {
            ClickTier::Standard => {
                loop {
                    let state = view.probe(element).await?;
                    if state.visible && state.enabled {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(self.timeouts.poll_ms.max(1))).await;
                }
                view.click(element, tier).await
            }
            ClickTier::Forced => {
                view.scroll_into_view(element).await?;
                view.click(element, tier).await
            }
            ClickTier::Programmatic => view.click(element, tier).await,
        }
    }

    /// Value of the first visible field matched by `strategies`, waiting
    /// up to the visibility budget for it to appear.
    pub async fn read_field(
        &self,
        view: &dyn RenderContext,
        strategies: &[Locator],
    ) -> Result<String, ActionError> {
        let constraints = Constraints::visible(self.timeouts.visible_ms);
        match self
            .perform(view, Action::ReadField(strategies), constraints)
            .await?
        {
            Outcome::Value(value) => Ok(value),
            _ => Ok(String::new()),
        }
    }

    pub async fn fill_field(
        &self,
        view: &dyn RenderContext,
        strategies: &[Locator],
        value: &str,
    ) -> Result<(), ActionError> {
        let element = self
            .locate(view, strategies, Constraints::actionable(self.timeouts.enabled_ms))
            .await?;
        self.pacer.pace().await;
        view.fill_value(&element, value).await
    }

    /// Settle delay after a click whose condition was already satisfied.
    async fn settle(&self) {
        if self.timeouts.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.timeouts.settle_ms)).await;
        }
    }
}

fn describe(strategies: &[Locator]) -> String {
    strategies
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::locator::locators;
    use crate::renderer::scripted::{test_config, two_major_tree, Behavior, ScriptedUi};

    fn executor() -> ActionExecutor {
        ActionExecutor::new(&test_config().timeouts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_everywhere_is_not_found() {
        let ui = ScriptedUi::new(two_major_tree());
        let err = executor()
            .locate(&ui, &locators(&["#nope", "text=없음"]), Constraints::present())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategies_tried_in_order() {
        let ui = ScriptedUi::new(two_major_tree()).opened();
        let el = executor()
            .locate(&ui, &locators(&["#nope", "#grid1_row_1"]), Constraints::visible(0))
            .await
            .unwrap();
        assert_eq!(el.locator(), &Locator::Id("grid1_row_1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_element_without_wait_is_not_visible() {
        let mut behavior = Behavior::default();
        behavior.hidden.insert("행위(A)".to_string());
        let ui = ScriptedUi::with_behavior(two_major_tree(), behavior).opened();
        let err = executor()
            .locate(&ui, &locators(&["#grid1_row_0"]), Constraints::visible(0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_visible");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_element_with_wait_times_out() {
        let mut behavior = Behavior::default();
        behavior.hidden.insert("행위(A)".to_string());
        let ui = ScriptedUi::with_behavior(two_major_tree(), behavior).opened();
        let start = Instant::now();
        let err = executor()
            .locate(&ui, &locators(&["#grid1_row_0"]), Constraints::visible(500))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(start.elapsed() >= Duration::from_millis(500));
        // Presence alone does not need visibility.
        assert!(executor()
            .locate(&ui, &locators(&["#grid1_row_0"]), Constraints::present())
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_export_reports_disabled() {
        let ui = ScriptedUi::new(two_major_tree());
        let err = executor()
            .locate(&ui, &locators(&["#btn-export"]), Constraints::actionable(0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "disabled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_obstructed_node_falls_through_to_programmatic() {
        let mut behavior = Behavior::default();
        behavior.obstructed.insert("행위(A)".to_string());
        let ui = ScriptedUi::with_behavior(two_major_tree(), behavior).opened();
        let exec = executor();
        let el = exec
            .locate(&ui, &locators(&["#grid1_row_0"]), Constraints::visible(0))
            .await
            .unwrap();
        exec.click_element(&ui, &el).await.unwrap();

        let state = ui.state();
        let st = state.lock().unwrap();
        assert_eq!(st.clicks, vec![("행위(A)".to_string(), ClickTier::Programmatic)]);
        assert_eq!(st.selected, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclickable_node_is_unreachable() {
        let mut behavior = Behavior::default();
        behavior.unclickable.insert("약제(B)".to_string());
        let ui = ScriptedUi::with_behavior(two_major_tree(), behavior).opened();
        let exec = executor();
        let el = exec
            .locate(&ui, &locators(&["#grid1_row_1"]), Constraints::visible(0))
            .await
            .unwrap();
        let err = exec.click_element(&ui, &el).await.unwrap_err();
        assert_eq!(err.kind(), "unreachable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reference_is_not_retried() {
        let ui = ScriptedUi::new(two_major_tree()).opened();
        let exec = executor();
        let first = exec
            .locate(&ui, &locators(&["#grid1_row_0"]), Constraints::visible(0))
            .await
            .unwrap();
        let second = exec
            .locate(&ui, &locators(&["#grid1_row_1"]), Constraints::visible(0))
            .await
            .unwrap();
        exec.click_element(&ui, &second).await.unwrap();

        let err = exec.click_element(&ui, &first).await.unwrap_err();
        assert!(matches!(err, ActionError::Stale { .. }));
        assert_eq!(ui.state().lock().unwrap().clicks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_any_times_out() {
        let ui = ScriptedUi::new(two_major_tree());
        let exec = executor();
        let export = locators(&["#btn-export"]);
        let start = Instant::now();
        let err = exec
            .wait_for_any(&ui, &[(export.as_slice(), Constraints::actionable(0))], 1_000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_and_fill_field() {
        let ui = ScriptedUi::new(two_major_tree());
        let exec = executor();
        let field = locators(&["#search-input"]);
        exec.fill_field(&ui, &field, "AA100").await.unwrap();
        assert_eq!(exec.read_field(&ui, &field).await.unwrap(), "AA100");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_field_read_waits_for_visibility_budget() {
        let mut behavior = Behavior::default();
        behavior.hidden.insert("AA100".to_string());
        let ui = ScriptedUi::with_behavior(two_major_tree(), behavior);
        ui.state().lock().unwrap().search_value = "AA100".to_string();
        let mut timeouts = test_config().timeouts;
        timeouts.visible_ms = 300;
        let exec = ActionExecutor::new(&timeouts);

        let start = Instant::now();
        let err = exec
            .read_field(&ui, &locators(&["#search-input"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_view_reports_session_lost() {
        let ui = ScriptedUi::new(two_major_tree());
        ui.state().lock().unwrap().live = false;
        let err = executor()
            .locate(&ui, &locators(&["#open-index"]), Constraints::present())
            .await
            .unwrap_err();
        assert!(err.is_session_lost());
    }
}
