//! Scripted in-memory classification UI for tests.
//!
//! Renders a three-level tree into numbered grid slots the way the real
//! modal does, enforces snapshot epochs on element references, and can be
//! told to obstruct nodes, drop the view, or answer queries with no data.

use super::{ClickTier, ElementRef, ElementState, Locator, NavigationResult, RenderContext, Renderer};
use crate::config::{LevelConfig, WalkerConfig};
use crate::error::ActionError;
use crate::map::types::Level;
use crate::renderer::locator::{locators, SlotTemplate};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const NO_DATA_TEXT: &str = "조회된 데이터가 없습니다";

#[derive(Debug, Clone)]
pub(crate) struct ScriptedNode {
    pub text: String,
    pub slot: Option<usize>,
    pub children: Vec<ScriptedNode>,
}

impl ScriptedNode {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            slot: None,
            children: Vec::new(),
        }
    }

    pub fn at_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with(mut self, children: Vec<ScriptedNode>) -> Self {
        self.children = children;
        self
    }
}

/// Knobs for UI misbehaviour.
#[derive(Debug, Clone, Default)]
pub(crate) struct Behavior {
    /// Node texts that only accept the programmatic click tier.
    pub obstructed: HashSet<String>,
    /// Node texts that reject every click tier.
    pub unclickable: HashSet<String>,
    /// Whether a query returns rows.
    pub has_data: bool,
    /// Whether the export control ever becomes enabled after a query.
    pub export_ready: bool,
    pub download_dir: Option<PathBuf>,
    /// Node texts rendered but never visible.
    pub hidden: HashSet<String>,
    /// Node texts that only become visible once scrolled into view.
    pub offscreen: HashSet<String>,
    /// The grid re-renders once just before the first row click lands,
    /// invalidating every handle taken before it.
    pub rerender_before_first_row_click: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Virtual {
    OpenButton,
    Marker,
    CloseButton,
    Container(usize),
    Row(usize, usize),
    SearchInput,
    QueryButton,
    ExportButton,
    NoData,
}

#[derive(Debug, Default)]
pub(crate) struct UiState {
    pub epoch: u64,
    pub live: bool,
    pub surface_open: bool,
    pub selected: Vec<usize>,
    pub search_value: String,
    pub query_has_data: Option<bool>,
    pub pending_download: bool,
    pub downloads: usize,
    pub probes: usize,
    pub clicks: Vec<(String, ClickTier)>,
    pub opens: usize,
    pub navigations: usize,
    pub die_after_clicks: Option<usize>,
    pub scrolled: HashSet<String>,
    pub rerendered: bool,
}

pub(crate) struct ScriptedUi {
    tree: Arc<Vec<ScriptedNode>>,
    behavior: Arc<Behavior>,
    state: Arc<Mutex<UiState>>,
}

impl ScriptedUi {
    pub fn new(tree: Vec<ScriptedNode>) -> Self {
        Self::with_behavior(tree, Behavior::default())
    }

    pub fn with_behavior(tree: Vec<ScriptedNode>, behavior: Behavior) -> Self {
        Self {
            tree: Arc::new(tree),
            behavior: Arc::new(behavior),
            state: Arc::new(Mutex::new(UiState {
                live: true,
                ..UiState::default()
            })),
        }
    }

    pub fn state(&self) -> Arc<Mutex<UiState>> {
        Arc::clone(&self.state)
    }

    /// Open the surface directly, as after a completed bootstrap.
    pub fn opened(self) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            st.surface_open = true;
        }
        self
    }

    fn rendered(&self, st: &UiState, level: usize) -> Vec<&ScriptedNode> {
        if !st.surface_open || st.selected.len() < level {
            return Vec::new();
        }
        let mut list: &Vec<ScriptedNode> = &self.tree;
        for &idx in st.selected.iter().take(level) {
            match list.get(idx) {
                Some(node) => list = &node.children,
                None => return Vec::new(),
            }
        }
        list.iter().collect()
    }

    fn row_index(&self, st: &UiState, level: usize, slot: usize) -> Option<usize> {
        self.rendered(st, level)
            .iter()
            .enumerate()
            .find(|(pos, node)| node.slot.unwrap_or(*pos) == slot)
            .map(|(pos, _)| pos)
    }

    fn resolve(&self, st: &UiState, locator: &Locator) -> Vec<Virtual> {
        let present = |v: Virtual| -> bool {
            match v {
                Virtual::Marker | Virtual::CloseButton | Virtual::Container(_) => st.surface_open,
                Virtual::Row(level, slot) => self.row_index(st, level, slot).is_some(),
                Virtual::NoData => st.query_has_data == Some(false),
                _ => true,
            }
        };
        let candidate = match locator {
            Locator::Id(id) => match id.as_str() {
                "open-index" => Some(Virtual::OpenButton),
                "index-panel" => Some(Virtual::Marker),
                "search-input" => Some(Virtual::SearchInput),
                "btn-search" => Some(Virtual::QueryButton),
                "btn-export" => Some(Virtual::ExportButton),
                other => parse_grid_id(other),
            },
            Locator::Text(text) if text == "닫기" => Some(Virtual::CloseButton),
            Locator::Text(text) if text == NO_DATA_TEXT => Some(Virtual::NoData),
            _ => None,
        };
        candidate.into_iter().filter(|v| present(*v)).collect()
    }

    fn element(&self, st: &UiState, element: &ElementRef) -> Result<Virtual, ActionError> {
        if !st.live {
            return Err(ActionError::SessionLost);
        }
        if element.epoch != st.epoch {
            return Err(ActionError::Stale {
                held: element.epoch,
                current: st.epoch,
            });
        }
        self.resolve(st, &element.locator)
            .get(element.nth)
            .copied()
            .ok_or(ActionError::Stale {
                held: element.epoch,
                current: st.epoch,
            })
    }

    fn text_of(&self, st: &UiState, v: Virtual) -> String {
        match v {
            Virtual::Row(level, slot) => self
                .row_index(st, level, slot)
                .map(|pos| self.rendered(st, level)[pos].text.clone())
                .unwrap_or_default(),
            Virtual::CloseButton => "닫기".to_string(),
            Virtual::NoData => NO_DATA_TEXT.to_string(),
            Virtual::SearchInput => st.search_value.clone(),
            _ => String::new(),
        }
    }
}

fn parse_grid_id(id: &str) -> Option<Virtual> {
    let rest = id.strip_prefix("grid").filter(|r| !r.is_empty())?;
    let (level, tail) = rest.split_at(1);
    let level: usize = level.parse::<usize>().ok()?.checked_sub(1)?;
    if tail.is_empty() {
        return Some(Virtual::Container(level));
    }
    let slot = tail.strip_prefix("_row_")?.parse().ok()?;
    Some(Virtual::Row(level, slot))
}

#[async_trait]
impl RenderContext for ScriptedUi {
    async fn navigate(
        &self,
        url: &str,
        _referer: Option<&str>,
        _timeout_ms: u64,
    ) -> Result<NavigationResult, ActionError> {
        let mut st = self.state.lock().unwrap();
        if !st.live {
            return Err(ActionError::SessionLost);
        }
        st.navigations += 1;
        st.epoch += 1;
        st.surface_open = false;
        st.selected.clear();
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 0,
        })
    }

    async fn wait_for_quiescence(&self, _timeout_ms: u64) -> Result<(), ActionError> {
        if self.state.lock().unwrap().live {
            Ok(())
        } else {
            Err(ActionError::SessionLost)
        }
    }

    async fn locate(&self, locator: &Locator) -> Result<Vec<ElementRef>, ActionError> {
        let mut st = self.state.lock().unwrap();
        if !st.live {
            return Err(ActionError::SessionLost);
        }
        st.probes += 1;
        let epoch = st.epoch;
        Ok((0..self.resolve(&st, locator).len())
            .map(|nth| ElementRef::new(epoch, locator.clone(), nth))
            .collect())
    }

    async fn probe(&self, element: &ElementRef) -> Result<ElementState, ActionError> {
        let st = self.state.lock().unwrap();
        let v = self.element(&st, element)?;
        let enabled = match v {
            Virtual::ExportButton => {
                st.query_has_data == Some(true) && self.behavior.export_ready
            }
            _ => true,
        };
        let text = self.text_of(&st, v);
        let visible = !self.behavior.hidden.contains(&text)
            && (!self.behavior.offscreen.contains(&text) || st.scrolled.contains(&text));
        Ok(ElementState {
            visible,
            enabled,
            text,
        })
    }

    async fn click(&self, element: &ElementRef, tier: ClickTier) -> Result<(), ActionError> {
        let mut st = self.state.lock().unwrap();
        let v = self.element(&st, element)?;
        let text = self.text_of(&st, v);
        if self.behavior.unclickable.contains(&text) {
            return Err(ActionError::NotVisible(format!("{text} is covered")));
        }
        if self.behavior.obstructed.contains(&text) && tier != ClickTier::Programmatic {
            return Err(ActionError::NotVisible(format!("{text} is obstructed")));
        }
        if matches!(v, Virtual::Row(..))
            && self.behavior.rerender_before_first_row_click
            && !st.rerendered
        {
            st.rerendered = true;
            st.epoch += 1;
            return Err(ActionError::Stale {
                held: element.epoch,
                current: st.epoch,
            });
        }

        match v {
            Virtual::OpenButton => {
                st.surface_open = true;
                st.selected.clear();
                st.opens += 1;
            }
            Virtual::CloseButton => {
                st.surface_open = false;
                st.selected.clear();
            }
            Virtual::Row(level, slot) => {
                let pos = self
                    .row_index(&st, level, slot)
                    .ok_or_else(|| ActionError::NotFound(element.to_string()))?;
                st.selected.truncate(level);
                st.selected.push(pos);
                if level == Level::Minor.depth() {
                    let parsed = crate::extraction::parse::parse_node_text(&text);
                    st.search_value = if parsed.code.is_empty() {
                        format!("CODE-{}", parsed.name)
                    } else {
                        parsed.code
                    };
                }
            }
            Virtual::QueryButton => {
                st.query_has_data = Some(self.behavior.has_data);
            }
            Virtual::ExportButton => {
                st.pending_download = true;
            }
            _ => {}
        }

        st.epoch += 1;
        st.clicks.push((text, tier));
        if let Some(limit) = st.die_after_clicks {
            if st.clicks.len() >= limit {
                st.live = false;
            }
        }
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), ActionError> {
        let mut st = self.state.lock().unwrap();
        let v = self.element(&st, element)?;
        let text = self.text_of(&st, v);
        st.scrolled.insert(text);
        Ok(())
    }

    async fn read_value(&self, element: &ElementRef) -> Result<String, ActionError> {
        let st = self.state.lock().unwrap();
        let v = self.element(&st, element)?;
        Ok(self.text_of(&st, v))
    }

    async fn fill_value(&self, element: &ElementRef, value: &str) -> Result<(), ActionError> {
        let mut st = self.state.lock().unwrap();
        match self.element(&st, element)? {
            Virtual::SearchInput => {
                st.search_value = value.to_string();
                st.query_has_data = None;
                st.epoch += 1;
                Ok(())
            }
            _ => Err(ActionError::Disabled(element.to_string())),
        }
    }

    async fn wait_for_new_view(
        &self,
        timeout_ms: u64,
    ) -> Result<Box<dyn RenderContext>, ActionError> {
        tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
        Err(ActionError::timeout("new view", timeout_ms))
    }

    async fn wait_for_download(&self, timeout_ms: u64) -> Result<PathBuf, ActionError> {
        let ready = {
            let mut st = self.state.lock().unwrap();
            if st.pending_download {
                st.pending_download = false;
                st.downloads += 1;
                Some(st.downloads)
            } else {
                None
            }
        };
        match (ready, &self.behavior.download_dir) {
            (Some(n), Some(dir)) => {
                let path = dir.join(format!("export_{n}.xlsx"));
                std::fs::write(&path, b"xlsx").map_err(|e| ActionError::Driver(e.to_string()))?;
                Ok(path)
            }
            (Some(n), None) => Ok(PathBuf::from(format!("export_{n}.xlsx"))),
            (None, _) => {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                Err(ActionError::DownloadTimeout(timeout_ms))
            }
        }
    }

    async fn is_live(&self) -> bool {
        self.state.lock().unwrap().live
    }

    async fn close(&self) -> Result<(), ActionError> {
        self.state.lock().unwrap().live = false;
        Ok(())
    }
}

/// Renderer handing out scripted views over one shared tree.
pub(crate) struct ScriptedRenderer {
    tree: Vec<ScriptedNode>,
    behavior: Behavior,
    dead_from: Option<usize>,
    die_after_clicks: Option<usize>,
    created: AtomicUsize,
    views: Mutex<Vec<Arc<Mutex<UiState>>>>,
}

impl ScriptedRenderer {
    pub fn new(tree: Vec<ScriptedNode>) -> Self {
        Self {
            tree,
            behavior: Behavior::default(),
            dead_from: None,
            die_after_clicks: None,
            created: AtomicUsize::new(0),
            views: Mutex::new(Vec::new()),
        }
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Views created at or after this 0-based ordinal are dead on arrival.
    pub fn dead_from(mut self, ordinal: usize) -> Self {
        self.dead_from = Some(ordinal);
        self
    }

    /// The first view detaches after this many successful clicks.
    pub fn first_dies_after_clicks(mut self, clicks: usize) -> Self {
        self.die_after_clicks = Some(clicks);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn view_state(&self, ordinal: usize) -> Option<Arc<Mutex<UiState>>> {
        self.views.lock().unwrap().get(ordinal).cloned()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, ActionError> {
        let ordinal = self.created.fetch_add(1, Ordering::SeqCst);
        let ui = ScriptedUi::with_behavior(self.tree.clone(), self.behavior.clone());
        {
            let state = ui.state();
            let mut st = state.lock().unwrap();
            st.live = self.dead_from.map_or(true, |from| ordinal < from);
            if ordinal == 0 {
                st.die_after_clicks = self.die_after_clicks;
            }
        }
        self.views.lock().unwrap().push(ui.state());
        Ok(Box::new(ui))
    }

    async fn close(&self) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Walker configuration wired to the scripted UI's element ids.
pub(crate) fn test_config() -> WalkerConfig {
    let mut config = WalkerConfig::default();
    config.entry.host_url = None;
    config.entry.app_url = "https://app.test/index".to_string();
    config.entry.menu = Vec::new();
    config.entry.ready = locators(&["#search-input"]);
    config.surface.open = locators(&["#open-index"]);
    config.surface.marker = locators(&["#index-panel"]);
    config.surface.close = locators(&["text=닫기"]);
    config.levels = Level::ALL
        .iter()
        .map(|level| {
            let n = level.depth() + 1;
            LevelConfig {
                label: level.label().to_string(),
                container: locators(&[format!("#grid{n}").as_str()]),
                slots: vec![SlotTemplate::new(format!("id=grid{n}_row_{{index}}"))],
            }
        })
        .collect();
    config.side_channel = locators(&["#search-input"]);
    config.download.search_input = locators(&["#search-input"]);
    config.download.query = locators(&["#btn-search"]);
    config.download.export = locators(&["#btn-export"]);
    let no_data = format!("text={NO_DATA_TEXT}");
    config.download.no_data = locators(&[no_data.as_str()]);
    config.timeouts.action_gap_ms = 0;
    config.timeouts.settle_ms = 0;
    config
}

/// Two majors with one middle each; the first middle has two minors, the
/// second none.
pub(crate) fn two_major_tree() -> Vec<ScriptedNode> {
    vec![
        ScriptedNode::new("행위(A)").with(vec![ScriptedNode::new("01 기본진료료").with(vec![
            ScriptedNode::new("진찰료(AA100)"),
            ScriptedNode::new("입원료(AB200)"),
        ])]),
        ScriptedNode::new("약제(B)").with(vec![ScriptedNode::new("01 내복약")]),
    ]
}
