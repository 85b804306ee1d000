//! Walker configuration.
//!
//! Defaults target the HIRA InfoBank "index classification search" modal.
//! A JSON file passed with `--config` may override any subset of fields.

use crate::map::types::Level;
use crate::renderer::locator::{locators, Locator, SlotTemplate};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const GRID_PREFIX: &str = "InfoBank_RvStdInqIdxPL_form_grdIdxDiv";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    pub entry: EntryConfig,
    pub surface: SurfaceConfig,
    /// Exactly one entry per level, outermost first.
    pub levels: Vec<LevelConfig>,
    pub extraction: ExtractionConfig,
    /// Field auto-filled by the application after a leaf is selected.
    pub side_channel: Vec<Locator>,
    pub download: DownloadConfig,
    pub timeouts: ActionTimeouts,
    /// Session establish attempts allowed per run.
    pub recovery_budget: u32,
    /// Extra extraction attempts after an explicit action error.
    pub extract_retries: u32,
}

/// How to reach the application view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Host page that owns the session; also sent as referer.
    pub host_url: Option<String>,
    /// The single-page application itself.
    pub app_url: String,
    /// Menu entries on the host page that open the application in a new view.
    pub menu: Vec<Locator>,
    /// Element whose visibility marks the end of the client bootstrap.
    pub ready: Vec<Locator>,
    pub navigation_timeout_ms: u64,
    pub bootstrap_timeout_ms: u64,
    pub new_view_timeout_ms: u64,
}

/// The classification modal that hosts the level grids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub open: Vec<Locator>,
    /// Present and visible while the surface is open.
    pub marker: Vec<Locator>,
    pub close: Vec<Locator>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    pub label: String,
    pub container: Vec<Locator>,
    /// Slot locator patterns, tried in order until one yields nodes.
    pub slots: Vec<SlotTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Consecutive empty slots that end a scan.
    pub miss_limit: usize,
    /// Hard cap on scanned slot indices.
    pub max_slots: usize,
    /// Rendered strings that are never real nodes.
    pub sentinels: Vec<String>,
    pub container_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub search_input: Vec<Locator>,
    pub query: Vec<Locator>,
    pub export: Vec<Locator>,
    pub no_data: Vec<Locator>,
    pub gate_timeout_ms: u64,
    pub download_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionTimeouts {
    /// Budget for each click tier.
    pub tier_ms: u64,
    /// How long a field read waits for the field to be visible.
    pub visible_ms: u64,
    pub enabled_ms: u64,
    pub poll_ms: u64,
    /// Minimum gap between consecutive UI actions.
    pub action_gap_ms: u64,
    /// Settle time after a click whose condition is already satisfied.
    pub settle_ms: u64,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            entry: EntryConfig::default(),
            surface: SurfaceConfig::default(),
            levels: default_levels(),
            extraction: ExtractionConfig::default(),
            side_channel: locators(&["#InfoBank_form_divMain_divWork1_edtSearchTxt_input"]),
            download: DownloadConfig::default(),
            timeouts: ActionTimeouts::default(),
            recovery_budget: 3,
            extract_retries: 2,
        }
    }
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            host_url: Some("https://biz.hira.or.kr/index.do".to_string()),
            app_url: "https://biz.hira.or.kr/popup.ndo?formname=qya_bizcom%3A%3AInfoBank.xfdl&framename=InfoBank".to_string(),
            menu: locators(&["text=심사기준 종합서비스", "css=a[href*='InfoBank']"]),
            ready: locators(&["#InfoBank_form_divMain_divWork1_edtSearchTxt_input"]),
            navigation_timeout_ms: 30_000,
            bootstrap_timeout_ms: 20_000,
            new_view_timeout_ms: 10_000,
        }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            open: locators(&[
                "#InfoBank_form_divMain_divWork1_btnIdxDiv",
                "text=색인분류검색",
                "text=색인분류 검색",
            ]),
            marker: locators(&["#InfoBank_RvStdInqIdxPL"]),
            close: locators(&["text=닫기", "css=[title='닫기']"]),
            timeout_ms: 10_000,
        }
    }
}

fn default_levels() -> Vec<LevelConfig> {
    Level::ALL
        .iter()
        .map(|level| {
            let n = level.depth() + 1;
            let band = format!("#{GRID_PREFIX}{n}_bodyGridBandContainerElement_inner");
            let body = format!("#{GRID_PREFIX}{n}_body");
            LevelConfig {
                label: level.label().to_string(),
                container: locators(&[band.as_str(), body.as_str()]),
                slots: vec![SlotTemplate::new(format!(
                    "id={GRID_PREFIX}{n}_body_gridrow_{{index}}"
                ))],
            }
        })
        .collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            miss_limit: 10,
            max_slots: 1000,
            sentinels: ["undefined", "null", "대분류", "중분류", "소분류"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            container_timeout_ms: 10_000,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            search_input: locators(&["#InfoBank_form_divMain_divWork1_edtSearchTxt_input"]),
            query: locators(&["#InfoBank_form_divMain_divWork1_btnS0001"]),
            export: locators(&[
                "#InfoBank_form_divMain_divWork1_btnE0001TextBoxElement",
                "#InfoBank_form_divMain_divWork1_btnE0001",
            ]),
            no_data: locators(&["text=조회된 데이터가 없습니다"]),
            gate_timeout_ms: 10_000,
            download_timeout_ms: 30_000,
        }
    }
}

impl Default for ActionTimeouts {
    fn default() -> Self {
        Self {
            tier_ms: 3_000,
            visible_ms: 10_000,
            enabled_ms: 5_000,
            poll_ms: 100,
            action_gap_ms: 250,
            settle_ms: 500,
        }
    }
}

impl WalkerConfig {
    /// Load from a JSON file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels.len() != Level::ALL.len() {
            bail!(
                "expected {} level definitions, found {}",
                Level::ALL.len(),
                self.levels.len()
            );
        }
        for (level, cfg) in Level::ALL.iter().zip(&self.levels) {
            if cfg.slots.is_empty() {
                bail!("level {} has no slot templates", level.label());
            }
            if let Some(bad) = cfg.slots.iter().find(|t| !t.0.contains("{index}")) {
                bail!("slot template {:?} has no {{index}} placeholder", bad.0);
            }
        }
        if self.extraction.miss_limit == 0 {
            bail!("extraction.miss_limit must be at least 1");
        }
        if self.recovery_budget == 0 {
            bail!("recovery_budget must be at least 1");
        }
        url::Url::parse(&self.entry.app_url)
            .with_context(|| format!("invalid entry.app_url {:?}", self.entry.app_url))?;
        if let Some(host) = &self.entry.host_url {
            url::Url::parse(host).with_context(|| format!("invalid entry.host_url {host:?}"))?;
        }
        Ok(())
    }

    pub fn level(&self, level: Level) -> &LevelConfig {
        &self.levels[level.depth()]
    }
}

/// The indexwalk home directory (~/.indexwalk/).
pub fn indexwalk_home() -> PathBuf {
    if let Ok(p) = std::env::var("INDEXWALK_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".indexwalk")
}
