//! Sibling extraction: enumerate the nodes a level grid currently renders.
//!
//! Grids render rows into numbered slots that may be sparse, so a scan walks
//! slot indices until a run of consecutive misses or the hard cap.

use crate::config::{ExtractionConfig, LevelConfig};
use crate::error::ActionError;
use crate::extraction::parse::normalize_text;
use crate::live::act::{ActionExecutor, Constraints};
use crate::map::types::{ClassificationNode, Level};
use crate::renderer::{ElementRef, Locator, RenderContext, SlotTemplate};
use std::collections::HashSet;
use tracing::{debug, trace};

enum Slot {
    Filled(ElementRef, String),
    Missing,
}

pub struct NodeExtractor<'a> {
    exec: &'a ActionExecutor,
    config: &'a ExtractionConfig,
    levels: &'a [LevelConfig],
}

impl<'a> NodeExtractor<'a> {
    pub fn new(
        exec: &'a ActionExecutor,
        config: &'a ExtractionConfig,
        levels: &'a [LevelConfig],
    ) -> Self {
        Self {
            exec,
            config,
            levels,
        }
    }

    /// Fresh snapshot of the nodes rendered at `level`, in rendering order.
    ///
    /// A missing container is an error; an empty list means the parent has
    /// no children.
    pub async fn extract_siblings(
        &self,
        view: &dyn RenderContext,
        level: Level,
    ) -> Result<Vec<ClassificationNode>, ActionError> {
        let level_config = self
            .levels
            .get(level.depth())
            .ok_or_else(|| ActionError::NotFound(format!("no configuration for level {level}")))?;

        self.exec
            .locate(
                view,
                &level_config.container,
                Constraints::visible(self.config.container_timeout_ms),
            )
            .await?;

        for template in &level_config.slots {
            let nodes = self.scan(view, template).await?;
            if !nodes.is_empty() {
                debug!(%level, count = nodes.len(), template = %template.0, "extracted siblings");
                return Ok(nodes);
            }
        }
        debug!(%level, "no siblings rendered");
        Ok(Vec::new())
    }

    async fn scan(
        &self,
        view: &dyn RenderContext,
        template: &SlotTemplate,
    ) -> Result<Vec<ClassificationNode>, ActionError> {
        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        let mut misses = 0;

        for index in 0..self.config.max_slots {
            if misses >= self.config.miss_limit {
                break;
            }
            let Some(locator) = template.at(index) else {
                break;
            };
            match self.probe_slot(view, &locator).await? {
                Slot::Missing => misses += 1,
                Slot::Filled(element, text) => {
                    misses = 0;
                    if self.is_sentinel(&text) {
                        trace!(index, %text, "sentinel row");
                        continue;
                    }
                    if seen.insert(text.clone()) {
                        nodes.push(ClassificationNode::new(text, index, element));
                    }
                }
            }
        }
        Ok(nodes)
    }

    async fn probe_slot(
        &self,
        view: &dyn RenderContext,
        locator: &Locator,
    ) -> Result<Slot, ActionError> {
        let Some(element) = view.locate(locator).await?.into_iter().next() else {
            return Ok(Slot::Missing);
        };
        let mut state = view.probe(&element).await?;
        if !state.visible {
            // Virtualised grids only render rows near the viewport.
            view.scroll_into_view(&element).await?;
            state = view.probe(&element).await?;
        }
        let text = normalize_text(&state.text);
        if !state.visible || text.is_empty() {
            return Ok(Slot::Missing);
        }
        Ok(Slot::Filled(element, text))
    }

    fn is_sentinel(&self, text: &str) -> bool {
        self.config.sentinels.iter().any(|s| s == text)
    }
}
