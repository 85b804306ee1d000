// Copyright 2026 Omoshola Owolabi
// SPDX-License-Identifier: MIT

//! Depth-first walk of the three-level classification tree.
//!
//! The UI only shows the children of whatever is currently selected and has
//! no back button, so the walk is an explicit stack of frames plus a cursor
//! recording which path's children the grids are showing right now. Before a
//! frame is used the cursor is checked, and when it does not match the path
//! is rebuilt from scratch: reset the surface, then re-click every ancestor,
//! each located afresh by its display text.

use crate::acquisition::{DownloadCorrelator, FetchOutcome};
use crate::config::WalkerConfig;
use crate::error::{ActionError, WalkError};
use crate::extraction::NodeExtractor;
use crate::input::MappingRow;
use crate::live::act::ActionExecutor;
use crate::live::session::{Liveness, SessionGuard};
use crate::live::surface::Surface;
use crate::map::sink::{ManifestEntry, ManifestOutcome, ResultSink};
use crate::map::types::{ClassificationNode, ClassificationRecord, Level, TraversalPath, VisitKey};
use crate::renderer::Renderer;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counters for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalkStats {
    pub majors: usize,
    pub middles: usize,
    pub minors: usize,
    pub leaf_records: usize,
    pub partial_records: usize,
    pub skipped: usize,
    pub restores: usize,
    pub recoveries: usize,
    pub downloads: usize,
    pub elapsed_ms: u64,
}

pub type ProgressFn = Box<dyn Fn(&WalkStats) + Send + Sync>;

struct Frame {
    path: TraversalPath,
    siblings: Vec<ClassificationNode>,
    next: usize,
    loaded: bool,
}

impl Frame {
    fn new(path: TraversalPath) -> Self {
        Self {
            path,
            siblings: Vec::new(),
            next: 0,
            loaded: false,
        }
    }
}

pub struct TaxonomyWalker {
    config: WalkerConfig,
    exec: ActionExecutor,
    guard: SessionGuard,
    downloads: Option<DownloadCorrelator>,
    visited: HashSet<VisitKey>,
    /// Path whose children the grids currently show; `None` when unknown.
    cursor: Option<VisitKey>,
    stats: WalkStats,
    progress: Option<ProgressFn>,
    started: Option<Instant>,
}

impl TaxonomyWalker {
    pub fn new(renderer: Arc<dyn Renderer>, config: WalkerConfig) -> Self {
        let exec = ActionExecutor::new(&config.timeouts);
        let guard = SessionGuard::new(renderer, &config);
        Self {
            config,
            exec,
            guard,
            downloads: None,
            visited: HashSet::new(),
            cursor: None,
            stats: WalkStats::default(),
            progress: None,
            started: None,
        }
    }

    /// Run the query/export protocol for every leaf.
    pub fn with_downloads(mut self, correlator: DownloadCorrelator) -> Self {
        self.downloads = Some(correlator);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    /// Walk the whole tree, appending rows and outcomes to `sink`.
    ///
    /// The sink is borrowed so whatever was collected survives an error or a
    /// cancelled future.
    pub async fn run(&mut self, sink: &mut ResultSink) -> Result<WalkStats, WalkError> {
        let started = Instant::now();
        self.started = Some(started);
        let result = self.walk(sink).await;
        self.finish(started, result, "walk").await
    }

    /// Select each mapping row's labels from the top level down and record
    /// the row it lands on, with its download when enabled. Labels that are
    /// no longer listed are noted under the row's identifier.
    pub async fn run_mapped(
        &mut self,
        rows: &[MappingRow],
        sink: &mut ResultSink,
    ) -> Result<WalkStats, WalkError> {
        let started = Instant::now();
        self.started = Some(started);
        let result = self.walk_mapped(rows, sink).await;
        self.finish(started, result, "mapped walk").await
    }

    async fn finish(
        &mut self,
        started: Instant,
        result: Result<(), WalkError>,
        what: &str,
    ) -> Result<WalkStats, WalkError> {
        self.guard.close().await;
        self.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                records = self.stats.leaf_records,
                partial = self.stats.partial_records,
                skipped = self.stats.skipped,
                restores = self.stats.restores,
                recoveries = self.stats.recoveries,
                "{what} complete"
            ),
            Err(e) => warn!(records = self.stats.leaf_records, "{what} aborted: {e}"),
        }
        result.map(|()| self.stats.clone())
    }

    async fn walk(&mut self, sink: &mut ResultSink) -> Result<(), WalkError> {
        self.guard.start(&self.exec).await?;
        self.cursor = Some(VisitKey::default());

        let mut stack = vec![Frame::new(TraversalPath::root())];
        while let Some(top) = stack.last_mut() {
            if !top.loaded {
                let Some(siblings) = self.load_frame(&top.path, sink).await? else {
                    stack.pop();
                    continue;
                };
                if siblings.is_empty() {
                    if top.path.is_empty() {
                        warn!("no majors listed");
                    } else {
                        self.record_partial(&top.path, sink);
                    }
                    stack.pop();
                    continue;
                }
                top.siblings = siblings;
                top.loaded = true;
            }

            let Some(node) = top.siblings.get(top.next).cloned() else {
                stack.pop();
                continue;
            };
            top.next += 1;
            let path = top.path.clone();
            if let Some(child) = self.visit(&path, node, sink).await? {
                stack.push(Frame::new(child));
            }
        }
        Ok(())
    }

    async fn walk_mapped(&mut self, rows: &[MappingRow], sink: &mut ResultSink) -> Result<(), WalkError> {
        self.guard.start(&self.exec).await?;
        self.cursor = Some(VisitKey::default());

        for (i, row) in rows.iter().enumerate() {
            let mut retried = false;
            loop {
                self.ensure_session().await?;
                match self.drive(&row.labels).await {
                    Ok(path) => {
                        self.record_leaf(&path, row.identifier.clone(), sink).await;
                        self.cursor = None;
                        break;
                    }
                    Err(ActionError::SessionLost) if !retried => {
                        warn!(identifier = %row.identifier, "session lost while selecting, recovering");
                        self.guard.invalidate();
                        self.cursor = None;
                        retried = true;
                    }
                    Err(e) => {
                        warn!(identifier = %row.identifier, "skipping: {e}");
                        if e.is_session_lost() {
                            self.guard.invalidate();
                        }
                        sink.note(ManifestEntry::failed(row.identifier.as_str(), &e));
                        self.stats.skipped += 1;
                        self.cursor = None;
                        break;
                    }
                }
            }
            debug!(identifier = %row.identifier, done = i + 1, total = rows.len(), "mapping row processed");
        }
        Ok(())
    }

    /// Select `labels` one level at a time, reusing whatever prefix the
    /// grids already show.
    async fn drive(&mut self, labels: &[String]) -> Result<TraversalPath, ActionError> {
        let mut path = TraversalPath::root();
        for label in labels {
            let Some(level) = path.level() else {
                break;
            };
            self.restore(&path).await?;
            let view = self.guard.view()?;
            let node = NodeExtractor::new(&self.exec, &self.config.extraction, &self.config.levels)
                .extract_siblings(view, level)
                .await?
                .into_iter()
                .find(|n| n.answers_to(label))
                .ok_or_else(|| ActionError::NotFound(format!("{label} is not listed under {path}")))?;
            self.cursor = None;
            self.exec.click_element(view, &node.stable_ref).await?;
            path = match path.child(node) {
                Some(p) => p,
                None => break,
            };
            self.cursor = Some(path.visit_key());
        }
        Ok(path)
    }

    /// Make sure a live view exists; a replaced view shows the top level.
    async fn ensure_session(&mut self) -> Result<(), WalkError> {
        if self.guard.ensure_live(&self.exec).await? == Liveness::Replaced {
            self.stats.recoveries += 1;
            self.cursor = Some(VisitKey::default());
        }
        Ok(())
    }

    /// Extract the children of `path`, retrying after a restore. `None`
    /// means the frame is abandoned.
    async fn load_frame(
        &mut self,
        path: &TraversalPath,
        sink: &mut ResultSink,
    ) -> Result<Option<Vec<ClassificationNode>>, WalkError> {
        let Some(level) = path.level() else {
            return Ok(None);
        };

        let mut attempt = 0;
        loop {
            self.ensure_session().await?;
            let err = match self.extract_at(path, level).await {
                Ok(nodes) => {
                    match level {
                        Level::Major => self.stats.majors += nodes.len(),
                        Level::Middle => self.stats.middles += nodes.len(),
                        Level::Minor => self.stats.minors += nodes.len(),
                    }
                    return Ok(Some(nodes));
                }
                Err(e) => e,
            };

            self.cursor = None;
            if err.is_session_lost() {
                self.guard.invalidate();
            }
            if attempt >= self.config.extract_retries {
                warn!(%path, %level, "giving up on level: {err}");
                sink.note(ManifestEntry::failed(path.to_string(), &err));
                self.stats.skipped += 1;
                return Ok(None);
            }
            attempt += 1;
            debug!(%path, %level, attempt, "extraction failed, retrying: {err}");
        }
    }

    async fn extract_at(
        &mut self,
        path: &TraversalPath,
        level: Level,
    ) -> Result<Vec<ClassificationNode>, ActionError> {
        self.restore(path).await?;
        let view = self.guard.view()?;
        NodeExtractor::new(&self.exec, &self.config.extraction, &self.config.levels)
            .extract_siblings(view, level)
            .await
    }

    /// Bring the UI to the state where `path`'s children are listed.
    async fn restore(&mut self, path: &TraversalPath) -> Result<(), ActionError> {
        let target = path.visit_key();
        if self.cursor.as_ref() == Some(&target) {
            return Ok(());
        }
        debug!(%path, "restoring");
        self.stats.restores += 1;
        self.cursor = None;

        let view = self.guard.view()?;
        Surface::new(&self.exec, &self.config.surface)
            .reset_to_root(view)
            .await?;
        self.cursor = Some(VisitKey::default());

        let extractor = NodeExtractor::new(&self.exec, &self.config.extraction, &self.config.levels);
        let mut partial = TraversalPath::root();
        for ancestor in path.nodes() {
            let Some(level) = partial.level() else {
                break;
            };
            self.cursor = None;
            let node = extractor
                .extract_siblings(view, level)
                .await?
                .into_iter()
                .find(|n| n.raw_text == ancestor.raw_text)
                .ok_or_else(|| {
                    ActionError::NotFound(format!("{} is no longer listed", ancestor.raw_text))
                })?;
            self.exec.click_element(view, &node.stable_ref).await?;
            partial = match partial.child(node) {
                Some(p) => p,
                None => break,
            };
            self.cursor = Some(partial.visit_key());
        }
        Ok(())
    }

    /// Click `node` below `path`. Returns the child path when the walk
    /// should descend into it.
    async fn visit(
        &mut self,
        path: &TraversalPath,
        node: ClassificationNode,
        sink: &mut ResultSink,
    ) -> Result<Option<TraversalPath>, WalkError> {
        let key = path.child_key(&node);
        if self.visited.contains(&key) {
            debug!(%key, "already visited");
            return Ok(None);
        }
        let Some(level) = path.level() else {
            return Ok(None);
        };

        loop {
            self.ensure_session().await?;
            match self.select(path, &node, level).await {
                Ok(selected) => {
                    self.visited.insert(key);
                    let Some(child) = path.child(selected) else {
                        return Ok(None);
                    };
                    if level.is_leaf() {
                        self.record_leaf(&child, child.to_string(), sink).await;
                        self.cursor = None;
                        return Ok(None);
                    }
                    self.cursor = Some(child.visit_key());
                    return Ok(Some(child));
                }
                Err(ActionError::SessionLost) => {
                    warn!(%key, "session lost while selecting, recovering");
                    self.guard.invalidate();
                    self.cursor = None;
                }
                Err(e) => {
                    warn!(%key, "skipping: {e}");
                    sink.note(ManifestEntry::failed(key.to_string(), &e));
                    self.stats.skipped += 1;
                    self.cursor = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Click `node`, using its extracted handle when the UI is still in the
    /// state it was extracted from, otherwise restoring and re-locating it.
    async fn select(
        &mut self,
        path: &TraversalPath,
        node: &ClassificationNode,
        level: Level,
    ) -> Result<ClassificationNode, ActionError> {
        if self.cursor.as_ref() == Some(&path.visit_key()) {
            let view = self.guard.view()?;
            match self.exec.click_element(view, &node.stable_ref).await {
                Ok(()) => return Ok(node.clone()),
                Err(ActionError::Stale { .. }) => {
                    debug!(node = %node.raw_text, "handle went stale, re-locating");
                    self.cursor = None;
                }
                Err(e) => return Err(e),
            }
        }

        self.restore(path).await?;
        let view = self.guard.view()?;
        let fresh = NodeExtractor::new(&self.exec, &self.config.extraction, &self.config.levels)
            .extract_siblings(view, level)
            .await?
            .into_iter()
            .find(|n| n.raw_text == node.raw_text)
            .ok_or_else(|| ActionError::NotFound(format!("{} is no longer listed", node.raw_text)))?;
        self.cursor = None;
        self.exec.click_element(view, &fresh.stable_ref).await?;
        Ok(fresh)
    }

    async fn record_leaf(&mut self, path: &TraversalPath, identifier: String, sink: &mut ResultSink) {
        let read = match self.guard.view() {
            Ok(view) => self.exec.read_field(view, &self.config.side_channel).await,
            Err(e) => Err(e),
        };
        let side_channel = match read {
            Ok(value) => value.trim().to_string(),
            Err(e) => {
                debug!(%path, "side channel unreadable: {e}");
                if e.is_session_lost() {
                    self.guard.invalidate();
                }
                String::new()
            }
        };

        let record = ClassificationRecord::from_path(path, side_channel);
        if sink.add(record.clone()) {
            self.stats.leaf_records += 1;
            debug!(%path, code = %record.minor_code, "leaf recorded");
        }

        if let Some(correlator) = &self.downloads {
            let outcome = match self.guard.view() {
                Ok(view) => correlator.fetch(&self.exec, view, path, &record).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(outcome) => {
                    if matches!(outcome, FetchOutcome::Success { .. }) {
                        self.stats.downloads += 1;
                    }
                    sink.note(outcome.manifest_entry(identifier));
                }
                Err(e) => {
                    if e.is_session_lost() {
                        self.guard.invalidate();
                    }
                    sink.note(ManifestEntry::failed(identifier, &e));
                }
            }
        }
        self.report();
    }

    fn record_partial(&mut self, path: &TraversalPath, sink: &mut ResultSink) {
        info!(%path, "no children listed, recording partial row");
        if sink.add(ClassificationRecord::from_path(path, "")) {
            self.stats.partial_records += 1;
            sink.note(
                ManifestEntry::new(path.to_string(), ManifestOutcome::Partial)
                    .with_reason(format!("no {} entries listed", path.level().map_or("", |l| l.label()))),
            );
        }
        self.report();
    }

    /// Refresh the elapsed time and notify the progress callback. Stats stay
    /// current even when the run future is dropped mid-walk.
    fn report(&mut self) {
        if let Some(started) = self.started {
            self.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        }
        if let Some(progress) = &self.progress {
            progress(&self.stats);
        }
    }
}
