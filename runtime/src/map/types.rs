//! Core data model: levels, nodes, paths and output records.

use crate::renderer::ElementRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between path segments in visit keys and manifest identifiers.
pub const PATH_SEPARATOR: &str = " → ";

/// Depth in the fixed three-level hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Major,
    Middle,
    Minor,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Major, Level::Middle, Level::Minor];

    pub fn depth(self) -> usize {
        self as usize
    }

    pub fn from_depth(depth: usize) -> Option<Level> {
        Level::ALL.get(depth).copied()
    }

    pub fn next(self) -> Option<Level> {
        Level::from_depth(self.depth() + 1)
    }

    pub fn is_leaf(self) -> bool {
        self == Level::Minor
    }

    /// Display label as shown in the application.
    pub fn label(self) -> &'static str {
        match self {
            Level::Major => "대분류",
            Level::Middle => "중분류",
            Level::Minor => "소분류",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Major => "major",
            Level::Middle => "middle",
            Level::Minor => "minor",
        };
        f.write_str(name)
    }
}

/// One entry discovered at a given depth.
///
/// `stable_ref` belongs to the snapshot the node was extracted from and must
/// not be used after any later click or navigation.
#[derive(Debug, Clone)]
pub struct ClassificationNode {
    pub raw_text: String,
    pub code: String,
    pub name: String,
    pub slot: usize,
    pub stable_ref: ElementRef,
}

impl ClassificationNode {
    pub fn new(raw_text: String, slot: usize, stable_ref: ElementRef) -> Self {
        let parsed = crate::extraction::parse::parse_node_text(&raw_text);
        Self {
            raw_text,
            code: parsed.code,
            name: parsed.name,
            slot,
            stable_ref,
        }
    }

    /// Whether `label` names this node: its full text, its name or its code.
    pub fn answers_to(&self, label: &str) -> bool {
        let label = crate::extraction::parse::normalize_text(label);
        !label.is_empty()
            && (self.raw_text == label || self.name == label || (!self.code.is_empty() && self.code == label))
    }
}

/// Current position in the hierarchy: 0 to 3 selected nodes, outermost first.
#[derive(Debug, Clone, Default)]
pub struct TraversalPath {
    nodes: Vec<ClassificationNode>,
}

impl TraversalPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// The path extended by `node`, or `None` when this is already a leaf path.
    pub fn child(&self, node: ClassificationNode) -> Option<Self> {
        if self.is_leaf() {
            return None;
        }
        let mut nodes = self.nodes.clone();
        nodes.push(node);
        Some(Self { nodes })
    }

    pub fn nodes(&self) -> &[ClassificationNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.nodes.len() == Level::ALL.len()
    }

    /// Level of the children listed below this path.
    pub fn level(&self) -> Option<Level> {
        Level::from_depth(self.nodes.len())
    }

    pub fn visit_key(&self) -> VisitKey {
        VisitKey::from_texts(self.nodes.iter().map(|n| n.raw_text.as_str()))
    }

    /// Key of `self + node` without building the extended path.
    pub fn child_key(&self, node: &ClassificationNode) -> VisitKey {
        VisitKey::from_texts(
            self.nodes
                .iter()
                .map(|n| n.raw_text.as_str())
                .chain(std::iter::once(node.raw_text.as_str())),
        )
    }
}

impl fmt::Display for TraversalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return f.write_str("(root)");
        }
        self.visit_key().fmt(f)
    }
}

/// Dedup signature of a path: every level's raw text, outermost first.
///
/// Segments are kept apart, so a display text that happens to contain the
/// separator cannot alias a deeper path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisitKey(Vec<String>);

impl VisitKey {
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self(texts.into_iter().map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for VisitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(PATH_SEPARATOR))
    }
}

/// One output row. Partial rows leave the deeper levels empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRecord {
    pub major_code: String,
    pub major_name: String,
    pub middle_code: String,
    pub middle_name: String,
    pub minor_code: String,
    pub minor_name: String,
    pub side_channel_value: String,
    #[serde(skip)]
    key: VisitKey,
    #[serde(skip)]
    depth: usize,
}

impl ClassificationRecord {
    /// Build a row from a (possibly partial) path.
    ///
    /// An empty parsed minor code falls back to the side-channel value,
    /// which the application fills with the selected leaf's code.
    pub fn from_path(path: &TraversalPath, side_channel_value: impl Into<String>) -> Self {
        let side_channel_value = side_channel_value.into();
        let part = |depth: usize| {
            path.nodes()
                .get(depth)
                .map(|n| (n.code.clone(), n.name.clone()))
                .unwrap_or_default()
        };
        let (major_code, major_name) = part(0);
        let (middle_code, middle_name) = part(1);
        let (mut minor_code, minor_name) = part(2);
        if minor_code.is_empty() && path.is_leaf() {
            minor_code = side_channel_value.clone();
        }
        Self {
            major_code,
            major_name,
            middle_code,
            middle_name,
            minor_code,
            minor_name,
            side_channel_value,
            key: path.visit_key(),
            depth: path.len(),
        }
    }

    pub fn key(&self) -> &VisitKey {
        &self.key
    }

    /// Number of levels this row covers (3 for a full leaf row).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_partial(&self) -> bool {
        self.depth() < Level::ALL.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Locator;

    pub(crate) fn node(text: &str) -> ClassificationNode {
        ClassificationNode::new(
            text.to_string(),
            0,
            ElementRef::new(0, Locator::Id(format!("row-{text}")), 0),
        )
    }

    #[test]
    fn test_level_navigation() {
        assert_eq!(Level::Major.next(), Some(Level::Middle));
        assert_eq!(Level::Minor.next(), None);
        assert!(Level::Minor.is_leaf());
        assert_eq!(Level::from_depth(3), None);
    }

    #[test]
    fn test_path_is_bounded() {
        let path = TraversalPath::root()
            .child(node("A"))
            .and_then(|p| p.child(node("B")))
            .and_then(|p| p.child(node("C")))
            .unwrap();
        assert!(path.is_leaf());
        assert_eq!(path.level(), None);
        assert!(path.child(node("D")).is_none());
    }

    #[test]
    fn test_visit_key_scoped_to_full_path() {
        let under_a = TraversalPath::root().child(node("A")).unwrap();
        let under_b = TraversalPath::root().child(node("B")).unwrap();
        let shared = node("공통");
        assert_ne!(under_a.child_key(&shared), under_b.child_key(&shared));
        assert_eq!(
            under_a.child_key(&shared),
            under_a.child(shared.clone()).unwrap().visit_key()
        );
        assert_eq!(under_a.child_key(&shared).to_string(), "A → 공통");
    }

    #[test]
    fn test_separator_in_text_does_not_alias_deeper_path() {
        let flat = TraversalPath::root().child(node("가(A) → 나(B)")).unwrap();
        let nested = TraversalPath::root()
            .child(node("가(A)"))
            .and_then(|p| p.child(node("나(B)")))
            .unwrap();
        assert_eq!(flat.to_string(), nested.to_string());
        assert_ne!(flat.visit_key(), nested.visit_key());

        let flat_row = ClassificationRecord::from_path(&flat, "");
        let nested_row = ClassificationRecord::from_path(&nested, "");
        assert_eq!(flat_row.depth(), 1);
        assert_eq!(nested_row.depth(), 2);
        assert_ne!(flat_row.key(), nested_row.key());
    }

    #[test]
    fn test_node_answers_to_text_name_or_code() {
        let n = node("진찰료(AA100)");
        assert!(n.answers_to("진찰료(AA100)"));
        assert!(n.answers_to(" 진찰료 "));
        assert!(n.answers_to("AA100"));
        assert!(!n.answers_to("진찰"));
        assert!(!n.answers_to(""));
        assert!(node("01 기본진료료").answers_to("기본진료료"));
    }

    #[test]
    fn test_record_from_partial_path() {
        let path = TraversalPath::root()
            .child(node("요양급여비용(A)"))
            .and_then(|p| p.child(node("01 기본진료료")))
            .unwrap();
        let record = ClassificationRecord::from_path(&path, "");
        assert_eq!(record.major_code, "A");
        assert_eq!(record.major_name, "요양급여비용");
        assert_eq!(record.middle_code, "01");
        assert_eq!(record.minor_code, "");
        assert!(record.is_partial());
        assert_eq!(record.depth(), 2);
    }

    #[test]
    fn test_leaf_minor_code_falls_back_to_side_channel() {
        let path = TraversalPath::root()
            .child(node("A"))
            .and_then(|p| p.child(node("B")))
            .and_then(|p| p.child(node("진찰료")))
            .unwrap();
        let record = ClassificationRecord::from_path(&path, "AA100");
        assert_eq!(record.minor_code, "AA100");
        assert_eq!(record.minor_name, "진찰료");
        assert!(!record.is_partial());
    }

    #[test]
    fn test_record_serializes_csv_columns() {
        let path = TraversalPath::root().child(node("A")).unwrap();
        let json = serde_json::to_value(ClassificationRecord::from_path(&path, "")).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
        assert!(json.get("sideChannelValue").is_some());
        assert!(json.get("key").is_none());
    }
}
