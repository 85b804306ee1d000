//! Locator strategies and element references.
//!
//! Locators are written in configuration as `id=…`, `css=…` or `text=…`.
//! A bare `#foo` is shorthand for `id=foo`; anything else without a prefix
//! is treated as a CSS selector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One way of finding elements in the live view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    /// Exact element id.
    Id(String),
    /// CSS selector, all matches in document order.
    Css(String),
    /// Elements whose trimmed text equals the value (innermost matches only).
    Text(String),
}

impl FromStr for Locator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty locator".to_string());
        }
        let locator = if let Some(rest) = s.strip_prefix("id=") {
            Locator::Id(rest.to_string())
        } else if let Some(rest) = s.strip_prefix("css=") {
            Locator::Css(rest.to_string())
        } else if let Some(rest) = s.strip_prefix("text=") {
            Locator::Text(rest.trim_matches('"').to_string())
        } else if let Some(rest) = s.strip_prefix('#') {
            if rest.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
                Locator::Id(rest.to_string())
            } else {
                Locator::Css(s.to_string())
            }
        } else {
            Locator::Css(s.to_string())
        };
        Ok(locator)
    }
}

impl TryFrom<String> for Locator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "id={id}"),
            Locator::Css(css) => write!(f, "css={css}"),
            Locator::Text(text) => write!(f, "text={text}"),
        }
    }
}

/// Parse a list of locator strings, used for built-in defaults.
pub fn locators(items: &[&str]) -> Vec<Locator> {
    items.iter().filter_map(|s| s.parse().ok()).collect()
}

/// A locator pattern with an `{index}` placeholder for numbered grid slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotTemplate(pub String);

impl SlotTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Locator for the slot at `index`.
    pub fn at(&self, index: usize) -> Option<Locator> {
        self.0.replace("{index}", &index.to_string()).parse().ok()
    }
}

/// Handle to one located element, valid only within the snapshot epoch it
/// was located in. Every click, fill or navigation starts a new epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub(crate) epoch: u64,
    pub(crate) locator: Locator,
    pub(crate) nth: usize,
}

impl ElementRef {
    pub fn new(epoch: u64, locator: Locator, nth: usize) -> Self {
        Self {
            epoch,
            locator,
            nth,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.locator, self.nth)
    }
}

/// Observable state of an element at probe time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub visible: bool,
    pub enabled: bool,
    pub text: String,
}

/// Escalating click strategies, attempted in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickTier {
    /// Real pointer click after visibility, enabled and obstruction checks.
    Standard,
    /// Pointer click at the element centre, ignoring obstruction.
    Forced,
    /// The element's own click behaviour invoked from page script.
    Programmatic,
}

impl ClickTier {
    pub const ALL: [ClickTier; 3] = [ClickTier::Standard, ClickTier::Forced, ClickTier::Programmatic];
}
