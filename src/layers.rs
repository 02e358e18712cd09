use crate::types::Category;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// What the map shows: donut cluster markers, or one flat per-category point layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ViewMode {
    #[default]
    Clusters,
    Category(Category),
}

impl FromStr for ViewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("clusters") {
            return Ok(ViewMode::Clusters);
        }
        s.parse().map(ViewMode::Category)
    }
}

impl TryFrom<String> for ViewMode {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::Clusters => f.write_str("clusters"),
            ViewMode::Category(c) => write!(f, "{}", c),
        }
    }
}

/// Visibility of the cluster layer and the four flat point layers.
///
/// Exactly one of them is visible at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerVisibility {
    mode: ViewMode,
}

impl LayerVisibility {
    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Switch to `mode`. Returns true when the visible layer changed.
    pub fn toggle(&mut self, mode: ViewMode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        changed
    }

    pub fn clusters_visible(&self) -> bool {
        self.mode == ViewMode::Clusters
    }

    pub fn category_visible(&self, category: Category) -> bool {
        self.mode == ViewMode::Category(category)
    }
}
