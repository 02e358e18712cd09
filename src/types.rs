use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// Emission category of a building, relative to the median of similar buildings.
///
/// Variant order is the order segments are drawn in a donut chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "high")]
    High,
    #[serde(rename = "mid")]
    Mid,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "noData")]
    NoData,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::High, Category::Mid, Category::Low, Category::NoData];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Short key used in config files, query strings and tile paths.
    pub fn key(self) -> &'static str {
        match self {
            Category::High => "high",
            Category::Mid => "mid",
            Category::Low => "low",
            Category::NoData => "noData",
        }
    }

    /// Name of the per-cluster aggregate property reported by the clustered source.
    pub fn aggregate_property(self) -> &'static str {
        match self {
            Category::High => "highEmitters",
            Category::Mid => "midEmitters",
            Category::Low => "lowEmitters",
            Category::NoData => "noData",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown emission category: {}", s))
    }
}

/// A building record from the emissions dataset.
#[derive(Debug, Clone)]
pub struct Building {
    pub id: String,
    /// lon/lat
    pub position: Point<f64>,
    /// Percent deviation from the median of similar buildings; 0 means no data.
    pub percent_diff: f64,
}

/// Per-category member counts, indexed by [`Category`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts(pub [u32; 4]);

impl CategoryCounts {
    pub fn new(high: u32, mid: u32, low: u32, no_data: u32) -> Self {
        CategoryCounts([high, mid, low, no_data])
    }

    pub fn single(category: Category) -> Self {
        let mut counts = CategoryCounts::default();
        counts.add(category);
        counts
    }

    pub fn add(&mut self, category: Category) {
        self[category] += 1;
    }

    pub fn merge(&mut self, other: &CategoryCounts) {
        for c in Category::ALL {
            self[c] += other[c];
        }
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

impl Index<Category> for CategoryCounts {
    type Output = u32;

    fn index(&self, category: Category) -> &u32 {
        &self.0[category.index()]
    }
}

impl IndexMut<Category> for CategoryCounts {
    fn index_mut(&mut self, category: Category) -> &mut u32 {
        &mut self.0[category.index()]
    }
}

/// Identity of a cluster, stable for as long as its members stay grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A feature reported by the clustered source for the current viewport.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFeature {
    Cluster {
        id: ClusterId,
        position: Point<f64>,
        counts: CategoryCounts,
    },
    Point {
        building: usize,
        position: Point<f64>,
        category: Category,
    },
}

impl SourceFeature {
    pub fn position(&self) -> Point<f64> {
        match self {
            SourceFeature::Cluster { position, .. } | SourceFeature::Point { position, .. } => *position,
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, SourceFeature::Cluster { .. })
    }
}
