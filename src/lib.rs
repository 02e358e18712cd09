//! Building greenhouse-gas emissions on a cluster map.
//!
//! Buildings are classified by how far their emissions deviate from the median of similar
//! buildings, clustered per zoom level, and each on-screen cluster is drawn as a donut
//! chart of its category counts.

pub mod types;
pub mod classify;
pub mod config;
pub mod data;
pub mod projection;
pub mod clustering;
pub mod chart;
pub mod markers;
pub mod layers;
pub mod overlay;
pub mod render;
pub mod server;

pub use chart::{synthesize, ChartIcon, Palette};
pub use classify::classify;
pub use markers::{ChartMarker, ClusterSource, MarkerSurface, MarkerSynchronizer, ReconcileReport};
pub use types::{Building, Category, CategoryCounts, ClusterId, SourceFeature};
