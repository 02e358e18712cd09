use crate::clustering::MAX_CLUSTER_ZOOM;
use crate::layers::ViewMode;
use crate::types::Category;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub clustering: ClusterConfig,
    #[serde(default)]
    pub style: StyleConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// GeoJSON, CSV or point shapefile of buildings
    pub buildings: PathBuf,
    #[serde(default = "default_percent_diff_field")]
    pub percent_diff_field: String,
    pub id_field: Option<String>,
    #[serde(default = "default_lon_column")]
    pub lon_column: String,
    #[serde(default = "default_lat_column")]
    pub lat_column: String,
    /// Environmental justice areas drawn beneath the buildings
    pub ej_areas: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster radius in screen pixels
    pub radius: f64,
    /// Tile extent the radius is measured against
    pub extent: f64,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Bound on cached donut icons; unbounded when absent
    pub max_cached_icons: Option<NonZeroUsize>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            radius: 100.0,
            extent: 512.0,
            min_zoom: 0,
            max_zoom: 14,
            max_cached_icons: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleConfig {
    pub high_color: String,
    pub mid_color: String,
    pub low_color: String,
    pub no_data_color: String,
    /// Unclustered building circles in the cluster layer
    pub single_radius: f64,
    pub single_opacity: f64,
    /// Circles in the flat per-category layers
    pub point_radius: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        StyleConfig {
            high_color: "#d01c8b".to_string(),
            mid_color: "#f1b6da".to_string(),
            low_color: "#4dac26".to_string(),
            no_data_color: "#adadc9".to_string(),
            single_radius: 8.0,
            single_opacity: 0.6,
            point_radius: 2.0,
        }
    }
}

impl StyleConfig {
    pub fn color(&self, category: Category) -> &str {
        match category {
            Category::High => &self.high_color,
            Category::Mid => &self.mid_color,
            Category::Low => &self.low_color,
            Category::NoData => &self.no_data_color,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub tile_dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub views: Vec<ViewConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    pub name: String,
    /// lon/lat
    pub center: [f64; 2],
    pub zoom: f64,
    #[serde(default = "default_view_width")]
    pub width: u32,
    #[serde(default = "default_view_height")]
    pub height: u32,
    #[serde(default)]
    pub mode: ViewMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_percent_diff_field() -> String {
    "percent_diff".to_string()
}

fn default_lon_column() -> String {
    "longitude".to_string()
}

fn default_lat_column() -> String {
    "latitude".to_string()
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("output/snapshots")
}

fn default_view_width() -> u32 {
    1024
}

fn default_view_height() -> u32 {
    768
}

fn default_static_dir() -> PathBuf {
    PathBuf::from(".")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        anyhow::ensure!(
            config.clustering.min_zoom <= config.clustering.max_zoom,
            "clustering.min_zoom ({}) exceeds clustering.max_zoom ({})",
            config.clustering.min_zoom,
            config.clustering.max_zoom
        );
        anyhow::ensure!(
            config.clustering.max_zoom <= MAX_CLUSTER_ZOOM,
            "clustering.max_zoom ({}) exceeds {}",
            config.clustering.max_zoom,
            MAX_CLUSTER_ZOOM
        );
        anyhow::ensure!(config.clustering.radius > 0.0, "clustering.radius must be positive");
        anyhow::ensure!(config.clustering.extent > 0.0, "clustering.extent must be positive");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[input]
buildings = "data/2021_energy_multifamily.geojson"

[output]
tile_dir = "output/tiles"
min_zoom = 10
max_zoom = 14

[server]
port = 3000
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.input.percent_diff_field, "percent_diff");
        assert_eq!(config.clustering.radius, 100.0);
        assert_eq!(config.clustering.max_zoom, 14);
        assert!(config.clustering.max_cached_icons.is_none());
        assert_eq!(config.style.color(Category::High), "#d01c8b");
        assert_eq!(config.style.color(Category::NoData), "#adadc9");
        assert!(config.snapshot.views.is_empty());
        assert_eq!(config.server.static_dir, PathBuf::from("."));
    }

    #[test]
    fn test_views_and_bounds() {
        let content = format!(
            "{}\n[clustering]\nmax_cached_icons = 64\n\n[[snapshot.views]]\nname = \"midtown\"\ncenter = [-73.99, 40.74]\nzoom = 12.5\nmode = \"low\"\n",
            MINIMAL
        );
        let config = AppConfig::from_toml(&content).unwrap();
        assert_eq!(config.clustering.max_cached_icons.map(|n| n.get()), Some(64));
        let view = &config.snapshot.views[0];
        assert_eq!(view.width, 1024);
        assert_eq!(view.mode, ViewMode::Category(Category::Low));
    }

    #[test]
    fn test_rejects_inverted_zoom() {
        let content = format!("{}\n[clustering]\nmin_zoom = 10\nmax_zoom = 4\n", MINIMAL);
        assert!(AppConfig::from_toml(&content).is_err());
    }

    #[test]
    fn test_rejects_max_zoom_beyond_cluster_ids() {
        let content = format!("{}\n[clustering]\nmax_zoom = 32\n", MINIMAL);
        let err = AppConfig::from_toml(&content).unwrap_err();
        assert!(err.to_string().contains("max_zoom"));

        let content = format!("{}\n[clustering]\nmax_zoom = 30\n", MINIMAL);
        assert!(AppConfig::from_toml(&content).is_ok());
    }

    #[test]
    fn test_missing_section() {
        assert!(AppConfig::from_toml("[input]\nbuildings = \"a.geojson\"\n").is_err());
    }
}
