use crate::chart::Palette;
use crate::classify::classify;
use crate::clustering::ClusterIndex;
use crate::config::{AppConfig, StyleConfig, ViewConfig};
use crate::layers::{LayerVisibility, ViewMode};
use crate::markers::{ChartMarker, ClusterSource, MarkerSurface, MarkerSynchronizer};
use crate::overlay::EjOverlay;
use crate::projection::{bbox_contains, lat_lon_to_tile_pixel, lon_lat_to_world, viewport_bounds, world_size};
use crate::types::{Building, Category, ClusterId, SourceFeature};
use anyhow::{Context, Result, anyhow};
use geo::Polygon;
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const TILE_SIZE: u32 = 256;
/// Tile size the viewport zoom is measured against.
const VIEW_TILE_SIZE: f64 = 512.0;
const EJ_FILL: &str = "#ffffff";
const EJ_OPACITY: f64 = 0.15;

/// Render the four flat per-category point layers as PNG tiles:
/// `tile_dir/{category}/{z}/{x}/{y}.png`.
pub fn generate_tiles(config: &AppConfig, buildings: &[Building]) -> Result<()> {
    info!("Generating tiles from min_zoom {} to max_zoom {}...", config.output.min_zoom, config.output.max_zoom);

    let mut by_category: HashMap<Category, Vec<&Building>> = HashMap::new();
    for building in buildings {
        by_category.entry(classify(building.percent_diff)).or_default().push(building);
    }

    let mut failed_levels = 0;

    for category in Category::ALL {
        let layer = by_category.remove(&category).unwrap_or_default();
        info!("Rendering {} layer ({} buildings)", category, layer.len());

        let color = hex_to_rgba(config.style.color(category));
        let radius = config.style.point_radius;

        let failures: usize = (config.output.min_zoom..=config.output.max_zoom).into_par_iter()
            .map(|z| match render_zoom_level(config, category, z, &layer, color, radius) {
                Ok(()) => 0,
                Err(e) => {
                    error!("Failed to render {} z{}: {:#}", category, z, e);
                    1
                }
            })
            .sum();

        if failures > 0 {
            warn!("{} zoom levels of the {} layer failed", failures, category);
        }
        failed_levels += failures;
    }

    if failed_levels > 0 {
        return Err(anyhow!("{} zoom levels failed to render", failed_levels));
    }

    Ok(())
}

fn render_zoom_level(
    config: &AppConfig,
    category: Category,
    zoom: u8,
    buildings: &[&Building],
    color: Rgba<u8>,
    radius: f64,
) -> Result<()> {
    let mut local_tiles: HashMap<(u32, u32), RgbaImage> = HashMap::new();
    let r = radius.ceil() as i64;

    for building in buildings {
        let (tx, ty, px, py) = lat_lon_to_tile_pixel(building.position.y(), building.position.x(), zoom, TILE_SIZE);

        let tile_img = local_tiles.entry((tx, ty))
            .or_insert_with(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));

        // Circles are clipped at the tile edge
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f64) > radius * radius {
                    continue;
                }
                let x = px as i64 + dx;
                let y = py as i64 + dy;
                if (0..TILE_SIZE as i64).contains(&x) && (0..TILE_SIZE as i64).contains(&y) {
                    tile_img.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    let z_dir = config.output.tile_dir.join(category.key()).join(zoom.to_string());
    fs::create_dir_all(&z_dir).context("Failed to create zoom directory")?;

    local_tiles.par_iter().for_each(|((x, y), img)| {
        let x_dir = z_dir.join(x.to_string());
        if let Err(e) = fs::create_dir_all(&x_dir) {
            warn!("Failed to create tile directory {:?}: {}", x_dir, e);
            return;
        }
        let path = x_dir.join(format!("{}.png", y));

        if let Err(e) = img.save(&path) {
            warn!("Failed to save tile {:?}: {:?}", path, e);
        }
    });

    Ok(())
}

fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |i: usize| hex.get(i..i + 2)
        .and_then(|h| u8::from_str_radix(h, 16).ok())
        .unwrap_or(0);
    Rgba([channel(0), channel(2), channel(4), 255])
}

/// The cluster source seen through one viewport.
pub struct ViewportSource<'a> {
    pub index: &'a ClusterIndex,
    pub bounds: [f64; 4],
    pub zoom: f64,
}

impl ClusterSource for ViewportSource<'_> {
    fn is_loaded(&self) -> bool {
        self.index.is_loaded()
    }

    fn visible_features(&self) -> Vec<SourceFeature> {
        self.index.get_clusters(self.bounds, self.zoom)
    }
}

/// Markers currently shown on an SVG frame.
#[derive(Default)]
pub struct SvgSurface {
    markers: BTreeMap<ClusterId, Arc<ChartMarker>>,
}

impl SvgSurface {
    pub fn markers(&self) -> impl Iterator<Item = &Arc<ChartMarker>> {
        self.markers.values()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

impl MarkerSurface for SvgSurface {
    fn attach(&mut self, marker: &Arc<ChartMarker>) {
        self.markers.insert(marker.cluster, Arc::clone(marker));
    }

    fn detach(&mut self, marker: &Arc<ChartMarker>) {
        self.markers.remove(&marker.cluster);
    }
}

/// Pixel position of a lon/lat point inside a viewport.
struct Viewport {
    center_x: f64,
    origin: [f64; 2],
    scale: f64,
    bounds: [f64; 4],
}

impl Viewport {
    fn new(view: &ViewConfig) -> Self {
        let scale = world_size(view.zoom, VIEW_TILE_SIZE);
        let [cx, cy] = lon_lat_to_world(view.center[0], view.center[1]);
        Viewport {
            center_x: cx,
            origin: [cx * scale - view.width as f64 / 2.0, cy * scale - view.height as f64 / 2.0],
            scale,
            bounds: viewport_bounds(view.center, view.zoom, view.width, view.height, VIEW_TILE_SIZE),
        }
    }

    /// Positions across the antimeridian are drawn on the copy of the world nearest the center.
    fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let [mut x, y] = lon_lat_to_world(lon, lat);
        if x - self.center_x > 0.5 {
            x -= 1.0;
        } else if self.center_x - x > 0.5 {
            x += 1.0;
        }
        (x * self.scale - self.origin[0], y * self.scale - self.origin[1])
    }
}

/// Renders configured views to standalone SVG frames, driving a marker synchronizer
/// the way a map widget's redraw loop would.
pub struct SnapshotRenderer<'a> {
    index: &'a ClusterIndex,
    buildings: &'a [Building],
    overlay: Option<&'a EjOverlay>,
    style: StyleConfig,
    markers: MarkerSynchronizer,
    surface: SvgSurface,
    layers: LayerVisibility,
}

impl<'a> SnapshotRenderer<'a> {
    pub fn new(config: &AppConfig, index: &'a ClusterIndex, buildings: &'a [Building], overlay: Option<&'a EjOverlay>) -> Self {
        SnapshotRenderer {
            index,
            buildings,
            overlay,
            style: config.style.clone(),
            markers: MarkerSynchronizer::new(Palette::from(&config.style))
                .with_cache_limit(config.clustering.max_cached_icons),
            surface: SvgSurface::default(),
            layers: LayerVisibility::default(),
        }
    }

    pub fn markers(&self) -> &MarkerSynchronizer {
        &self.markers
    }

    pub fn surface(&self) -> &SvgSurface {
        &self.surface
    }

    /// One redraw tick for `view`, returning the frame as SVG.
    pub fn render_view(&mut self, view: &ViewConfig) -> String {
        if self.layers.toggle(view.mode) && !self.layers.clusters_visible() {
            self.markers.detach_all(&mut self.surface);
        }

        let viewport = Viewport::new(view);
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = view.width,
            h = view.height
        );
        svg.push('\n');
        let _ = writeln!(svg, r##"<rect width="100%" height="100%" fill="#1f1f1f" />"##);

        if let Some(overlay) = self.overlay {
            for polygon in overlay.in_bounds(viewport.bounds) {
                let _ = writeln!(svg, "{}", polygon_path(polygon, &viewport));
            }
        }

        match self.layers.mode() {
            ViewMode::Clusters => {
                let source = ViewportSource { index: self.index, bounds: viewport.bounds, zoom: view.zoom };
                let visible = source.visible_features();
                self.markers.reconcile(source.is_loaded(), &visible, &mut self.surface);

                for feature in &visible {
                    if let SourceFeature::Point { position, category, .. } = feature {
                        let (x, y) = viewport.project(position.x(), position.y());
                        let _ = writeln!(
                            svg,
                            r#"<circle cx="{x:.1}" cy="{y:.1}" r="{}" fill="{}" opacity="{}" />"#,
                            self.style.single_radius,
                            self.style.color(*category),
                            self.style.single_opacity
                        );
                    }
                }

                for marker in self.surface.markers() {
                    let (x, y) = viewport.project(marker.position.x(), marker.position.y());
                    let half = marker.icon.pixel_size() as f64 / 2.0;
                    let _ = writeln!(
                        svg,
                        "<g transform=\"translate({:.1}, {:.1})\">\n{}\n</g>",
                        x - half,
                        y - half,
                        marker.icon.svg
                    );
                }
            }
            ViewMode::Category(category) => {
                let color = self.style.color(category);
                for building in self.buildings {
                    let (lon, lat) = (building.position.x(), building.position.y());
                    if !bbox_contains(viewport.bounds, lon, lat) {
                        continue;
                    }
                    if classify(building.percent_diff) != category {
                        continue;
                    }
                    let (x, y) = viewport.project(lon, lat);
                    let _ = writeln!(
                        svg,
                        r#"<circle cx="{x:.1}" cy="{y:.1}" r="{}" fill="{color}" />"#,
                        self.style.point_radius
                    );
                }
            }
        }

        svg.push_str("</svg>\n");
        svg
    }
}

fn polygon_path(polygon: &Polygon<f64>, viewport: &Viewport) -> String {
    let mut d = String::new();
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
        for (i, coord) in ring.coords().enumerate() {
            let (x, y) = viewport.project(coord.x, coord.y);
            let _ = write!(d, "{}{:.1} {:.1} ", if i == 0 { "M " } else { "L " }, x, y);
        }
        d.push_str("Z ");
    }
    format!(
        r#"<path d="{}" fill="{EJ_FILL}" fill-opacity="{EJ_OPACITY}" fill-rule="evenodd" />"#,
        d.trim_end()
    )
}

/// Write one SVG per configured view into the snapshot directory.
pub fn render_snapshots(
    config: &AppConfig,
    index: &ClusterIndex,
    buildings: &[Building],
    overlay: Option<&EjOverlay>,
) -> Result<Vec<PathBuf>> {
    if config.snapshot.views.is_empty() {
        warn!("No [[snapshot.views]] configured, nothing to render");
        return Ok(Vec::new());
    }

    fs::create_dir_all(&config.output.snapshot_dir)
        .with_context(|| format!("Failed to create snapshot directory: {:?}", config.output.snapshot_dir))?;

    let mut renderer = SnapshotRenderer::new(config, index, buildings, overlay);
    let mut written = Vec::with_capacity(config.snapshot.views.len());

    for view in &config.snapshot.views {
        let svg = renderer.render_view(view);
        let path = config.output.snapshot_dir.join(format!("{}.svg", view.name));
        fs::write(&path, svg).with_context(|| format!("Failed to write snapshot: {:?}", path))?;
        info!(
            "Rendered view '{}' ({}, zoom {}): {} markers on screen, {} cached",
            view.name,
            view.mode,
            view.zoom,
            renderer.surface().len(),
            renderer.markers().cached()
        );
        written.push(path);
    }

    Ok(written)
}
