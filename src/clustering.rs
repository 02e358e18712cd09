//! Hierarchical point clustering of buildings per zoom level.
//!
//! Each level is built from the one above it (higher zoom): unvisited nodes within the
//! cluster radius of a seed are merged into one cluster at their weighted centroid, and
//! their category counts are summed.

use crate::classify::classify;
use crate::config::ClusterConfig;
use crate::projection::{lon_lat_to_world, lon_ranges, lon_to_x, lat_to_y, world_to_lon_lat};
use crate::types::{Building, Category, CategoryCounts, ClusterId, SourceFeature};
use geo::Point;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Highest zoom a cluster can form at. Cluster ids keep the zoom in their low 5 bits.
pub const MAX_CLUSTER_ZOOM: u8 = 30;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

#[derive(Debug, Clone)]
struct Node {
    world: [f64; 2],
    counts: CategoryCounts,
    kind: NodeKind,
}

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Building { index: usize, category: Category },
    Cluster { id: ClusterId },
}

struct Level {
    nodes: Vec<Node>,
    tree: RTree<IndexedPoint>,
}

impl Level {
    fn new(nodes: Vec<Node>) -> Self {
        let items = nodes.iter().enumerate()
            .map(|(i, n)| IndexedPoint::new(n.world, i))
            .collect();
        Level { nodes, tree: RTree::bulk_load(items) }
    }
}

pub struct ClusterIndex {
    config: ClusterConfig,
    /// `levels[z - min_zoom]` for `z` in `min_zoom..=max_zoom + 1`; the last level holds raw buildings.
    levels: Vec<Level>,
    /// Cluster id -> (level, node) where the cluster formed
    clusters: HashMap<ClusterId, (usize, usize)>,
    /// Cluster id -> merged nodes of the level below its own
    children: HashMap<ClusterId, Vec<usize>>,
}

/// A cluster as reported by [`ClusterIndex::cluster`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub zoom: u8,
    pub position: Point<f64>,
    pub counts: CategoryCounts,
}

impl ClusterIndex {
    pub fn build(config: &ClusterConfig, buildings: &[Building]) -> Self {
        let mut config = config.clone();
        if config.max_zoom > MAX_CLUSTER_ZOOM {
            warn!("Clamping clustering max_zoom {} to {}", config.max_zoom, MAX_CLUSTER_ZOOM);
            config.max_zoom = MAX_CLUSTER_ZOOM;
            config.min_zoom = config.min_zoom.min(MAX_CLUSTER_ZOOM);
        }

        info!(
            "Clustering {} buildings for zoom {}..={} (radius {}px)",
            buildings.len(),
            config.min_zoom,
            config.max_zoom,
            config.radius
        );

        let mut skipped = 0;
        let leaves: Vec<Node> = buildings.iter().enumerate().filter_map(|(index, b)| {
            if !(b.position.x().is_finite() && b.position.y().is_finite()) {
                skipped += 1;
                return None;
            }
            let category = classify(b.percent_diff);
            Some(Node {
                world: lon_lat_to_world(b.position.x(), b.position.y()),
                counts: CategoryCounts::single(category),
                kind: NodeKind::Building { index, category },
            })
        }).collect();

        if skipped > 0 {
            warn!("Skipped {} buildings with non-finite coordinates", skipped);
        }

        let mut levels = vec![Level::new(leaves)];
        let mut clusters = HashMap::new();
        let mut children = HashMap::new();

        for zoom in (config.min_zoom..=config.max_zoom).rev() {
            let (nodes, merged) = cluster_level(&levels[levels.len() - 1], zoom, &config);
            debug!("zoom {}: {} nodes, {} new clusters", zoom, nodes.len(), merged.len());
            children.extend(merged);
            levels.push(Level::new(nodes));
        }

        // Lowest zoom first
        levels.reverse();

        // A cluster carried unchanged to lower zooms keeps its id; the last insert wins, which
        // is the level it formed at.
        for (level_idx, level) in levels.iter().enumerate() {
            for (node_idx, node) in level.nodes.iter().enumerate() {
                if let NodeKind::Cluster { id } = node.kind {
                    clusters.insert(id, (level_idx, node_idx));
                }
            }
        }

        info!("Built {} clusters", clusters.len());

        ClusterIndex { config, levels, clusters, children }
    }

    /// The source is ready as soon as the index is built.
    pub fn is_loaded(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn level_for_zoom(&self, zoom: f64) -> &Level {
        let max = self.config.max_zoom as f64 + 1.0;
        let z = zoom.floor().clamp(self.config.min_zoom as f64, max);
        &self.levels[(z as usize) - self.config.min_zoom as usize]
    }

    /// Features visible in the lon/lat box `[west, south, east, north]` at `zoom`.
    pub fn get_clusters(&self, bbox: [f64; 4], zoom: f64) -> Vec<SourceFeature> {
        let [_, south, _, north] = bbox;
        let level = self.level_for_zoom(zoom);

        let mut features = Vec::new();
        for (west, east) in lon_ranges(bbox) {
            let envelope = AABB::from_corners(
                [lon_to_x(west), lat_to_y(north)],
                [lon_to_x(east), lat_to_y(south)],
            );
            features.extend(
                level.tree.locate_in_envelope(&envelope)
                    .map(|item| to_feature(&level.nodes[item.data])),
            );
        }
        features
    }

    pub fn cluster(&self, id: ClusterId) -> Option<ClusterSummary> {
        let (level_idx, node_idx) = *self.clusters.get(&id)?;
        let node = &self.levels[level_idx].nodes[node_idx];
        let [lon, lat] = world_to_lon_lat(node.world);
        Some(ClusterSummary {
            id,
            zoom: self.config.min_zoom + level_idx as u8,
            position: Point::new(lon, lat),
            counts: node.counts,
        })
    }

    /// Indices of the buildings a cluster was formed from, or `None` for an unknown id.
    pub fn leaves(&self, id: ClusterId) -> Option<Vec<usize>> {
        let mut leaves = Vec::new();
        let mut pending = vec![id];

        while let Some(id) = pending.pop() {
            let (level_idx, _) = *self.clusters.get(&id)?;
            let below = &self.levels[level_idx + 1];
            for &child in self.children.get(&id)? {
                match below.nodes[child].kind {
                    NodeKind::Building { index, .. } => leaves.push(index),
                    NodeKind::Cluster { id } => pending.push(id),
                }
            }
        }

        Some(leaves)
    }

    /// Nearest building leaf to a lon/lat position.
    pub fn nearest_building(&self, lon: f64, lat: f64) -> Option<usize> {
        let leaves = self.levels.last()?;
        let item = leaves.tree.nearest_neighbor(&lon_lat_to_world(lon, lat))?;
        match leaves.nodes[item.data].kind {
            NodeKind::Building { index, .. } => Some(index),
            NodeKind::Cluster { .. } => None,
        }
    }
}

fn cluster_id(seed: usize, zoom: u8) -> ClusterId {
    debug_assert!(zoom <= MAX_CLUSTER_ZOOM);
    ClusterId(((seed as u64) << 5) + zoom as u64 + 1)
}

fn cluster_level(previous: &Level, zoom: u8, config: &ClusterConfig) -> (Vec<Node>, Vec<(ClusterId, Vec<usize>)>) {
    let r = config.radius / (config.extent * 2.0_f64.powi(zoom as i32));
    let mut visited = vec![false; previous.nodes.len()];
    let mut nodes = Vec::new();
    let mut merged = Vec::new();

    for (i, seed) in previous.nodes.iter().enumerate() {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let mut counts = seed.counts;
        let weight = seed.counts.total() as f64;
        let mut wx = seed.world[0] * weight;
        let mut wy = seed.world[1] * weight;
        let mut members = vec![i];

        for neighbor in previous.tree.locate_within_distance(seed.world, r * r) {
            let j = neighbor.data;
            if visited[j] {
                continue;
            }
            visited[j] = true;
            members.push(j);

            let other = &previous.nodes[j];
            let w = other.counts.total() as f64;
            wx += other.world[0] * w;
            wy += other.world[1] * w;
            counts.merge(&other.counts);
        }

        if members.len() > 1 {
            let total = counts.total() as f64;
            let id = cluster_id(i, zoom);
            nodes.push(Node {
                world: [wx / total, wy / total],
                counts,
                kind: NodeKind::Cluster { id },
            });
            merged.push((id, members));
        } else {
            nodes.push(seed.clone());
        }
    }

    (nodes, merged)
}

fn to_feature(node: &Node) -> SourceFeature {
    let [lon, lat] = world_to_lon_lat(node.world);
    let position = Point::new(lon, lat);
    match node.kind {
        NodeKind::Cluster { id } => SourceFeature::Cluster { id, position, counts: node.counts },
        NodeKind::Building { index, category } => SourceFeature::Point { building: index, position, category },
    }
}
