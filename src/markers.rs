//! Donut marker lifecycle.
//!
//! Every redraw tick the synchronizer compares the clusters currently on screen with the
//! markers it attached on the previous tick. Markers are synthesized once per cluster
//! identity and kept in a cache, so a cluster that scrolls back into view is re-attached
//! without regenerating its chart.

use crate::chart::{synthesize, ChartIcon, Palette};
use crate::types::{ClusterId, SourceFeature};
use geo::Point;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace};

/// A donut chart anchored at a cluster's position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartMarker {
    pub cluster: ClusterId,
    /// lon/lat
    pub position: Point<f64>,
    pub icon: ChartIcon,
}

/// Where markers are shown. Implemented by the map host.
pub trait MarkerSurface {
    fn attach(&mut self, marker: &Arc<ChartMarker>);
    fn detach(&mut self, marker: &Arc<ChartMarker>);
}

/// The clustered data source as seen from a redraw tick.
pub trait ClusterSource {
    /// False while the source is still loading its data.
    fn is_loaded(&self) -> bool;
    /// Features of the source in the current viewport.
    fn visible_features(&self) -> Vec<SourceFeature>;
}

/// What a single [`MarkerSynchronizer::reconcile`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attached: usize,
    pub detached: usize,
    pub synthesized: usize,
    pub evicted: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == ReconcileReport::default()
    }
}

struct CachedMarker {
    marker: Arc<ChartMarker>,
    last_seen: u64,
}

pub struct MarkerSynchronizer {
    palette: Palette,
    cache: HashMap<ClusterId, CachedMarker>,
    on_screen: HashMap<ClusterId, Arc<ChartMarker>>,
    max_cached: Option<NonZeroUsize>,
    tick: u64,
}

impl MarkerSynchronizer {
    /// A synchronizer whose icon cache grows for the whole session.
    pub fn new(palette: Palette) -> Self {
        MarkerSynchronizer {
            palette,
            cache: HashMap::new(),
            on_screen: HashMap::new(),
            max_cached: None,
            tick: 0,
        }
    }

    /// Bound the icon cache. Detached icons that were seen least recently are evicted
    /// first; attached icons are never evicted, so the cache may exceed the bound while
    /// more clusters than that are on screen.
    pub fn with_cache_limit(mut self, limit: Option<NonZeroUsize>) -> Self {
        self.max_cached = limit;
        self
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, id: ClusterId) -> bool {
        self.cache.contains_key(&id)
    }

    pub fn attached(&self) -> impl Iterator<Item = &Arc<ChartMarker>> {
        self.on_screen.values()
    }

    pub fn is_attached(&self, id: ClusterId) -> bool {
        self.on_screen.contains_key(&id)
    }

    /// Redraw-tick entry point.
    pub fn on_render<S, M>(&mut self, source: &S, surface: &mut M) -> ReconcileReport
    where
        S: ClusterSource + ?Sized,
        M: MarkerSurface + ?Sized,
    {
        if !source.is_loaded() {
            return ReconcileReport::default();
        }
        self.reconcile(true, &source.visible_features(), surface)
    }

    /// Bring the attached markers in line with the visible clusters.
    ///
    /// Does nothing while `loaded` is false. Unclustered points in `visible` are ignored.
    pub fn reconcile<M>(&mut self, loaded: bool, visible: &[SourceFeature], surface: &mut M) -> ReconcileReport
    where
        M: MarkerSurface + ?Sized,
    {
        let mut report = ReconcileReport::default();
        if !loaded {
            trace!("cluster source still loading, skipping marker update");
            return report;
        }

        self.tick += 1;
        let mut next = HashMap::with_capacity(self.on_screen.len());

        for feature in visible {
            let SourceFeature::Cluster { id, position, counts } = feature else {
                continue;
            };

            let entry = self.cache.entry(*id).or_insert_with(|| {
                report.synthesized += 1;
                CachedMarker {
                    marker: Arc::new(ChartMarker {
                        cluster: *id,
                        position: *position,
                        icon: synthesize(counts, &self.palette),
                    }),
                    last_seen: 0,
                }
            });
            entry.last_seen = self.tick;

            let marker = Arc::clone(&entry.marker);
            if !self.on_screen.contains_key(id) && !next.contains_key(id) {
                surface.attach(&marker);
                report.attached += 1;
            }
            next.insert(*id, marker);
        }

        for (id, marker) in &self.on_screen {
            if !next.contains_key(id) {
                surface.detach(marker);
                report.detached += 1;
            }
        }

        self.on_screen = next;
        report.evicted = self.evict();

        if !report.is_noop() {
            debug!(
                "markers: +{} -{} (synthesized {}, evicted {}, cached {})",
                report.attached,
                report.detached,
                report.synthesized,
                report.evicted,
                self.cache.len()
            );
        }
        report
    }

    /// Detach every marker, keeping the cache. Used when the cluster layer is hidden.
    pub fn detach_all<M>(&mut self, surface: &mut M) -> usize
    where
        M: MarkerSurface + ?Sized,
    {
        let count = self.on_screen.len();
        for marker in self.on_screen.values() {
            surface.detach(marker);
        }
        self.on_screen.clear();
        count
    }

    fn evict(&mut self) -> usize {
        let Some(limit) = self.max_cached else {
            return 0;
        };
        let excess = self.cache.len().saturating_sub(limit.get());
        if excess == 0 {
            return 0;
        }

        let mut stale: Vec<(u64, ClusterId)> = self.cache.iter()
            .filter(|(id, _)| !self.on_screen.contains_key(*id))
            .map(|(id, cached)| (cached.last_seen, *id))
            .collect();
        stale.sort_unstable();

        let mut evicted = 0;
        for (_, id) in stale.into_iter().take(excess) {
            self.cache.remove(&id);
            evicted += 1;
        }
        evicted
    }
}
