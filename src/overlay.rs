use crate::projection::lon_ranges;
use anyhow::{Context, Result, anyhow};
use geo::{BoundingRect, Contains, Point, Polygon};
use geojson::{GeoJson, Value};
use rstar::{RTree, RTreeObject, AABB};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// An environmental justice area polygon, indexed by its bounding box.
pub struct EjArea(pub Polygon<f64>);

impl RTreeObject for EjArea {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        match self.0.bounding_rect() {
            Some(bbox) => AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]),
            None => AABB::from_point([f64::NAN, f64::NAN]),
        }
    }
}

/// Environmental justice areas drawn beneath the buildings.
pub struct EjOverlay {
    tree: RTree<EjArea>,
}

impl EjOverlay {
    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Self {
        let areas = polygons.into_iter()
            .filter(|p| p.bounding_rect().is_some())
            .map(EjArea)
            .collect();
        EjOverlay { tree: RTree::bulk_load(areas) }
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading EJ areas from {:?}...", path);
        let file = File::open(path).with_context(|| format!("Failed to open EJ areas: {:?}", path))?;
        let reader = BufReader::new(file);
        let geojson = GeoJson::from_reader(reader).context("Failed to parse EJ areas GeoJSON")?;

        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(anyhow!("EJ areas must be a FeatureCollection")),
        };

        let mut polygons = Vec::new();

        for feature in collection.features {
            let Some(geom) = feature.geometry else {
                continue;
            };
            if !matches!(geom.value, Value::Polygon(_) | Value::MultiPolygon(_)) {
                continue;
            }
            let geo_geom: geo::Geometry<f64> = geom.value.try_into()
                .map_err(|e| anyhow!("Failed to convert geometry: {:?}", e))?;

            match geo_geom {
                geo::Geometry::Polygon(p) => polygons.push(p),
                geo::Geometry::MultiPolygon(mp) => polygons.extend(mp),
                _ => {}
            }
        }

        info!("Indexed {} EJ area polygons", polygons.len());
        Ok(Self::from_polygons(polygons))
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a lon/lat position lies inside any area.
    pub fn contains(&self, point: Point<f64>) -> bool {
        let envelope = AABB::from_point([point.x(), point.y()]);
        self.tree.locate_in_envelope_intersecting(&envelope)
            .any(|area| area.0.contains(&point))
    }

    /// Areas whose bounding box intersects the lon/lat box `[west, south, east, north]`.
    ///
    /// Boxes crossing the antimeridian are queried as two ranges.
    pub fn in_bounds(&self, bbox: [f64; 4]) -> Vec<&Polygon<f64>> {
        let mut found: Vec<&Polygon<f64>> = Vec::new();
        for (west, east) in lon_ranges(bbox) {
            let envelope = AABB::from_corners([west, bbox[1]], [east, bbox[3]]);
            for area in self.tree.locate_in_envelope_intersecting(&envelope) {
                if !found.iter().any(|p| std::ptr::eq(*p, &area.0)) {
                    found.push(&area.0);
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x: f64, y: f64) -> Polygon<f64> {
        polygon![(x: x, y: y), (x: x + 1.0, y: y), (x: x + 1.0, y: y + 1.0), (x: x, y: y + 1.0), (x: x, y: y)]
    }

    #[test]
    fn test_contains() {
        let overlay = EjOverlay::from_polygons(vec![square(0.0, 0.0), square(5.0, 5.0)]);
        assert_eq!(overlay.len(), 2);
        assert!(overlay.contains(Point::new(0.5, 0.5)));
        assert!(overlay.contains(Point::new(5.5, 5.2)));
        assert!(!overlay.contains(Point::new(3.0, 3.0)));
    }

    #[test]
    fn test_in_bounds() {
        let overlay = EjOverlay::from_polygons(vec![square(0.0, 0.0), square(5.0, 5.0)]);
        assert_eq!(overlay.in_bounds([-1.0, -1.0, 2.0, 2.0]).len(), 1);
        assert_eq!(overlay.in_bounds([-10.0, -10.0, 10.0, 10.0]).len(), 2);
    }

    #[test]
    fn test_in_bounds_across_antimeridian() {
        let overlay = EjOverlay::from_polygons(vec![square(178.5, 0.0), square(-179.5, 0.0), square(0.0, 0.0)]);
        assert_eq!(overlay.in_bounds([179.0, -1.0, 181.0, 2.0]).len(), 2);
        assert_eq!(overlay.in_bounds([179.0, -1.0, -179.0, 2.0]).len(), 2);
        assert_eq!(overlay.in_bounds([-200.0, -1.0, 200.0, 2.0]).len(), 3);
    }

    #[test]
    fn test_load_skips_non_polygons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ej.geojson");
        std::fs::write(&path, r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":{"type":"MultiPolygon","coordinates":[[[[0,0],[1,0],[1,1],[0,1],[0,0]]],[[[2,2],[3,2],[3,3],[2,3],[2,2]]]]}},
            {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[9,9]}}
        ]}"#).unwrap();

        let overlay = EjOverlay::load(&path).unwrap();
        assert_eq!(overlay.len(), 2);
        assert!(overlay.contains(Point::new(2.5, 2.5)));
    }
}
