//! Web Mercator conversions between lon/lat, normalized world space and pixels.
//!
//! World coordinates are in `[0, 1]` on both axes with the origin at the north-west corner.

use std::f64::consts::PI;

const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub fn lon_to_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

pub fn lat_to_y(lat: f64) -> f64 {
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    y.clamp(0.0, 1.0)
}

pub fn x_to_lon(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

pub fn y_to_lat(y: f64) -> f64 {
    let n = PI - 2.0 * PI * y;
    n.sinh().atan().to_degrees()
}

pub fn lon_lat_to_world(lon: f64, lat: f64) -> [f64; 2] {
    [lon_to_x(lon), lat_to_y(lat)]
}

pub fn world_to_lon_lat(world: [f64; 2]) -> [f64; 2] {
    [x_to_lon(world[0]), y_to_lat(world[1])]
}

/// Size of the world in pixels at `zoom` for square tiles of `tile_size`.
pub fn world_size(zoom: f64, tile_size: f64) -> f64 {
    tile_size * 2.0_f64.powf(zoom)
}

/// Tile address and pixel offset inside that tile.
pub fn lat_lon_to_tile_pixel(lat: f64, lon: f64, zoom: u8, tile_size: u32) -> (u32, u32, u32, u32) {
    let n = 2.0_f64.powi(zoom as i32);
    let max_index = n - 1.0;
    let x_t = (lon_to_x(lon) * n).min(n - f64::EPSILON);
    let y_t = (lat_to_y(lat) * n).min(n - f64::EPSILON);

    let tx = x_t.floor().clamp(0.0, max_index) as u32;
    let ty = y_t.floor().clamp(0.0, max_index) as u32;

    let px = (((x_t - tx as f64) * tile_size as f64) as u32).min(tile_size - 1);
    let py = (((y_t - ty as f64) * tile_size as f64) as u32).min(tile_size - 1);

    (tx, ty, px, py)
}

fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Longitude intervals covered by `[west, south, east, north]`, each with `west <= east`.
///
/// A box crossing the antimeridian is split in two; one 360° or wider covers the world.
pub fn lon_ranges(bbox: [f64; 4]) -> Vec<(f64, f64)> {
    if bbox[2] - bbox[0] >= 360.0 {
        return vec![(-180.0, 180.0)];
    }
    let west = normalize_lon(bbox[0]);
    let mut east = normalize_lon(bbox[2]);
    if east == -180.0 && bbox[2] > bbox[0] {
        east = 180.0;
    }
    if west > east {
        vec![(west, 180.0), (-180.0, east)]
    } else {
        vec![(west, east)]
    }
}

/// Whether a lon/lat position falls inside `[west, south, east, north]`.
pub fn bbox_contains(bbox: [f64; 4], lon: f64, lat: f64) -> bool {
    if lat < bbox[1] || lat > bbox[3] {
        return false;
    }
    let lon = normalize_lon(lon);
    lon_ranges(bbox).iter().any(|(west, east)| lon >= *west && lon <= *east)
}

/// Lon/lat bounds `[west, south, east, north]` of a `width`×`height` viewport.
pub fn viewport_bounds(center: [f64; 2], zoom: f64, width: u32, height: u32, tile_size: f64) -> [f64; 4] {
    let size = world_size(zoom, tile_size);
    let [cx, cy] = lon_lat_to_world(center[0], center[1]);
    let half_w = width as f64 / 2.0 / size;
    let half_h = height as f64 / 2.0 / size;
    let west = x_to_lon(cx - half_w);
    let east = x_to_lon(cx + half_w);
    let north = y_to_lat((cy - half_h).max(0.0));
    let south = y_to_lat((cy + half_h).min(1.0));
    [west, south, east, north]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_trip() {
        let [x, y] = lon_lat_to_world(-73.99330880814004, 40.73762668306899);
        let [lon, lat] = world_to_lon_lat([x, y]);
        assert_relative_eq!(lon, -73.99330880814004, epsilon = 1e-9);
        assert_relative_eq!(lat, 40.73762668306899, epsilon = 1e-9);
    }

    #[test]
    fn test_origin() {
        assert_relative_eq!(lon_to_x(0.0), 0.5);
        assert_relative_eq!(lat_to_y(0.0), 0.5, epsilon = 1e-12);
        assert_eq!(lat_lon_to_tile_pixel(0.0, 0.0, 1, 256), (1, 1, 0, 0));
    }

    #[test]
    fn test_tile_clamped_at_edges() {
        let (tx, ty, px, py) = lat_lon_to_tile_pixel(-90.0, 180.0, 2, 256);
        assert_eq!((tx, ty), (3, 3));
        assert!(px < 256 && py < 256);
    }

    #[test]
    fn test_lon_ranges() {
        assert_eq!(lon_ranges([-74.0, 40.0, -73.0, 41.0]), vec![(-74.0, -73.0)]);
        assert_eq!(lon_ranges([170.0, -10.0, 190.0, 10.0]), vec![(170.0, 180.0), (-180.0, -170.0)]);
        assert_eq!(lon_ranges([170.0, -10.0, -170.0, 10.0]), vec![(170.0, 180.0), (-180.0, -170.0)]);
        assert_eq!(lon_ranges([170.0, -10.0, 180.0, 10.0]), vec![(170.0, 180.0)]);
        assert_eq!(lon_ranges([-200.0, -10.0, 200.0, 10.0]), vec![(-180.0, 180.0)]);
    }

    #[test]
    fn test_bbox_contains_across_antimeridian() {
        let bbox = [179.0, -1.0, 181.0, 1.0];
        assert!(bbox_contains(bbox, 179.5, 0.0));
        assert!(bbox_contains(bbox, -179.5, 0.0));
        assert!(!bbox_contains(bbox, 0.0, 0.0));
        assert!(!bbox_contains(bbox, 179.5, 2.0));
    }

    #[test]
    fn test_viewport_bounds() {
        let [west, south, east, north] = viewport_bounds([0.0, 0.0], 0.0, 512, 512, 512.0);
        assert_relative_eq!(west, -180.0);
        assert_relative_eq!(east, 180.0);
        assert!(north > 85.0 && south < -85.0);
    }
}
