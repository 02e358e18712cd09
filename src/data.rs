use crate::config::InputConfig;
use crate::types::Building;
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use geo::{Centroid, Point};
use shapefile::Reader;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

pub fn load_buildings(input: &InputConfig) -> Result<Vec<Building>> {
    info!("Loading buildings from {:?}...", input.buildings);

    let extension = input.buildings.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input buildings file has no extension"))?;

    let buildings = match extension.as_str() {
        "json" | "geojson" => load_geojson(input, &input.buildings)?,
        "csv" => load_csv(input, &input.buildings)?,
        "shp" => load_shapefile(input, &input.buildings)?,
        _ => return Err(anyhow!("Unsupported buildings format: {}", extension)),
    };

    info!("Loaded {} buildings", buildings.len());

    Ok(buildings)
}

/// Missing or non-numeric values count as no data.
fn percent_diff_from_json(value: Option<&serde_json::Value>) -> f64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn id_from_json(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn load_geojson(input: &InputConfig, path: &Path) -> Result<Vec<Building>> {
    use std::io::BufReader;
    use geojson::GeoJson;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut buildings = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.into_iter().enumerate() {
        let props = feature.properties.as_ref();
        let percent_diff = percent_diff_from_json(props.and_then(|p| p.get(&input.percent_diff_field)));
        let id = input.id_field.as_ref()
            .and_then(|field| id_from_json(props.and_then(|p| p.get(field))))
            .or_else(|| feature.id.as_ref().map(|id| match id {
                geojson::feature::Id::String(s) => s.clone(),
                geojson::feature::Id::Number(n) => n.to_string(),
            }))
            .unwrap_or_else(|| index.to_string());

        let position = match feature.geometry {
            Some(geometry) => {
                let geometry: geo::Geometry<f64> = geometry.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;

                match geometry {
                    geo::Geometry::Point(p) => p,
                    other => match other.centroid() {
                        Some(p) => p,
                        None => continue,
                    },
                }
            }
            None => continue,
        };

        buildings.push(Building { id, position, percent_diff });
    }

    Ok(buildings)
}

/// `NaN` and `inf` parse as floats but are not positions.
fn parse_coordinate(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn load_csv(input: &InputConfig, path: &Path) -> Result<Vec<Building>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let column = |name: &str| headers.iter().position(|h| h == name)
        .ok_or_else(|| anyhow!("Column '{}' not found in CSV", name));

    let lon_idx = column(input.lon_column.as_str())?;
    let lat_idx = column(input.lat_column.as_str())?;
    let value_idx = column(input.percent_diff_field.as_str())?;
    let id_idx = match &input.id_field {
        Some(field) => Some(column(field.as_str())?),
        None => None,
    };

    let mut buildings = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let coords = (
            record.get(lon_idx).and_then(parse_coordinate),
            record.get(lat_idx).and_then(parse_coordinate),
        );
        let (lon, lat) = match coords {
            (Some(lon), Some(lat)) => (lon, lat),
            _ => {
                warn!("Skipping CSV row {} without coordinates", row + 1);
                continue;
            }
        };

        let percent_diff = record.get(value_idx)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0);
        let id = id_idx
            .and_then(|idx| record.get(idx))
            .map(str::to_string)
            .unwrap_or_else(|| row.to_string());

        buildings.push(Building { id, position: Point::new(lon, lat), percent_diff });
    }

    Ok(buildings)
}

pub fn load_shapefile(input: &InputConfig, path: &Path) -> Result<Vec<Building>> {
    use shapefile::dbase::FieldValue;

    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut buildings = Vec::new();

    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result?;

        let position = match shape {
            shapefile::Shape::Point(p) => Point::new(p.x, p.y),
            shapefile::Shape::PointM(p) => Point::new(p.x, p.y),
            shapefile::Shape::PointZ(p) => Point::new(p.x, p.y),
            _ => continue, // Buildings are points
        };
        if !(position.x().is_finite() && position.y().is_finite()) {
            warn!("Skipping shape {} without finite coordinates", index);
            continue;
        }

        let percent_diff = match record.get(&input.percent_diff_field) {
            Some(FieldValue::Numeric(Some(v))) => *v,
            Some(FieldValue::Float(Some(v))) => *v as f64,
            Some(FieldValue::Double(v)) => *v,
            Some(FieldValue::Integer(v)) => *v as f64,
            _ => 0.0,
        };

        let id = input.id_field.as_ref()
            .and_then(|field| match record.get(field) {
                Some(FieldValue::Character(Some(s))) => Some(s.clone()),
                Some(FieldValue::Numeric(Some(v))) => Some(v.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| index.to_string());

        buildings.push(Building { id, position, percent_diff });
    }

    Ok(buildings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn input_for(path: PathBuf) -> InputConfig {
        InputConfig {
            buildings: path,
            percent_diff_field: "percent_diff".to_string(),
            id_field: Some("bbl".to_string()),
            lon_column: "longitude".to_string(),
            lat_column: "latitude".to_string(),
            ej_areas: None,
        }
    }

    #[test]
    fn test_load_geojson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.geojson");
        let mut file = File::create(&path).unwrap();
        write!(file, r#"{{
  "type": "FeatureCollection",
  "features": [
    {{ "type": "Feature", "properties": {{ "bbl": "1000010010", "percent_diff": 12.5 }},
       "geometry": {{ "type": "Point", "coordinates": [-73.99, 40.73] }} }},
    {{ "type": "Feature", "properties": {{ "bbl": 42, "percent_diff": "-3.5" }},
       "geometry": {{ "type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,2],[0,0]]] }} }},
    {{ "type": "Feature", "properties": {{ "bbl": "x" }},
       "geometry": {{ "type": "Point", "coordinates": [1, 1] }} }},
    {{ "type": "Feature", "properties": {{ "percent_diff": 1 }}, "geometry": null }}
  ]
}}"#).unwrap();

        let buildings = load_buildings(&input_for(path)).unwrap();
        assert_eq!(buildings.len(), 3);
        assert_eq!(buildings[0].id, "1000010010");
        assert_eq!(buildings[0].percent_diff, 12.5);
        assert_eq!(buildings[1].id, "42");
        assert_eq!(buildings[1].percent_diff, -3.5);
        assert_eq!(buildings[1].position, Point::new(1.0, 1.0));
        assert_eq!(buildings[2].percent_diff, 0.0);
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.csv");
        std::fs::write(&path, "bbl,longitude,latitude,percent_diff\n\
            1,-73.9,40.7,25\n\
            2,,40.7,5\n\
            3,-73.8,40.6,\n").unwrap();

        let buildings = load_buildings(&input_for(path)).unwrap();
        assert_eq!(buildings.len(), 2);
        assert_eq!(buildings[0].id, "1");
        assert_eq!(buildings[1].id, "3");
        assert_eq!(buildings[1].percent_diff, 0.0);
    }

    #[test]
    fn test_csv_non_finite_coordinates_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.csv");
        std::fs::write(&path, "bbl,longitude,latitude,percent_diff\n\
            1,-73.9,40.7,25\n\
            2,NaN,40.7,5\n\
            3,-73.8,inf,5\n\
            4,-73.8,40.6,-15\n").unwrap();

        let buildings = load_buildings(&input_for(path)).unwrap();
        let ids: Vec<&str> = buildings.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert!(buildings.iter().all(|b| b.position.x().is_finite() && b.position.y().is_finite()));
    }

    #[test]
    fn test_parse_coordinate() {
        assert_eq!(parse_coordinate(" -73.5 "), Some(-73.5));
        assert_eq!(parse_coordinate("NaN"), None);
        assert_eq!(parse_coordinate("-inf"), None);
        assert_eq!(parse_coordinate(""), None);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_buildings(&input_for(PathBuf::from("buildings.kml"))).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }
}
