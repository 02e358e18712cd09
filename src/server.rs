use crate::chart::{synthesize, Palette};
use crate::classify::classify;
use crate::clustering::ClusterIndex;
use crate::config::AppConfig;
use crate::overlay::EjOverlay;
use crate::types::{Building, Category, ClusterId, SourceFeature};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

pub struct AppState {
    pub buildings: Vec<Building>,
    pub index: ClusterIndex,
    pub overlay: Option<EjOverlay>,
    pub palette: Palette,
}

#[derive(Deserialize)]
pub struct ClusterParams {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    zoom: f64,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct QueryResponse {
    id: String,
    percent_diff: f64,
    category: Category,
    in_ej_area: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/clusters", get(clusters_handler))
        .route("/api/clusters/:id/icon.svg", get(icon_handler))
        .route("/api/query", get(query_handler))
        .with_state(state)
}

pub async fn start_server(config: AppConfig, buildings: Vec<Building>, overlay: Option<EjOverlay>) -> Result<()> {
    let index = ClusterIndex::build(&config.clustering, &buildings);

    let state = Arc::new(AppState {
        buildings,
        index,
        overlay,
        palette: Palette::from(&config.style),
    });

    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting server on http://{}", addr);

    let app = router(state)
        .nest_service("/tiles", ServeDir::new(&config.output.tile_dir))
        .fallback_service(ServeDir::new(&config.server.static_dir))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// GeoJSON feature with the properties a clustered source reports.
fn feature_json(feature: &SourceFeature) -> Value {
    let position = feature.position();
    let mut properties = Map::new();
    match feature {
        SourceFeature::Cluster { id, counts, .. } => {
            properties.insert("cluster".into(), json!(true));
            properties.insert("cluster_id".into(), json!(id));
            properties.insert("point_count".into(), json!(counts.total()));
            for category in Category::ALL {
                properties.insert(category.aggregate_property().into(), json!(counts[category]));
            }
        }
        SourceFeature::Point { building, category, .. } => {
            properties.insert("cluster".into(), json!(false));
            properties.insert("building".into(), json!(building));
            properties.insert("category".into(), json!(category));
        }
    }
    json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [position.x(), position.y()] },
        "properties": properties,
    })
}

async fn clusters_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClusterParams>,
) -> Json<Value> {
    let features: Vec<Value> = state.index
        .get_clusters([params.west, params.south, params.east, params.north], params.zoom)
        .iter()
        .map(feature_json)
        .collect();

    Json(json!({ "type": "FeatureCollection", "features": features }))
}

async fn icon_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Response {
    match state.index.cluster(ClusterId(id)) {
        Some(cluster) => {
            let icon = synthesize(&cluster.counts, &state.palette);
            ([(header::CONTENT_TYPE, "image/svg+xml")], icon.svg).into_response()
        }
        None => (StatusCode::NOT_FOUND, format!("Unknown cluster {}", id)).into_response(),
    }
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    Json(lookup(&state, params.lon, params.lat))
}

fn lookup(state: &AppState, lon: f64, lat: f64) -> Option<QueryResponse> {
    let index = state.index.nearest_building(lon, lat)?;
    let building = state.buildings.get(index)?;
    let in_ej_area = state.overlay.as_ref()
        .map(|overlay| overlay.contains(building.position))
        .unwrap_or(false);

    Some(QueryResponse {
        id: building.id.clone(),
        percent_diff: building.percent_diff,
        category: classify(building.percent_diff),
        in_ej_area,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::types::CategoryCounts;
    use geo::{polygon, Point};

    fn state() -> AppState {
        let buildings = vec![
            Building { id: "a".into(), position: Point::new(-73.990, 40.730), percent_diff: 20.0 },
            Building { id: "b".into(), position: Point::new(-73.991, 40.731), percent_diff: -20.0 },
            Building { id: "c".into(), position: Point::new(-73.500, 40.900), percent_diff: 0.0 },
        ];
        let index = ClusterIndex::build(&ClusterConfig::default(), &buildings);
        let overlay = EjOverlay::from_polygons(vec![polygon![
            (x: -73.6, y: 40.8), (x: -73.4, y: 40.8), (x: -73.4, y: 41.0), (x: -73.6, y: 41.0), (x: -73.6, y: 40.8)
        ]]);
        AppState { buildings, index, overlay: Some(overlay), palette: Palette::default() }
    }

    #[test]
    fn test_lookup() {
        let state = state();
        let response = lookup(&state, -73.501, 40.901).unwrap();
        assert_eq!(response, QueryResponse {
            id: "c".into(),
            percent_diff: 0.0,
            category: Category::NoData,
            in_ej_area: true,
        });
        assert!(!lookup(&state, -73.99, 40.73).unwrap().in_ej_area);
    }

    #[test]
    fn test_cluster_feature_properties() {
        let feature = SourceFeature::Cluster {
            id: ClusterId(75),
            position: Point::new(-73.99, 40.73),
            counts: CategoryCounts::new(3, 2, 1, 0),
        };
        let value = feature_json(&feature);
        let props = &value["properties"];
        assert_eq!(props["cluster"], json!(true));
        assert_eq!(props["cluster_id"], json!(75));
        assert_eq!(props["point_count"], json!(6));
        assert_eq!(props["highEmitters"], json!(3));
        assert_eq!(props["midEmitters"], json!(2));
        assert_eq!(props["lowEmitters"], json!(1));
        assert_eq!(props["noData"], json!(0));
    }

    #[test]
    fn test_clusters_at_low_zoom() {
        let state = state();
        let features = state.index.get_clusters([-75.0, 40.0, -73.0, 41.0], 10.0);
        let clusters: Vec<_> = features.iter().filter(|f| f.is_cluster()).collect();
        assert_eq!(clusters.len(), 1);
        assert_eq!(features.len(), 2);
    }
}
