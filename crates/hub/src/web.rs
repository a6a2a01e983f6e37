use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use time::OffsetDateTime;
use tokio::net::TcpListener;

use crate::db::Db;
use crate::notifications::{NotificationSettings, NOTIFICATION_BLOB};
use crate::reading::SourceKind;
use crate::state::{PlantationError, SharedState, Switch};
use crate::thresholds::{ThresholdConfig, THRESHOLD_BLOBS};

const DEFAULT_READINGS_LIMIT: i64 = 50;
const MAX_READINGS_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub state: SharedState,
    pub db: Db,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("request failed: {e:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

fn not_found(what: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{what} not found"))
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/plantations", post(create_plantation))
        .route(
            "/api/plantations/{id}",
            get(get_plantation).delete(delete_plantation),
        )
        .route("/api/plantations/{id}/readings", get(plantation_readings))
        .route("/api/plantations/{id}/irrigation", post(toggle_irrigation))
        .route("/api/plantations/{id}/illumination", post(toggle_illumination))
        .route("/api/settings/{name}", get(get_setting).put(put_setting))
        .with_state(app)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.state.read().await;
    Json(st.to_status())
}

// -- plantations --------------------------------------------------------------

async fn get_plantation(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let st = app.state.read().await;
    let snap = st.snapshot(&id).ok_or_else(|| not_found("plantation"))?;
    Ok(Json(snap).into_response())
}

#[derive(Deserialize)]
struct NewPlantation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

async fn create_plantation(
    State(app): State<AppState>,
    Json(body): Json<NewPlantation>,
) -> ApiResult<Response> {
    let source = match body.source.as_deref() {
        None => SourceKind::Synthetic,
        Some(s) => SourceKind::from_str_lossy(s)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown source '{s}'")))?,
    };

    let snapshot = {
        let mut st = app.state.write().await;
        let mut id = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string();
        // two requests in the same millisecond
        while st.plantation(&id).is_some() {
            id = format!("{id}-1");
        }
        let name = body
            .name
            .clone()
            .unwrap_or_else(|| format!("Plantation {}", st.plantation_ids().count() + 1));
        st.add_plantation(&id, &name, source).map_err(|e| match e {
            PlantationError::Duplicate(_) => (StatusCode::CONFLICT, e.to_string()),
            PlantationError::EmptyId | PlantationError::EmptyName => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
        })?
    };

    if let Err(e) = app
        .db
        .upsert_plantation(&snapshot.id, &snapshot.name, source)
        .await
    {
        app.state.write().await.remove_plantation(&snapshot.id);
        return Err(internal(e));
    }

    tracing::info!(plantation = %snapshot.id, name = %snapshot.name, %source, "plantation created");
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

async fn delete_plantation(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let removed = app.state.write().await.remove_plantation(&id);
    let deleted = app.db.delete_plantation(&id).await.map_err(internal)?;
    if removed || deleted {
        tracing::info!(plantation = %id, "plantation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("plantation"))
    }
}

#[derive(Deserialize)]
struct ReadingsQuery {
    limit: Option<i64>,
}

async fn plantation_readings(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ReadingsQuery>,
) -> ApiResult<Response> {
    if app.state.read().await.plantation(&id).is_none() {
        return Err(not_found("plantation"));
    }
    let limit = q
        .limit
        .unwrap_or(DEFAULT_READINGS_LIMIT)
        .clamp(1, MAX_READINGS_LIMIT);
    let rows = app
        .db
        .recent_readings(&id, limit)
        .await
        .map_err(internal)?;
    Ok(Json(rows).into_response())
}

// -- manual switches ----------------------------------------------------------

#[derive(Deserialize)]
struct SwitchBody {
    on: bool,
}

async fn toggle_irrigation(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SwitchBody>,
) -> ApiResult<Response> {
    toggle(app, &id, Switch::Irrigation, body.on).await
}

async fn toggle_illumination(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SwitchBody>,
) -> ApiResult<Response> {
    toggle(app, &id, Switch::Illumination, body.on).await
}

async fn toggle(app: AppState, id: &str, switch: Switch, on: bool) -> ApiResult<Response> {
    let outcome = app
        .state
        .write()
        .await
        .toggle(id, switch, on)
        .ok_or_else(|| not_found("plantation"))?;
    Ok(Json(outcome).into_response())
}

// -- settings -----------------------------------------------------------------

fn check_setting_name(name: &str) -> ApiResult<()> {
    if THRESHOLD_BLOBS.contains(&name) || name == NOTIFICATION_BLOB {
        Ok(())
    } else {
        Err(not_found("setting"))
    }
}

/// The stored blob, or `null` when nothing has been saved under `name`.
/// Notification settings always come back complete, defaults filled in.
async fn get_setting(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult<Response> {
    check_setting_name(&name)?;
    let raw = app.db.get_setting(&name).await.map_err(internal)?;
    if name == NOTIFICATION_BLOB {
        let stored = raw.and_then(|r| serde_json::from_str::<Value>(&r).ok());
        return Ok(Json(NotificationSettings::from_blob(stored.as_ref())).into_response());
    }
    let value = match raw {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        None => Value::Null,
    };
    Ok(Json(value).into_response())
}

/// Store a blob. Threshold blobs swap in the thresholds rebuilt from
/// everything stored.
async fn put_setting(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(blob): Json<Value>,
) -> ApiResult<Response> {
    check_setting_name(&name)?;
    app.db
        .put_setting(&name, &blob.to_string())
        .await
        .map_err(internal)?;

    if name == NOTIFICATION_BLOB {
        tracing::info!(setting = %name, "notification settings updated");
        return Ok(Json(NotificationSettings::from_blob(Some(&blob))).into_response());
    }

    let cfg = reload_thresholds(&app.db).await.map_err(internal)?;
    app.state.write().await.replace_thresholds(cfg);
    tracing::info!(setting = %name, "settings updated");
    Ok(Json(cfg).into_response())
}

/// Build a threshold snapshot from the stored blobs, field defaults filling
/// whatever is missing.
pub async fn reload_thresholds(db: &Db) -> Result<ThresholdConfig> {
    let raw = db.load_settings().await?;
    Ok(ThresholdConfig::from_raw_blobs(&raw))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "api listening");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::FeedSettings;
    use crate::light::LdrPolicy;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, RwLock};
    use tower::ServiceExt;

    async fn app() -> (AppState, mpsc::Receiver<crate::feeds::FeedEvent>) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        let feeds = FeedSettings {
            device_url: "ws://127.0.0.1:9/ws".into(),
            synthetic_interval: Duration::from_secs(3600),
            ldr_policy: LdrPolicy::Reject,
            device_offset: time::UtcOffset::UTC,
        };
        let state = Arc::new(RwLock::new(SystemState::new(
            ThresholdConfig::default(),
            feeds,
            tx,
        )));
        (AppState { state, db }, rx)
    }

    async fn call(app: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(app.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    // -- status -------------------------------------------------------------

    #[tokio::test]
    async fn status_starts_empty_with_default_thresholds() {
        let (app, _rx) = app().await;
        let (code, body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["plantations"], serde_json::json!([]));
        assert_eq!(body["thresholds"]["temperature"]["critical"], 30.0);
    }

    // -- plantations --------------------------------------------------------

    #[tokio::test]
    async fn create_get_delete_plantation() {
        let (app, _rx) = app().await;
        let (code, created) = call(
            &app,
            "POST",
            "/api/plantations",
            Some(serde_json::json!({ "name": "Greenhouse" })),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(created["source"], "synthetic");
        assert!(created["reading"]["humidity"].is_number());
        assert!(created["status"].is_string());
        assert_eq!(created["history"]["humidity"].as_array().unwrap().len(), 7);
        let id = created["id"].as_str().unwrap().to_string();
        assert!(id.parse::<i64>().is_ok());

        let stored = app.db.load_plantations().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "Greenhouse");

        let (code, got) = call(&app, "GET", &format!("/api/plantations/{id}"), None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(got["name"], "Greenhouse");

        let (code, _) = call(&app, "DELETE", &format!("/api/plantations/{id}"), None).await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        assert!(app.db.load_plantations().await.unwrap().is_empty());

        let (code, _) = call(&app, "GET", &format!("/api/plantations/{id}"), None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        let (code, _) = call(&app, "DELETE", &format!("/api/plantations/{id}"), None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_without_name_numbers_the_plantation() {
        let (app, _rx) = app().await;
        let (code, first) = call(&app, "POST", "/api/plantations", Some(serde_json::json!({}))).await;
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(first["name"], "Plantation 1");

        let (_, second) = call(
            &app,
            "POST",
            "/api/plantations",
            Some(serde_json::json!({ "source": "synthetic" })),
        )
        .await;
        assert_eq!(second["name"], "Plantation 2");
        assert_eq!(app.db.load_plantations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (app, _rx) = app().await;
        let (code, _) = call(
            &app,
            "POST",
            "/api/plantations",
            Some(serde_json::json!({ "name": "" })),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = call(
            &app,
            "POST",
            "/api/plantations",
            Some(serde_json::json!({ "name": "X", "source": "solar" })),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn toggle_updates_snapshot() {
        let (app, _rx) = app().await;
        let (_, created) = call(
            &app,
            "POST",
            "/api/plantations",
            Some(serde_json::json!({ "name": "Sim" })),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let (code, body) = call(
            &app,
            "POST",
            &format!("/api/plantations/{id}/illumination"),
            Some(serde_json::json!({ "on": true })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["dropped"], "no device link");
        assert_eq!(body["plantation"]["reading"]["illumination_active"], true);
        let st = app.state.read().await;
        assert!(st.plantation(id).unwrap().actuators.illumination);
    }

    #[tokio::test]
    async fn toggle_unknown_plantation_is_404() {
        let (app, _rx) = app().await;
        let (code, _) = call(
            &app,
            "POST",
            "/api/plantations/nope/irrigation",
            Some(serde_json::json!({ "on": true })),
        )
        .await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn readings_endpoint_lists_logged_readings() {
        let (app, _rx) = app().await;
        let (_, created) = call(
            &app,
            "POST",
            "/api/plantations",
            Some(serde_json::json!({ "name": "Sim" })),
        )
        .await;
        let id = created["id"].as_str().unwrap();
        let r = crate::synthetic::sample_reading(Default::default(), OffsetDateTime::now_utc());
        app.db.insert_reading(id, &r).await.unwrap();

        let (code, body) = call(&app, "GET", &format!("/api/plantations/{id}/readings?limit=5"), None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    // -- settings -----------------------------------------------------------

    #[tokio::test]
    async fn unknown_setting_is_404() {
        let (app, _rx) = app().await;
        let (code, _) = call(&app, "GET", "/api/settings/weatherConfig", None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn notification_settings_round_trip_with_defaults() {
        let (app, _rx) = app().await;
        let (code, body) = call(&app, "GET", "/api/settings/notificationConfig", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["notificationsEnabled"], true);
        assert_eq!(body["notificationPhone"], "+34600000000");

        let (code, body) = call(
            &app,
            "PUT",
            "/api/settings/notificationConfig",
            Some(serde_json::json!({ "emailNotifications": false, "notificationEmail": "ops@farm.test" })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["emailNotifications"], false);

        let (_, body) = call(&app, "GET", "/api/settings/notificationConfig", None).await;
        assert_eq!(body["emailNotifications"], false);
        assert_eq!(body["notificationEmail"], "ops@farm.test");
        assert_eq!(body["smsNotifications"], false);
        // thresholds untouched
        assert_eq!(*app.state.read().await.thresholds(), ThresholdConfig::default());
    }

    #[tokio::test]
    async fn put_setting_swaps_thresholds() {
        let (app, _rx) = app().await;
        let (code, body) = call(&app, "GET", "/api/settings/tempConfig", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, Value::Null);

        let (code, cfg) = call(
            &app,
            "PUT",
            "/api/settings/tempConfig",
            Some(serde_json::json!({ "tempMin": 10, "tempMax": 0, "tempCritical": 35 })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(cfg["temperature"]["min"], 10.0);
        // zero falls back to the default
        assert_eq!(cfg["temperature"]["max"], 28.0);
        assert_eq!(cfg["temperature"]["critical"], 35.0);

        let st = app.state.read().await;
        assert_eq!(st.thresholds().temperature.critical, 35.0);
        drop(st);

        let (_, stored) = call(&app, "GET", "/api/settings/tempConfig", None).await;
        assert_eq!(stored["tempMin"], 10);
    }
}
