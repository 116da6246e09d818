use std::{
    collections::{BTreeMap, HashMap},
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
};
use tracing::{debug, info, warn};

use zoning_common::{
    command_topic, state_entity_id, thermostat_topic, CommandDispatch, Evaluation, HouseConfig,
    Reading, RuntimeConfig, ServiceCall, TOPIC_CONTROLLER_STATE, TOPIC_STATE_WILDCARD,
};

use crate::hub::{HubMessage, ZoningHub};

#[derive(Clone)]
struct AppState {
    runtime: Arc<Mutex<RuntimeConfig>>,
    hub: Arc<Mutex<ZoningHub>>,
    events: mpsc::Sender<HubMessage>,
    time_synced: Arc<AtomicBool>,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    targets_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

/// Publishes engine commands without waiting on the broker.
#[derive(Clone)]
struct MqttDispatch {
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
    #[serde(rename = "localTime")]
    local_time: Option<String>,
}

#[derive(Debug, Serialize)]
struct ThermostatView {
    zone: String,
    #[serde(rename = "entityId")]
    entity_id: String,
    #[serde(rename = "targetTemp")]
    target_temp: f64,
    #[serde(rename = "currentTemp")]
    current_temp: Option<f64>,
    #[serde(rename = "hvacMode")]
    hvac_mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    subscribed: bool,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "isNight")]
    is_night: Option<bool>,
    #[serde(rename = "centralThermostat")]
    central_thermostat: Option<String>,
    #[serde(rename = "lastEvaluation")]
    last_evaluation: Option<Evaluation>,
    thermostats: Vec<ThermostatView>,
}

#[derive(Debug, Serialize)]
struct TargetAccepted {
    zone: String,
    #[serde(rename = "targetTemp")]
    target_temp: f64,
}

#[derive(Debug, Serialize)]
struct Accepted {
    accepted: bool,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;
const EVENT_QUEUE_DEPTH: usize = 256;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    if let Err(err) = runtime.house.validate() {
        warn!("house configuration is incomplete: {err}");
    }

    let targets = store.load_zone_targets().await.unwrap_or_else(|err| {
        warn!("failed to load zone targets from store: {err:#}");
        BTreeMap::new()
    });
    let hub = ZoningHub::new(&runtime, &targets);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("zoning-controller-rust", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let (events, receiver) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let app_state = AppState {
        runtime: Arc::new(Mutex::new(runtime)),
        hub: Arc::new(Mutex::new(hub)),
        events,
        time_synced: Arc::new(AtomicBool::new(false)),
        store,
    };

    mqtt.subscribe(TOPIC_STATE_WILDCARD, QoS::AtMostOnce)
        .await
        .context("failed to subscribe to state topics")?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_hub_worker(app_state.clone(), MqttDispatch { mqtt }, receiver);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .route("/api/zones/{zone}/target", post(handle_set_zone_target))
        .route("/api/evaluate", post(handle_evaluate))
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.hub.lock().await.unsubscribe();
    info!("controller stopped, state feed unsubscribed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    match parse_state_message(&message.topic, &message.payload) {
                        Some(hub_message) => {
                            if app_state.events.send(hub_message).await.is_err() {
                                warn!("hub worker stopped, dropping state update");
                            }
                        }
                        None => debug!("ignoring mqtt message on {}", message.topic),
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_hub_worker(
    app_state: AppState,
    dispatch: MqttDispatch,
    mut receiver: mpsc::Receiver<HubMessage>,
) {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            // Configuration is re-read for every message so edits apply on the next run.
            let runtime = app_state.runtime.lock().await.clone();
            let now = local_time_of_day(&app_state, &runtime.timezone);

            let (outcome, targets, readings) = {
                let mut hub = app_state.hub.lock().await;
                let outcome = hub.handle(message, &runtime, &dispatch, now);
                (outcome, hub.zone_targets(), hub.thermostat_readings())
            };

            if outcome.thermostats_changed {
                for (entity_id, reading) in &readings {
                    dispatch.publish_json(&thermostat_topic(entity_id), true, reading);
                }
            }

            if let Some(evaluation) = outcome.evaluations.last() {
                dispatch.publish_json(TOPIC_CONTROLLER_STATE, true, evaluation);
            }

            if outcome.targets_changed {
                if let Err(err) = app_state.store.save_zone_targets(&targets).await {
                    warn!("failed to persist zone targets: {err:#}");
                }
            }
        }
        info!("hub worker stopped");
    });
}

fn parse_state_message(topic: &str, payload: &[u8]) -> Option<HubMessage> {
    let entity_id = state_entity_id(topic)?;
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return None;
    }

    let message = std::str::from_utf8(payload).ok()?.trim();
    let reading = if message.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Reading>(message).unwrap_or_else(|_| Reading::new(message)))
    };

    Some(HubMessage::State {
        entity_id: entity_id.to_string(),
        reading,
    })
}

impl MqttDispatch {
    fn publish_json<T: Serialize>(&self, topic: &str, retain: bool, payload: &T) {
        match serde_json::to_vec(payload) {
            Ok(body) => {
                if let Err(err) = self.mqtt.try_publish(topic, QoS::AtLeastOnce, retain, body) {
                    warn!("publish to {topic} failed: {err}");
                }
            }
            Err(err) => warn!("serialization for {topic} failed: {err}"),
        }
    }
}

impl CommandDispatch for MqttDispatch {
    fn dispatch(&self, call: &ServiceCall) {
        info!(
            "dispatching {}.{} for {}",
            call.domain.as_str(),
            call.service.as_str(),
            call.entity_id
        );
        self.publish_json(
            &command_topic(call.domain.as_str(), call.service.as_str()),
            false,
            call,
        );
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.runtime.lock().await.clone();
    let is_night = local_now(&runtime.timezone)
        .map(|now| runtime.house.night_window().is_night_at(&now));

    let (subscribed, last_evaluation, thermostats) = {
        let hub = state.hub.lock().await;
        let thermostats = hub
            .thermostats()
            .iter()
            .map(|thermostat| ThermostatView {
                zone: thermostat.zone.clone(),
                entity_id: thermostat.entity_id.clone(),
                target_temp: thermostat.target_temperature(),
                current_temp: thermostat.current_temperature(hub.states()),
                hvac_mode: thermostat.hvac_mode(hub.states()),
            })
            .collect();
        (
            hub.is_subscribed(),
            hub.last_evaluation().cloned(),
            thermostats,
        )
    };

    Json(StatusView {
        subscribed,
        time_synced: state.time_synced.load(Ordering::Relaxed),
        timezone: runtime.timezone.clone(),
        is_night,
        central_thermostat: runtime.house.central_thermostat().map(str::to_string),
        last_evaluation,
        thermostats,
    })
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let house = state.runtime.lock().await.house.clone();
    Json(house)
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(mut house): Json<HouseConfig>,
) -> impl IntoResponse {
    house.resolve_zone_thermostats();
    if let Err(err) = house.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    {
        let mut runtime = state.runtime.lock().await;
        runtime.house = house.clone();
    }

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist house config update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist house configuration",
        );
    }

    enqueue(&state, HubMessage::Reconfigure).await;
    Json(house).into_response()
}

async fn handle_set_zone_target(
    State(state): State<AppState>,
    Path(zone): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };
    if !target.is_finite() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }

    if !state.hub.lock().await.has_zone(&zone) {
        return error_response(StatusCode::NOT_FOUND, "Unknown zone");
    }

    let target = state.runtime.lock().await.engine.clamp_zone_target(target);
    enqueue(
        &state,
        HubMessage::SetTarget {
            zone: zone.clone(),
            temperature: target,
        },
    )
    .await;

    (
        StatusCode::ACCEPTED,
        Json(TargetAccepted {
            zone,
            target_temp: target,
        }),
    )
        .into_response()
}

async fn handle_evaluate(State(state): State<AppState>) -> impl IntoResponse {
    enqueue(&state, HubMessage::Evaluate).await;
    (StatusCode::ACCEPTED, Json(Accepted { accepted: true }))
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let timezone = state.runtime.lock().await.timezone.clone();
    Json(TimeStatus {
        time_synced: state.time_synced.load(Ordering::Relaxed),
        local_time: local_now(&timezone).map(|now| now.format("%H:%M:%S").to_string()),
        timezone,
        now_epoch: Utc::now().timestamp(),
    })
}

async fn handle_put_timezone(
    State(state): State<AppState>,
    Json(update): Json<TimezoneUpdate>,
) -> impl IntoResponse {
    if update.timezone.parse::<Tz>().is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid timezone value");
    }

    {
        let mut runtime = state.runtime.lock().await;
        runtime.timezone = update.timezone;
    }

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist timezone update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    handle_get_time(State(state)).await.into_response()
}

async fn enqueue(state: &AppState, message: HubMessage) {
    if state.events.send(message).await.is_err() {
        warn!("hub worker stopped, dropping request");
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("ZONING_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.zoning"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            targets_path: Arc::new(data_dir.join("zone_targets.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(self.runtime_path.as_ref(), runtime).await
    }

    async fn load_zone_targets(&self) -> anyhow::Result<BTreeMap<String, f64>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.targets_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_zone_targets(&self, targets: &BTreeMap<String, f64>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(self.targets_path.as_ref(), targets).await
    }
}

async fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let runtime = state.runtime.lock().await.clone();
    state.store.save_runtime_config(&runtime).await
}

fn local_time_of_day(state: &AppState, timezone: &str) -> NaiveTime {
    match local_now(timezone) {
        Some(now) => {
            state.time_synced.store(true, Ordering::Relaxed);
            now.time()
        }
        None => {
            state.time_synced.store(false, Ordering::Relaxed);
            warn!("invalid timezone {timezone:?}, falling back to UTC");
            Utc::now().time()
        }
    }
}

fn local_now(timezone: &str) -> Option<DateTime<Tz>> {
    let tz: Tz = timezone.parse().ok()?;
    Some(Utc::now().with_timezone(&tz))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
