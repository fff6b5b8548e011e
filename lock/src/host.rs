use std::{
    cell::RefCell,
    collections::HashMap,
    future::IntoFuture,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    rc::Rc,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    sync::{mpsc, oneshot, watch},
};
use tracing::{info, warn};

use keypad_lock_common::{
    DeviceParts, HardwareError, HttpRequest, HttpResponse, HttpTransport, Key, Keypad,
    LockDevice, LockSnapshot, OutputPins, PersistedLockState, RuntimeConfig, SleepControl,
    StateStore, TransportError, WakeSource,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct AppState {
    keys: mpsc::UnboundedSender<Key>,
    snapshot: watch::Receiver<Option<LockSnapshot>>,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: PathBuf,
    state_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct KeysAccepted {
    accepted: usize,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    let runtime = runtime.with_build_defaults();

    info!(
        "runtime config loaded: cloud=`{}`, status=`{}`, idle sleep {} ms",
        runtime.cloud.base_url, runtime.status.endpoint, runtime.lock.idle_sleep_timeout_ms
    );

    let (key_tx, key_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let (exit_tx, exit_rx) = oneshot::channel();

    let device_runtime = runtime.clone();
    let state_path = store.state_path.clone();
    thread::Builder::new()
        .name("lock-control".to_string())
        .spawn(move || {
            let result = run_device(device_runtime, state_path, key_rx, snapshot_tx);
            let _ = exit_tx.send(result);
        })
        .context("failed to spawn lock control thread")?;

    spawn_stdin_keys(key_tx.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/key", post(handle_post_key))
        .with_state(AppState {
            keys: key_tx,
            snapshot: snapshot_rx,
        });

    let port = std::env::var("LOCK_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind lock server at {addr}"))?;

    info!("lock simulator listening on http://{addr}; type keys on stdin or POST /api/key?value=1234%23");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        result = exit_rx => {
            result.context("lock control thread vanished")??;
        }
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

/// Runs the control loop on the calling thread until the keypad channel closes.
fn run_device(
    runtime: RuntimeConfig,
    state_path: PathBuf,
    keys: mpsc::UnboundedReceiver<Key>,
    snapshots: watch::Sender<Option<LockSnapshot>>,
) -> anyhow::Result<()> {
    let keys = Rc::new(RefCell::new(keys));
    let transport = UreqTransport::new(HTTP_TIMEOUT);

    let parts = DeviceParts {
        keypad: ChannelKeypad { keys: keys.clone() },
        pins: ConsoleLeds::default(),
        sleep: SimulatedSleep { keys },
        store: FileStateStore { path: state_path },
        transport,
    };
    let mut device =
        LockDevice::boot(&runtime, parts, monotonic_ms()).context("failed to boot lock")?;
    device.set_ip_address("127.0.0.1");

    let cycle = Duration::from_millis(runtime.lock.debounce_ms);
    loop {
        match device.run_cycle(monotonic_ms()) {
            Ok(_) => {}
            Err(HardwareError::Sleep(message)) => {
                info!("control loop stopping: {message}");
                return Ok(());
            }
            Err(err) => warn!("control cycle failed: {err}"),
        }

        snapshots.send_replace(Some(device.snapshot(monotonic_ms())));
        thread::sleep(cycle);
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    let overrides: [(&str, &mut String); 6] = [
        ("CLOUD_BASE_URL", &mut runtime.cloud.base_url),
        ("CLOUD_ACCESS_KEY", &mut runtime.cloud.access_key),
        ("CLOUD_SECRET_KEY", &mut runtime.cloud.secret_key),
        ("CLOUD_PRODUCT_ID", &mut runtime.cloud.product_id),
        ("CLOUD_DEVICE_ID", &mut runtime.cloud.device_id),
        ("STATUS_ENDPOINT", &mut runtime.status.endpoint),
    ];

    for (name, field) in overrides {
        if let Ok(value) = std::env::var(name) {
            *field = value;
        }
    }
}

fn spawn_stdin_keys(keys: mpsc::UnboundedSender<Key>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    for key in line.chars().filter_map(Key::from_char) {
                        if keys.send(key).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    return;
                }
            }
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> axum::response::Response {
    let snapshot = state.snapshot.borrow().clone();
    match snapshot {
        Some(snapshot) => Json(snapshot).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Lock is still booting"),
    }
}

async fn handle_post_key(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let keys: Option<Vec<Key>> = value.chars().map(Key::from_char).collect();
    let Some(keys) = keys.filter(|keys| !keys.is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid keys. Use 0-9, A-D, '*' and '#'",
        );
    };

    for key in &keys {
        if state.keys.send(*key).is_err() {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Lock is not running");
        }
    }

    Json(KeysAccepted {
        accepted: keys.len(),
    })
    .into_response()
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

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("LOCK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.keypad-lock"));

        Self {
            runtime_path: data_dir.join("runtime.json"),
            state_path: data_dir.join("state.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    fn store_error(&self, err: impl std::fmt::Display) -> HardwareError {
        HardwareError::Store(format!("{}: {err}", self.path.display()))
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<PersistedLockState>, HardwareError> {
        match std::fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|err| self.store_error(err)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.store_error(err)),
        }
    }

    fn save(&self, state: PersistedLockState) -> Result<(), HardwareError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| self.store_error(err))?;
        }
        let payload = serde_json::to_vec(&state).map_err(|err| self.store_error(err))?;
        std::fs::write(&self.path, payload).map_err(|err| self.store_error(err))
    }
}

struct ChannelKeypad {
    keys: Rc<RefCell<mpsc::UnboundedReceiver<Key>>>,
}

impl Keypad for ChannelKeypad {
    fn poll_key(&mut self) -> Option<Key> {
        self.keys.borrow_mut().try_recv().ok()
    }
}

/// Blocks until the next key press, which is consumed the way a real wake press is.
struct SimulatedSleep {
    keys: Rc<RefCell<mpsc::UnboundedReceiver<Key>>>,
}

impl SleepControl for SimulatedSleep {
    fn configure_wake_source(&mut self, source: &WakeSource) -> Result<(), HardwareError> {
        info!(
            "wake source: {:?} on gpio {} ({:?} level)",
            source.line, source.pin, source.trigger
        );
        Ok(())
    }

    fn suspend_until_wake(&mut self) -> Result<(), HardwareError> {
        info!("sleeping; press any key to wake");
        match self.keys.borrow_mut().blocking_recv() {
            Some(key) => {
                info!("woken by key {key}");
                Ok(())
            }
            None => Err(HardwareError::Sleep("keypad input closed".to_string())),
        }
    }
}

#[derive(Default)]
struct ConsoleLeds {
    levels: HashMap<i32, bool>,
}

impl OutputPins for ConsoleLeds {
    fn set_output(&mut self, pin: i32, high: bool) -> Result<(), HardwareError> {
        if self.levels.insert(pin, high) != Some(high) {
            info!("led gpio {pin} {}", if high { "on" } else { "off" });
        }
        Ok(())
    }
}

#[derive(Clone)]
struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut call = self.agent.post(&request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let response = match call.send_string(&request.body) {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                return Err(TransportError::Request {
                    url: request.url.clone(),
                    message: err.to_string(),
                })
            }
        };

        let status = response.status();
        let body = response.into_string().map_err(|err| TransportError::Body {
            url: request.url.clone(),
            message: err.to_string(),
        })?;
        Ok(HttpResponse { status, body })
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
