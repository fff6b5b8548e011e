use core::convert::TryInto;
use std::{
    collections::HashMap,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    sys,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use keypad_lock_common::{
    config::{HardwareConfig, NetworkConfig},
    DeviceParts, HardwareError, HttpRequest, HttpResponse, HttpTransport, Key, KeypadLine,
    Keypad, LockDevice, OutputPins, PersistedLockState, RuntimeConfig, SleepControl, StateStore,
    TransportError, WakeSource, WakeTrigger,
};

const NVS_NAMESPACE: &str = "keypadlock";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_STATE_KEY: &str = "lock_state";
const MAX_HTTP_BODY: usize = 4096;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const WIFI_RETRY_DELAY_MS: u64 = 1_000;
const SNTP_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const ROW_SETTLE_US: u32 = 10;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    log_wakeup_cause();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let runtime = load_runtime_config(&nvs_partition)
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config from NVS: {err:#}");
            RuntimeConfig::default()
        })
        .with_build_defaults();

    info!(
        "config loaded: ssid=`{}`, device=`{}`, wake={:?}",
        runtime.network.wifi_ssid, runtime.cloud.device_id, runtime.hardware.wake
    );

    let Peripherals { modem, .. } = Peripherals::take()?;

    let wifi = connect_wifi(modem, sys_loop, nvs_partition.clone(), &runtime.network)
        .context("wifi startup failed")?;
    let ip_address = wifi
        .as_ref()
        .and_then(|wifi| wifi.sta_netif().get_ip_info().ok())
        .map(|info| info.ip.to_string());

    // Request signatures carry wall-clock timestamps.
    let _sntp = if wifi.is_some() {
        Some(sync_time(SNTP_SYNC_TIMEOUT)?)
    } else {
        None
    };

    let parts = DeviceParts {
        keypad: MatrixKeypad::new(&runtime.hardware).context("failed to init keypad")?,
        pins: EspLeds::new(&runtime.hardware).context("failed to init LEDs")?,
        sleep: DeepSleep::new(&runtime.hardware),
        store: NvsStateStore {
            partition: nvs_partition,
        },
        transport: EspTransport {
            timeout: HTTP_TIMEOUT,
        },
    };

    let mut device =
        LockDevice::boot(&runtime, parts, monotonic_ms()).context("failed to boot lock")?;
    if let Some(ip_address) = ip_address {
        device.set_ip_address(ip_address);
    }

    // Keep wifi alive for the program lifetime.
    let _wifi = wifi;

    let cycle = Duration::from_millis(runtime.lock.debounce_ms);
    loop {
        if let Err(err) = device.run_cycle(monotonic_ms()) {
            warn!("control cycle failed: {err}");
        }
        thread::sleep(cycle);
    }
}

fn log_wakeup_cause() {
    let cause = unsafe { sys::esp_sleep_get_wakeup_cause() };
    if cause == sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 {
        info!("woke from deep sleep by keypad");
    } else {
        info!("cold boot (wakeup cause {cause})");
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Joins the configured network. Returns `None` when the lock has to run offline.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<Option<EspWifi<'static>>> {
    if network.wifi_ssid.trim().is_empty() {
        warn!("wifi credentials missing; running offline");
        return Ok(None);
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let deadline = Instant::now() + Duration::from_millis(network.connect_timeout_ms);
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt} failed: {err:#}");
                let _ = wifi.disconnect();
            }
        }

        if Instant::now() >= deadline {
            warn!(
                "wifi not connected after {} ms; running offline",
                network.connect_timeout_ms
            );
            let _ = wifi.stop();
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
    }

    Ok(Some(esp_wifi))
}

fn sync_time(timeout: Duration) -> anyhow::Result<EspSntp<'static>> {
    let sntp = EspSntp::new_default().context("failed to start SNTP")?;
    let started = Instant::now();

    while sntp.get_sync_status() != SyncStatus::Completed {
        if started.elapsed() >= timeout {
            warn!("SNTP not synced after {timeout:?}; cloud calls may be rejected");
            return Ok(sntp);
        }
        thread::sleep(Duration::from_millis(200));
    }

    info!("SNTP synced");
    Ok(sntp)
}

struct NvsStateStore {
    partition: EspDefaultNvsPartition,
}

impl StateStore for NvsStateStore {
    fn load(&self) -> Result<Option<PersistedLockState>, HardwareError> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .map_err(|err| HardwareError::Store(err.to_string()))?;
        let mut buffer = [0_u8; 64];

        match nvs.get_str(NVS_STATE_KEY, &mut buffer) {
            Ok(Some(value)) => serde_json::from_str(value)
                .map(Some)
                .map_err(|err| HardwareError::Store(err.to_string())),
            Ok(None) => Ok(None),
            Err(err) => Err(HardwareError::Store(err.to_string())),
        }
    }

    fn save(&self, state: PersistedLockState) -> Result<(), HardwareError> {
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .map_err(|err| HardwareError::Store(err.to_string()))?;
        let payload =
            serde_json::to_string(&state).map_err(|err| HardwareError::Store(err.to_string()))?;
        nvs.set_str(NVS_STATE_KEY, &payload)
            .map_err(|err| HardwareError::Store(err.to_string()))
    }
}

struct EspLeds {
    drivers: HashMap<i32, PinDriver<'static, AnyOutputPin, Output>>,
}

impl EspLeds {
    fn new(hardware: &HardwareConfig) -> anyhow::Result<Self> {
        let mut drivers = HashMap::new();
        for pin in [hardware.green_pin, hardware.yellow_pin, hardware.red_pin] {
            let mut driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
                .with_context(|| format!("LED unavailable on GPIO{pin}"))?;
            driver.set_low()?;
            drivers.insert(pin, driver);
        }
        Ok(Self { drivers })
    }
}

impl OutputPins for EspLeds {
    fn set_output(&mut self, pin: i32, high: bool) -> Result<(), HardwareError> {
        let driver = self.drivers.get_mut(&pin).ok_or(HardwareError::Gpio {
            pin,
            message: "not configured as an LED output".to_string(),
        })?;

        let result = if high {
            driver.set_high()
        } else {
            driver.set_low()
        };
        result.map_err(|err| HardwareError::Gpio {
            pin,
            message: err.to_string(),
        })
    }
}

/// Rows are driven low one at a time; a pressed key pulls its column low.
struct MatrixKeypad {
    rows: Vec<PinDriver<'static, AnyOutputPin, Output>>,
    cols: Vec<PinDriver<'static, AnyIOPin, Input>>,
    held: Option<Key>,
}

impl MatrixKeypad {
    fn new(hardware: &HardwareConfig) -> anyhow::Result<Self> {
        release_sleep_holds(hardware);

        let mut rows = Vec::with_capacity(hardware.row_pins.len());
        for pin in hardware.row_pins {
            let mut driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
                .with_context(|| format!("keypad row unavailable on GPIO{pin}"))?;
            driver.set_high()?;
            rows.push(driver);
        }

        let mut cols = Vec::with_capacity(hardware.col_pins.len());
        for pin in hardware.col_pins {
            let mut driver = unsafe { PinDriver::input(AnyIOPin::new(pin)) }
                .with_context(|| format!("keypad column unavailable on GPIO{pin}"))?;
            driver.set_pull(Pull::Up)?;
            cols.push(driver);
        }

        Ok(Self {
            rows,
            cols,
            held: None,
        })
    }

    fn scan(&mut self) -> Option<Key> {
        let mut pressed = None;
        for (row_index, row) in self.rows.iter_mut().enumerate() {
            if let Err(err) = row.set_low() {
                warn!("keypad row {row_index} drive failed: {err}");
                continue;
            }
            Ets::delay_us(ROW_SETTLE_US);

            if pressed.is_none() {
                pressed = self
                    .cols
                    .iter()
                    .position(|col| col.is_low())
                    .and_then(|col_index| Key::from_matrix(row_index, col_index));
            }

            let _ = row.set_high();
        }
        pressed
    }
}

impl Keypad for MatrixKeypad {
    fn poll_key(&mut self) -> Option<Key> {
        let pressed = self.scan();
        let edge = pressed.filter(|key| self.held != Some(*key));
        self.held = pressed;
        edge
    }
}

struct DeepSleep {
    row_pins: [i32; 4],
    col_pins: [i32; 4],
}

impl DeepSleep {
    fn new(hardware: &HardwareConfig) -> Self {
        Self {
            row_pins: hardware.row_pins,
            col_pins: hardware.col_pins,
        }
    }

    fn crossing_lines(&self, source: &WakeSource) -> [i32; 4] {
        match source.line {
            KeypadLine::Column(_) => self.row_pins,
            KeypadLine::Row(_) => self.col_pins,
        }
    }

    /// Holds the crossing lines at the trigger level so any key on the
    /// wake line shorts it to that level.
    fn arm(&self, source: &WakeSource) -> Result<(), HardwareError> {
        let level = source.trigger.level();

        unsafe {
            for pin in self.crossing_lines(source) {
                check(sys::gpio_hold_dis(pin), "gpio_hold_dis")?;
                check(
                    sys::gpio_set_direction(pin, sys::gpio_mode_t_GPIO_MODE_OUTPUT),
                    "gpio_set_direction",
                )?;
                check(sys::gpio_set_level(pin, level as u32), "gpio_set_level")?;
                check(sys::gpio_hold_en(pin), "gpio_hold_en")?;
            }
            sys::gpio_deep_sleep_hold_en();

            match source.trigger {
                WakeTrigger::Low => {
                    check(sys::rtc_gpio_pullup_en(source.pin), "rtc_gpio_pullup_en")?;
                    check(sys::rtc_gpio_pulldown_dis(source.pin), "rtc_gpio_pulldown_dis")?;
                }
                WakeTrigger::High => {
                    check(sys::rtc_gpio_pulldown_en(source.pin), "rtc_gpio_pulldown_en")?;
                    check(sys::rtc_gpio_pullup_dis(source.pin), "rtc_gpio_pullup_dis")?;
                }
            }
            check(
                sys::esp_sleep_enable_ext0_wakeup(source.pin, level),
                "esp_sleep_enable_ext0_wakeup",
            )
        }
    }

    /// Returns the keypad lines to their scanning setup: rows driven high,
    /// columns as pulled-up inputs.
    fn disarm(&self, source: &WakeSource) {
        unsafe {
            sys::gpio_deep_sleep_hold_dis();
            for pin in self.crossing_lines(source) {
                let _ = sys::gpio_hold_dis(pin);
            }
            let _ = sys::esp_sleep_disable_wakeup_source(
                sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0,
            );

            match source.line {
                KeypadLine::Column(_) => {
                    for pin in self.row_pins {
                        let _ = sys::gpio_set_direction(pin, sys::gpio_mode_t_GPIO_MODE_OUTPUT);
                        let _ = sys::gpio_set_level(pin, 1);
                    }
                }
                KeypadLine::Row(_) => {
                    for pin in self.col_pins {
                        let _ = sys::gpio_set_direction(pin, sys::gpio_mode_t_GPIO_MODE_INPUT);
                        let _ =
                            sys::gpio_set_pull_mode(pin, sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY);
                    }
                }
            }
        }
    }
}

impl SleepControl for DeepSleep {
    fn configure_wake_source(&mut self, source: &WakeSource) -> Result<(), HardwareError> {
        if let Err(err) = self.arm(source) {
            warn!("wake source setup failed, restoring keypad lines: {err}");
            self.disarm(source);
            return Err(err);
        }

        info!(
            "ext0 wake armed on GPIO{} ({:?} level)",
            source.pin, source.trigger
        );
        Ok(())
    }

    fn release_wake_source(&mut self, source: &WakeSource) {
        self.disarm(source);
    }

    #[allow(unreachable_code)]
    fn suspend_until_wake(&mut self) -> Result<(), HardwareError> {
        info!("entering deep sleep");
        unsafe {
            sys::esp_deep_sleep_start();
        }
        Ok(())
    }
}

fn release_sleep_holds(hardware: &HardwareConfig) {
    unsafe {
        sys::gpio_deep_sleep_hold_dis();
        for pin in hardware.row_pins.into_iter().chain(hardware.col_pins) {
            let _ = sys::gpio_hold_dis(pin);
        }
    }
}

fn check(rc: sys::esp_err_t, what: &str) -> Result<(), HardwareError> {
    if rc == sys::ESP_OK {
        Ok(())
    } else {
        Err(HardwareError::Sleep(format!("{what} failed with code {rc}")))
    }
}

#[derive(Clone)]
struct EspTransport {
    timeout: Duration,
}

impl HttpTransport for EspTransport {
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let request_err = |message: String| TransportError::Request {
            url: request.url.clone(),
            message,
        };

        let http_conf = HttpClientConfiguration {
            timeout: Some(self.timeout),
            crt_bundle_attach: Some(sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection =
            EspHttpConnection::new(&http_conf).map_err(|err| request_err(format!("{err:?}")))?;
        let mut client = HttpClient::wrap(connection);

        let content_length = request.body.len().to_string();
        let mut headers: Vec<(&str, &str)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        headers.push(("Content-Length", content_length.as_str()));

        let mut outgoing = client
            .request(Method::Post, &request.url, &headers)
            .map_err(|err| request_err(format!("{err:?}")))?;
        outgoing
            .write_all(request.body.as_bytes())
            .map_err(|err| request_err(format!("{err:?}")))?;
        outgoing
            .flush()
            .map_err(|err| request_err(format!("{err:?}")))?;

        let mut response = outgoing
            .submit()
            .map_err(|err| request_err(format!("{err:?}")))?;
        let status = response.status();

        let mut body = Vec::new();
        let mut chunk = [0_u8; 512];
        loop {
            let read = response.read(&mut chunk).map_err(|err| TransportError::Body {
                url: request.url.clone(),
                message: format!("{err:?}"),
            })?;
            if read == 0 || body.len() >= MAX_HTTP_BODY {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
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
