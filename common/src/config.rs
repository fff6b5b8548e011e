use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, power::WakeSource};

/// Compile-time device password. Never serialized or stored on the device.
pub const DEVICE_PASSWORD: &str = match option_env!("LOCK_PASSWORD") {
    Some(password) => password,
    None => "1234",
};

/// ESP32 pads routed to the RTC domain; only these can serve as an ext0 wake source.
pub const RTC_WAKE_PINS: [i32; 18] = [
    0, 2, 4, 12, 13, 14, 15, 25, 26, 27, 32, 33, 34, 35, 36, 37, 38, 39,
];

fn default_password() -> String {
    DEVICE_PASSWORD.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(skip, default = "default_password")]
    pub password: String,
    pub max_entry_len: usize,
    pub entry_timeout_ms: u64,
    pub idle_sleep_timeout_ms: u64,
    pub debounce_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            password: default_password(),
            max_entry_len: 16,
            entry_timeout_ms: 30_000,
            idle_sleep_timeout_ms: 60_000,
            debounce_ms: 100,
        }
    }
}

impl LockConfig {
    pub fn sanitize(&mut self) {
        self.max_entry_len = self.max_entry_len.clamp(1, 64);
        self.entry_timeout_ms = self.entry_timeout_ms.max(1_000);
        self.idle_sleep_timeout_ms = self.idle_sleep_timeout_ms.max(5_000);
        self.debounce_ms = self.debounce_ms.clamp(10, 1_000);
    }

    /// Upper bound of the entry buffer; never shorter than the password itself.
    pub fn entry_capacity(&self) -> usize {
        self.max_entry_len.max(self.password.chars().count())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub base_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub product_id: String,
    pub device_id: String,
    pub channel_id: String,
    pub api_version: String,
    pub refresh_token_on_auth_failure: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            product_id: String::new(),
            device_id: String::new(),
            channel_id: "0".to_string(),
            api_version: "v1".to_string(),
            refresh_token_on_auth_failure: true,
        }
    }
}

impl CloudConfig {
    pub fn sanitize(&mut self) {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        self.base_url = trimmed;
        if self.channel_id.trim().is_empty() {
            self.channel_id = "0".to_string();
        }
        if self.api_version.trim().is_empty() {
            self.api_version = "v1".to_string();
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
            && !self.access_key.is_empty()
            && !self.secret_key.is_empty()
            && !self.device_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReportConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub interval_ms: u64,
}

impl Default for StatusReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::new(),
            interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum KeypadLine {
    Row(u8),
    Column(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeTrigger {
    Low,
    High,
}

impl WakeTrigger {
    pub fn level(self) -> i32 {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeSourceConfig {
    pub line: KeypadLine,
    pub trigger: WakeTrigger,
}

impl Default for WakeSourceConfig {
    fn default() -> Self {
        // Columns idle high through pull-ups; a press pulls one low while rows are held low.
        Self {
            line: KeypadLine::Column(0),
            trigger: WakeTrigger::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareConfig {
    pub green_pin: i32,
    pub yellow_pin: i32,
    pub red_pin: i32,
    pub row_pins: [i32; 4],
    pub col_pins: [i32; 4],
    #[serde(default)]
    pub wake: WakeSourceConfig,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            green_pin: 27,
            yellow_pin: 14,
            red_pin: 12,
            row_pins: [16, 17, 18, 19],
            col_pins: [26, 25, 33, 32],
            wake: WakeSourceConfig::default(),
        }
    }
}

impl HardwareConfig {
    /// Maps the configured keypad line onto its physical pin.
    pub fn resolve_wake_source(&self) -> Result<WakeSource, ConfigError> {
        let (kind, pins, index) = match self.wake.line {
            KeypadLine::Row(index) => ("row", &self.row_pins, index),
            KeypadLine::Column(index) => ("column", &self.col_pins, index),
        };

        let pin = *pins
            .get(usize::from(index))
            .ok_or(ConfigError::WakeLineOutOfRange {
                kind,
                line: index,
                count: pins.len(),
            })?;

        if pin < 0 {
            return Err(ConfigError::InvalidWakePin(pin));
        }
        if !RTC_WAKE_PINS.contains(&pin) {
            return Err(ConfigError::WakePinNotRtc(pin));
        }

        Ok(WakeSource {
            line: self.wake.line,
            pin,
            trigger: self.wake.trigger,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub lock: LockConfig,
    pub cloud: CloudConfig,
    #[serde(default)]
    pub status: StatusReportConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.lock.sanitize();
        self.cloud.sanitize();
        self.status.interval_ms = self.status.interval_ms.max(1_000);
        self.network.connect_timeout_ms = self.network.connect_timeout_ms.max(1_000);
    }

    /// Fills unset credentials from values baked in at build time.
    pub fn with_build_defaults(mut self) -> Self {
        fill_from_build(&mut self.network.wifi_ssid, option_env!("WIFI_SSID"));
        fill_from_build(&mut self.network.wifi_pass, option_env!("WIFI_PASS"));
        fill_from_build(&mut self.cloud.base_url, option_env!("CLOUD_BASE_URL"));
        fill_from_build(&mut self.cloud.access_key, option_env!("CLOUD_ACCESS_KEY"));
        fill_from_build(&mut self.cloud.secret_key, option_env!("CLOUD_SECRET_KEY"));
        fill_from_build(&mut self.cloud.product_id, option_env!("CLOUD_PRODUCT_ID"));
        fill_from_build(&mut self.cloud.device_id, option_env!("CLOUD_DEVICE_ID"));
        fill_from_build(&mut self.status.endpoint, option_env!("STATUS_ENDPOINT"));
        self.sanitize();
        self
    }
}

fn fill_from_build(field: &mut String, value: Option<&str>) {
    if field.is_empty() {
        if let Some(value) = value {
            *field = value.to_string();
        }
    }
}
