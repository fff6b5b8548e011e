use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("failed to read response from {url}: {message}")]
    Body { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("token endpoint returned HTTP {0}")]
    HttpStatus(u16),
    #[error("token response is not valid JSON: {0}")]
    Malformed(String),
    #[error("token request denied with code {0}")]
    Denied(String),
    #[error("token response carries no appAccessToken")]
    MissingToken,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("access token unavailable: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("ability response is not valid JSON: {0}")]
    Malformed(String),
    #[error("failed to encode ability request: {0}")]
    Encode(serde_json::Error),
}

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("gpio {pin}: {message}")]
    Gpio { pin: i32, message: String },
    #[error("sleep configuration failed: {0}")]
    Sleep(String),
    #[error("state store: {0}")]
    Store(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("wake line {line} is out of range for {count} keypad {kind} pins")]
    WakeLineOutOfRange {
        kind: &'static str,
        line: u8,
        count: usize,
    },
    #[error("wake pin {0} is not a valid gpio")]
    InvalidWakePin(i32),
    #[error("wake pin {0} cannot wake the chip from deep sleep (not an RTC gpio)")]
    WakePinNotRtc(i32),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}
