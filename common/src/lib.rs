pub mod ability;
pub mod client;
pub mod config;
pub mod device;
pub mod endpoints;
pub mod error;
pub mod hal;
pub mod lock;
pub mod power;
pub mod signing;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use ability::AbilityController;
pub use client::{HttpRequest, HttpResponse, HttpTransport, SignedRequestClient};
pub use config::{
    CloudConfig, HardwareConfig, KeypadLine, LockConfig, NetworkConfig, RuntimeConfig,
    StatusReportConfig, WakeTrigger, DEVICE_PASSWORD,
};
pub use device::{CycleOutcome, DeviceParts, LockDevice};
pub use error::{ApiError, AuthError, ConfigError, DeviceError, HardwareError, TransportError};
pub use hal::{Keypad, LedBank, OutputPins, SleepControl};
pub use lock::{LockAction, LockEngine};
pub use power::{check_idle_timeout, PersistedLockState, PowerManager, StateStore, WakeSource};
pub use status::StatusReporter;
pub use types::{AlarmState, Key, LedPattern, LockSnapshot, LockStatus, KEYMAP};
