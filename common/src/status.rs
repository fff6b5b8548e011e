use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    client::{HttpRequest, HttpTransport},
    config::StatusReportConfig,
};

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    #[serde(rename = "isLocked")]
    is_locked: bool,
    timestamp: u64,
    #[serde(rename = "ipAddress")]
    ip_address: &'a str,
}

/// Throttled lock-state report to a plain JSON endpoint.
pub struct StatusReporter<T> {
    config: StatusReportConfig,
    device_id: String,
    ip_address: String,
    transport: T,
    last_success_ms: Option<u64>,
}

impl<T: HttpTransport> StatusReporter<T> {
    pub fn new(config: StatusReportConfig, device_id: impl Into<String>, transport: T) -> Self {
        Self {
            config,
            device_id: device_id.into(),
            ip_address: String::new(),
            transport,
            last_success_ms: None,
        }
    }

    pub fn set_ip_address(&mut self, ip_address: impl Into<String>) {
        self.ip_address = ip_address.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.endpoint.is_empty()
    }

    pub fn last_success_ms(&self) -> Option<u64> {
        self.last_success_ms
    }

    /// Only an HTTP 200 advances the throttle window.
    pub fn report(&mut self, is_locked: bool, now_ms: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }

        if let Some(last) = self.last_success_ms {
            if now_ms.saturating_sub(last) < self.config.interval_ms {
                debug!("status report throttled");
                return false;
            }
        }

        let payload = StatusPayload {
            device_id: &self.device_id,
            is_locked,
            timestamp: now_ms,
            ip_address: &self.ip_address,
        };
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to encode status report: {err}");
                return false;
            }
        };

        let request = HttpRequest::post_json(self.config.endpoint.clone(), body);
        match self.transport.post(&request) {
            Ok(response) if response.status == 200 => {
                info!("status reported (locked={is_locked})");
                self.last_success_ms = Some(now_ms);
                true
            }
            Ok(response) => {
                warn!(
                    "status report rejected with HTTP {}: {}",
                    response.status, response.body
                );
                false
            }
            Err(err) => {
                warn!("status report failed: {err}");
                false
            }
        }
    }
}
