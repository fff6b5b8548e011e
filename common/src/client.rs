use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::CloudConfig,
    endpoints::{
        API_SUCCESS_CODE, CONTENT_TYPE_JSON, HEADER_ACCESS_KEY, HEADER_APP_ACCESS_TOKEN,
        HEADER_CONTENT_TYPE, HEADER_NONCE, HEADER_PRODUCT_ID, HEADER_SIGN, HEADER_TIMESTAMP,
        HEADER_TRACE_ID, HEADER_VERSION, PATH_ACCESS_TOKEN, PATH_SET_ABILITY_STATUS,
    },
    error::{ApiError, AuthError, TransportError},
    signing::{epoch_millis, trace_id, SignedRequest},
};

/// Backend codes that mean the access token was not accepted.
const AUTH_FAILURE_CODES: &[&str] = &["401", "403"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![(
                HEADER_CONTENT_TYPE.to_string(),
                CONTENT_TYPE_JSON.to_string(),
            )],
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking HTTP POST. The control loop stalls for the whole round-trip.
pub trait HttpTransport {
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct AccessCredential {
    app_access_token: String,
}

impl AccessCredential {
    pub fn is_empty(&self) -> bool {
        self.app_access_token.is_empty()
    }

    pub fn token(&self) -> &str {
        &self.app_access_token
    }

    fn clear(&mut self) {
        self.app_access_token.clear();
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    data: Option<Value>,
}

impl ApiEnvelope {
    fn code(&self) -> String {
        match &self.code {
            Value::String(code) => code.clone(),
            Value::Number(code) => code.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AbilityStatusBody<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    #[serde(rename = "abilityType")]
    ability_type: &'a str,
    status: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
enum AbilityOutcome {
    Accepted,
    AuthRejected,
    Rejected,
}

pub struct SignedRequestClient<T> {
    cloud: CloudConfig,
    transport: T,
    credential: AccessCredential,
}

impl<T: HttpTransport> SignedRequestClient<T> {
    pub fn new(cloud: CloudConfig, transport: T) -> Self {
        Self {
            cloud,
            transport,
            credential: AccessCredential::default(),
        }
    }

    pub fn credential(&self) -> &AccessCredential {
        &self.credential
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Drops the cached token so the next call acquires a fresh one.
    pub fn forget_token(&mut self) {
        if !self.credential.is_empty() {
            debug!("discarding access token {}", redact(self.credential.token()));
        }
        self.credential.clear();
    }

    pub fn acquire_access_token(&mut self) -> Result<(), AuthError> {
        let signed = SignedRequest::token(&self.cloud, epoch_millis());
        let request = self.signed_request(PATH_ACCESS_TOKEN, &signed, None);

        let response = self.transport.post(&request)?;
        debug!("token request returned HTTP {}", response.status);

        if response.status != 200 {
            warn!("token request failed with HTTP {}", response.status);
            return Err(AuthError::HttpStatus(response.status));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&response.body)
            .map_err(|err| AuthError::Malformed(err.to_string()))?;

        let code = envelope.code();
        if code != API_SUCCESS_CODE {
            warn!("token request denied with code `{code}`");
            return Err(AuthError::Denied(code));
        }

        let token = envelope
            .data
            .as_ref()
            .and_then(|data| data.get("appAccessToken"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        self.credential.app_access_token = token.to_string();
        info!("access token acquired ({})", redact(token));
        Ok(())
    }

    /// Sets one device ability. `Ok(false)` means the backend answered but
    /// did not accept the change.
    pub fn call_ability(&mut self, ability_type: &str, status: &str) -> Result<bool, ApiError> {
        if self.credential.is_empty() {
            self.acquire_access_token()?;
        }

        match self.send_ability(ability_type, status)? {
            AbilityOutcome::Accepted => Ok(true),
            AbilityOutcome::AuthRejected if self.cloud.refresh_token_on_auth_failure => {
                warn!("{ability_type}: access token rejected, re-acquiring once");
                self.credential.clear();
                self.acquire_access_token()?;
                Ok(self.send_ability(ability_type, status)? == AbilityOutcome::Accepted)
            }
            AbilityOutcome::AuthRejected | AbilityOutcome::Rejected => Ok(false),
        }
    }

    fn send_ability(&self, ability_type: &str, status: &str) -> Result<AbilityOutcome, ApiError> {
        let body = serde_json::to_string(&AbilityStatusBody {
            device_id: &self.cloud.device_id,
            channel_id: &self.cloud.channel_id,
            ability_type,
            status,
        })
        .map_err(ApiError::Encode)?;

        let token = self.credential.token();
        let signed = SignedRequest::ability(&self.cloud, token, epoch_millis(), body);
        let request = self.signed_request(PATH_SET_ABILITY_STATUS, &signed, Some(token));

        let response = self.transport.post(&request)?;
        if matches!(response.status, 401 | 403) {
            return Ok(AbilityOutcome::AuthRejected);
        }

        let envelope: ApiEnvelope = serde_json::from_str(&response.body)
            .map_err(|err| ApiError::Malformed(err.to_string()))?;
        let code = envelope.code();

        if response.status == 200 && code == API_SUCCESS_CODE {
            debug!("{ability_type}={status} accepted");
            return Ok(AbilityOutcome::Accepted);
        }

        warn!(
            "{ability_type}={status} rejected (HTTP {}, code `{code}`)",
            response.status
        );
        if AUTH_FAILURE_CODES.contains(&code.as_str()) {
            Ok(AbilityOutcome::AuthRejected)
        } else {
            Ok(AbilityOutcome::Rejected)
        }
    }

    fn signed_request(
        &self,
        path: &str,
        signed: &SignedRequest,
        token: Option<&str>,
    ) -> HttpRequest {
        let mut request =
            HttpRequest::post_json(format!("{}{path}", self.cloud.base_url), signed.body.clone())
                .header(HEADER_VERSION, self.cloud.api_version.clone())
                .header(HEADER_ACCESS_KEY, self.cloud.access_key.clone());

        if let Some(token) = token {
            request = request.header(HEADER_APP_ACCESS_TOKEN, token);
        }

        request
            .header(HEADER_TIMESTAMP, signed.timestamp.clone())
            .header(HEADER_NONCE, signed.nonce.clone())
            .header(HEADER_TRACE_ID, trace_id())
            .header(HEADER_PRODUCT_ID, self.cloud.product_id.clone())
            .header(HEADER_SIGN, signed.signature.clone())
    }
}

fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}***")
}
