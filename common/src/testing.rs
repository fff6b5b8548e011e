use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use crate::{
    client::{HttpRequest, HttpResponse, HttpTransport},
    config::CloudConfig,
    error::{HardwareError, TransportError},
    hal::{Keypad, OutputPins, SleepControl},
    power::{PersistedLockState, StateStore, WakeSource},
    types::Key,
};

pub fn test_cloud() -> CloudConfig {
    CloudConfig {
        base_url: "https://iot.example.com".to_string(),
        access_key: "access-1".to_string(),
        secret_key: "secret-1".to_string(),
        product_id: "prod-1".to_string(),
        device_id: "dev-1".to_string(),
        ..CloudConfig::default()
    }
}

/// Replays scripted responses in order and records every request.
/// Unscripted requests answer HTTP 200 `{"code":"200"}`.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    responses: Rc<RefCell<VecDeque<Result<HttpResponse, String>>>>,
    requests: Rc<RefCell<Vec<HttpRequest>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses.borrow_mut().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn fail(&self, message: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }

    /// `(abilityType, status)` of every ability request, in order.
    pub fn ability_calls(&self) -> Vec<(String, String)> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.url.ends_with("setAbilityStatus"))
            .filter_map(|request| {
                let body: serde_json::Value = serde_json::from_str(&request.body).ok()?;
                Some((
                    body["abilityType"].as_str()?.to_string(),
                    body["status"].as_str()?.to_string(),
                ))
            })
            .collect()
    }
}

impl HttpTransport for RecordingTransport {
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Request {
                url: request.url.clone(),
                message,
            }),
            None => Ok(HttpResponse {
                status: 200,
                body: r#"{"code":"200","data":{"appAccessToken":"tok-default"}}"#.to_string(),
            }),
        }
    }
}

#[derive(Clone, Default)]
pub struct ScriptedKeypad {
    keys: Rc<RefCell<VecDeque<Key>>>,
}

impl ScriptedKeypad {
    pub fn push_str(&self, keys: &str) {
        let mut queue = self.keys.borrow_mut();
        queue.extend(keys.chars().filter_map(Key::from_char));
    }
}

impl Keypad for ScriptedKeypad {
    fn poll_key(&mut self) -> Option<Key> {
        self.keys.borrow_mut().pop_front()
    }
}

#[derive(Clone, Default)]
pub struct RecordingPins {
    levels: Rc<RefCell<HashMap<i32, bool>>>,
}

impl RecordingPins {
    pub fn level(&self, pin: i32) -> bool {
        self.levels.borrow().get(&pin).copied().unwrap_or(false)
    }
}

impl OutputPins for RecordingPins {
    fn set_output(&mut self, pin: i32, high: bool) -> Result<(), HardwareError> {
        self.levels.borrow_mut().insert(pin, high);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Rc<RefCell<Option<PersistedLockState>>>,
    saves: Rc<RefCell<usize>>,
}

impl MemoryStore {
    pub fn with_state(state: PersistedLockState) -> Self {
        let store = Self::default();
        *store.state.borrow_mut() = Some(state);
        store
    }

    pub fn stored(&self) -> Option<PersistedLockState> {
        *self.state.borrow()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.borrow()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedLockState>, HardwareError> {
        Ok(*self.state.borrow())
    }

    fn save(&self, state: PersistedLockState) -> Result<(), HardwareError> {
        *self.state.borrow_mut() = Some(state);
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingSleep {
    configured: Rc<RefCell<Vec<WakeSource>>>,
    suspends: Rc<RefCell<usize>>,
    releases: Rc<RefCell<usize>>,
    reject_wake_setup: Rc<RefCell<bool>>,
}

impl RecordingSleep {
    /// Makes every later `configure_wake_source` fail after recording the attempt.
    pub fn reject_wake_setup(&self, reject: bool) {
        *self.reject_wake_setup.borrow_mut() = reject;
    }

    pub fn configured(&self) -> Vec<WakeSource> {
        self.configured.borrow().clone()
    }

    pub fn suspend_count(&self) -> usize {
        *self.suspends.borrow()
    }

    pub fn release_count(&self) -> usize {
        *self.releases.borrow()
    }
}

impl SleepControl for RecordingSleep {
    fn configure_wake_source(&mut self, source: &WakeSource) -> Result<(), HardwareError> {
        self.configured.borrow_mut().push(*source);
        if *self.reject_wake_setup.borrow() {
            return Err(HardwareError::Gpio {
                pin: source.pin,
                message: "wake setup rejected".to_string(),
            });
        }
        Ok(())
    }

    fn release_wake_source(&mut self, _source: &WakeSource) {
        *self.releases.borrow_mut() += 1;
    }

    fn suspend_until_wake(&mut self) -> Result<(), HardwareError> {
        *self.suspends.borrow_mut() += 1;
        Ok(())
    }
}
