use log::{debug, info, warn};

use crate::{
    config::LockConfig,
    power::PersistedLockState,
    types::{AlarmState, Key, LedPattern, LockStatus},
};

/// Side effects requested by the engine and carried out by the device loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    ToggleAlarms(AlarmState),
    Persist(PersistedLockState),
}

#[derive(Debug, Clone)]
pub struct LockEngine {
    config: LockConfig,
    locked: bool,
    entered: String,
    last_activity_ms: u64,
    last_input_ms: u64,
}

impl LockEngine {
    pub fn new(config: LockConfig, persisted: PersistedLockState, now_ms: u64) -> Self {
        Self {
            config,
            locked: persisted.locked,
            entered: String::new(),
            last_activity_ms: now_ms,
            last_input_ms: now_ms,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn entered_password(&self) -> &str {
        &self.entered
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn status(&self) -> LockStatus {
        if !self.entered.is_empty() {
            LockStatus::Entering
        } else if self.locked {
            LockStatus::Locked
        } else {
            LockStatus::Unlocked
        }
    }

    pub fn led_pattern(&self) -> LedPattern {
        self.status().led_pattern()
    }

    pub fn persisted_state(&self) -> PersistedLockState {
        PersistedLockState {
            locked: self.locked,
        }
    }

    /// Clears a stale entry. Returns true when something was discarded.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.entered.is_empty()
            || now_ms.saturating_sub(self.last_input_ms) <= self.config.entry_timeout_ms
        {
            return false;
        }

        debug!(
            "password entry timed out after {} ms",
            now_ms.saturating_sub(self.last_input_ms)
        );
        self.entered.clear();
        true
    }

    pub fn handle_key(&mut self, key: Key, now_ms: u64) -> Vec<LockAction> {
        self.tick(now_ms);
        self.last_activity_ms = now_ms;

        match key {
            Key::Clear => {
                self.entered.clear();
                Vec::new()
            }
            Key::Submit => self.submit(),
            Key::Digit(_) | Key::Letter(_) => {
                self.append(key, now_ms);
                Vec::new()
            }
        }
    }

    /// Volatile state after a wake: empty buffer, fresh inactivity window.
    pub fn reset_after_wake(&mut self, now_ms: u64) {
        self.entered.clear();
        self.last_activity_ms = now_ms;
        self.last_input_ms = now_ms;
    }

    /// Pushes the idle deadline out without touching the entry buffer.
    pub fn restart_idle_window(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    fn append(&mut self, key: Key, now_ms: u64) {
        if self.entered.chars().count() >= self.config.entry_capacity() {
            warn!("entry buffer full, dropping key");
            return;
        }
        self.entered.push(key.as_char());
        self.last_input_ms = now_ms;
    }

    fn submit(&mut self) -> Vec<LockAction> {
        let matched = self.entered == self.config.password;
        self.entered.clear();

        if !matched {
            info!("wrong password");
            return Vec::new();
        }

        self.locked = !self.locked;
        info!("{}", if self.locked { "locked" } else { "unlocked" });
        vec![
            LockAction::ToggleAlarms(AlarmState::for_lock(self.locked)),
            LockAction::Persist(self.persisted_state()),
        ]
    }
}
