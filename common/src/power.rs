use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::{KeypadLine, WakeTrigger},
    error::HardwareError,
    hal::{LedBank, OutputPins, SleepControl},
};

/// The only state that survives deep sleep and power loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedLockState {
    pub locked: bool,
}

pub trait StateStore {
    fn load(&self) -> Result<Option<PersistedLockState>, HardwareError>;
    fn save(&self, state: PersistedLockState) -> Result<(), HardwareError>;
}

/// A keypad line resolved to its physical pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSource {
    pub line: KeypadLine,
    pub pin: i32,
    pub trigger: WakeTrigger,
}

pub fn check_idle_timeout(now_ms: u64, last_activity_ms: u64, threshold_ms: u64) -> bool {
    now_ms.saturating_sub(last_activity_ms) >= threshold_ms
}

pub struct PowerManager<S> {
    sleep: S,
    wake: WakeSource,
    idle_threshold_ms: u64,
    last_persisted: Option<PersistedLockState>,
}

impl<S: SleepControl> PowerManager<S> {
    pub fn new(sleep: S, wake: WakeSource, idle_threshold_ms: u64) -> Self {
        Self {
            sleep,
            wake,
            idle_threshold_ms,
            last_persisted: None,
        }
    }

    /// Records a state already known to be in the store.
    pub fn mark_persisted(&mut self, state: PersistedLockState) {
        self.last_persisted = Some(state);
    }

    /// Writes the state unless the store already holds it. A failed write is
    /// retried on the next call.
    pub fn persist(
        &mut self,
        store: &impl StateStore,
        state: PersistedLockState,
    ) -> Result<bool, HardwareError> {
        if self.last_persisted == Some(state) {
            return Ok(false);
        }
        store.save(state)?;
        self.last_persisted = Some(state);
        Ok(true)
    }

    pub fn wake_source(&self) -> &WakeSource {
        &self.wake
    }

    pub fn idle_threshold_ms(&self) -> u64 {
        self.idle_threshold_ms
    }

    pub fn should_sleep(&self, now_ms: u64, last_activity_ms: u64) -> bool {
        check_idle_timeout(now_ms, last_activity_ms, self.idle_threshold_ms)
    }

    /// Persists the lock, arms the wake line, blanks the LEDs and suspends.
    /// Returns only on targets where suspension is simulated.
    pub fn enter_deep_sleep<O: OutputPins>(
        &mut self,
        leds: &mut LedBank<O>,
        store: &impl StateStore,
        state: PersistedLockState,
    ) -> Result<(), HardwareError> {
        info!(
            "entering deep sleep (locked={}, wake on gpio {} {:?})",
            state.locked, self.wake.pin, self.wake.trigger
        );

        // A failed save must not keep the device awake; the last stored value stays.
        if let Err(err) = self.persist(store, state) {
            warn!("failed to persist lock state before sleep: {err}");
        }

        self.sleep.configure_wake_source(&self.wake)?;
        if let Err(err) = leds.blank() {
            self.sleep.release_wake_source(&self.wake);
            return Err(err);
        }
        self.sleep.suspend_until_wake()
    }
}

/// Unreadable or missing state restores as unlocked.
pub fn restore_on_boot(store: &impl StateStore) -> PersistedLockState {
    match store.load() {
        Ok(Some(state)) => {
            info!("restored lock state: locked={}", state.locked);
            state
        }
        Ok(None) => {
            info!("no persisted lock state, starting unlocked");
            PersistedLockState::default()
        }
        Err(err) => {
            warn!("failed to load lock state, starting unlocked: {err}");
            PersistedLockState::default()
        }
    }
}
