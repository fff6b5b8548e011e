use log::{info, warn};

use crate::{
    ability::AbilityController,
    client::{HttpTransport, SignedRequestClient},
    config::RuntimeConfig,
    error::{DeviceError, HardwareError},
    hal::{Keypad, LedBank, OutputPins, SleepControl},
    lock::{LockAction, LockEngine},
    power::{restore_on_boot, PowerManager, StateStore},
    status::StatusReporter,
    types::{Key, LockSnapshot},
};

/// Target-specific collaborators handed to [`LockDevice::boot`].
pub struct DeviceParts<K, O, S, P, T> {
    pub keypad: K,
    pub pins: O,
    pub sleep: S,
    pub store: P,
    pub transport: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    Key(Key),
    /// Sleep was simulated and the device is running again.
    Woke,
}

pub struct LockDevice<K, O, S, P, T> {
    engine: LockEngine,
    keypad: K,
    leds: LedBank<O>,
    power: PowerManager<S>,
    store: P,
    abilities: AbilityController<T>,
    reporter: StatusReporter<T>,
    cloud_configured: bool,
    resume_pending: bool,
}

impl<K, O, S, P, T> LockDevice<K, O, S, P, T>
where
    K: Keypad,
    O: OutputPins,
    S: SleepControl,
    P: StateStore,
    T: HttpTransport + Clone,
{
    pub fn boot(
        config: &RuntimeConfig,
        parts: DeviceParts<K, O, S, P, T>,
        now_ms: u64,
    ) -> Result<Self, DeviceError> {
        let wake = config.hardware.resolve_wake_source()?;
        let persisted = restore_on_boot(&parts.store);
        let engine = LockEngine::new(config.lock.clone(), persisted, now_ms);

        let mut power = PowerManager::new(parts.sleep, wake, config.lock.idle_sleep_timeout_ms);
        power.mark_persisted(persisted);

        let mut leds = LedBank::new(parts.pins, &config.hardware);
        leds.show(engine.led_pattern())?;

        let cloud_configured = config.cloud.is_configured();
        if !cloud_configured {
            warn!("cloud credentials missing, alarm toggles disabled");
        }

        let client = SignedRequestClient::new(config.cloud.clone(), parts.transport.clone());
        let reporter = StatusReporter::new(
            config.status.clone(),
            config.cloud.device_id.clone(),
            parts.transport,
        );

        info!(
            "lock ready: {} (sleep after {} ms idle)",
            engine.status().as_str(),
            config.lock.idle_sleep_timeout_ms
        );

        Ok(Self {
            engine,
            keypad: parts.keypad,
            leds,
            power,
            store: parts.store,
            abilities: AbilityController::new(client),
            reporter,
            cloud_configured,
            resume_pending: false,
        })
    }

    pub fn engine(&self) -> &LockEngine {
        &self.engine
    }

    pub fn set_ip_address(&mut self, ip_address: impl Into<String>) {
        self.reporter.set_ip_address(ip_address);
    }

    pub fn run_cycle(&mut self, now_ms: u64) -> Result<CycleOutcome, HardwareError> {
        if self.resume_pending {
            self.resume_pending = false;
            self.engine.reset_after_wake(now_ms);
        }

        if self.power.should_sleep(now_ms, self.engine.last_activity_ms()) {
            if let Err(err) = self.sleep() {
                // Stay awake; the next attempt waits out a full idle window.
                self.engine.restart_idle_window(now_ms);
                warn!(
                    "deep sleep aborted, retrying after {} ms idle: {err}",
                    self.power.idle_threshold_ms()
                );
                return Err(err);
            }
            return Ok(CycleOutcome::Woke);
        }

        if self.engine.tick(now_ms) {
            self.leds.show(self.engine.led_pattern())?;
        }

        let Some(key) = self.keypad.poll_key() else {
            return Ok(CycleOutcome::Idle);
        };

        info!("key {key}");
        for action in self.engine.handle_key(key, now_ms) {
            self.apply(action);
        }
        self.leds.show(self.engine.led_pattern())?;
        self.reporter.report(self.engine.is_locked(), now_ms);

        Ok(CycleOutcome::Key(key))
    }

    pub fn snapshot(&self, now_ms: u64) -> LockSnapshot {
        LockSnapshot {
            locked: self.engine.is_locked(),
            status: self.engine.status().as_str(),
            entry_length: self.engine.entered_password().chars().count(),
            idle_ms: now_ms.saturating_sub(self.engine.last_activity_ms()),
            token_held: !self.abilities.client().credential().is_empty(),
            leds: self.engine.led_pattern(),
        }
    }

    fn apply(&mut self, action: LockAction) {
        match action {
            LockAction::ToggleAlarms(state) => {
                if !self.cloud_configured {
                    warn!("skipping alarms {}: cloud not configured", state.as_str());
                } else if !self.abilities.toggle_alarms(state) {
                    warn!("alarm toggle {} incomplete", state.as_str());
                }
            }
            LockAction::Persist(state) => {
                if let Err(err) = self.power.persist(&self.store, state) {
                    warn!("failed to persist lock state: {err}");
                }
            }
        }
    }

    /// On hardware the suspend never returns. When it does, the device
    /// comes back the way a fresh boot would.
    fn sleep(&mut self) -> Result<(), HardwareError> {
        self.power.enter_deep_sleep(
            &mut self.leds,
            &self.store,
            self.engine.persisted_state(),
        )?;

        let restored = restore_on_boot(&self.store);
        self.power.mark_persisted(restored);
        self.engine = LockEngine::new(self.engine.config().clone(), restored, 0);
        // RAM does not survive real deep sleep, and neither does the token.
        self.abilities.forget_token();
        self.resume_pending = true;
        self.leds.show(self.engine.led_pattern())?;
        info!("woke up: {}", self.engine.status().as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::{KeypadLine, WakeSourceConfig, WakeTrigger},
        error::ConfigError,
        power::PersistedLockState,
        testing::{
            test_cloud, MemoryStore, RecordingPins, RecordingSleep, RecordingTransport,
            ScriptedKeypad,
        },
        types::LedPattern,
    };

    type TestDevice =
        LockDevice<ScriptedKeypad, RecordingPins, RecordingSleep, MemoryStore, RecordingTransport>;

    struct Rig {
        keypad: ScriptedKeypad,
        pins: RecordingPins,
        sleep: RecordingSleep,
        store: MemoryStore,
        transport: RecordingTransport,
    }

    impl Rig {
        fn new(store: MemoryStore) -> Self {
            Self {
                keypad: ScriptedKeypad::default(),
                pins: RecordingPins::default(),
                sleep: RecordingSleep::default(),
                store,
                transport: RecordingTransport::new(),
            }
        }

        fn parts(
            &self,
        ) -> DeviceParts<ScriptedKeypad, RecordingPins, RecordingSleep, MemoryStore, RecordingTransport>
        {
            DeviceParts {
                keypad: self.keypad.clone(),
                pins: self.pins.clone(),
                sleep: self.sleep.clone(),
                store: self.store.clone(),
                transport: self.transport.clone(),
            }
        }
    }

    fn config() -> RuntimeConfig {
        let mut config = RuntimeConfig {
            cloud: test_cloud(),
            ..RuntimeConfig::default()
        };
        config.lock.password = "1234".to_string();
        config.status.endpoint = "https://status.example.com/report".to_string();
        config
    }

    fn boot(rig: &Rig) -> TestDevice {
        LockDevice::boot(&config(), rig.parts(), 0).unwrap()
    }

    /// Runs one cycle per queued key, 100 ms apart, starting at `start_ms`.
    fn drain(device: &mut TestDevice, start_ms: u64) -> u64 {
        let mut now = start_ms;
        while let CycleOutcome::Key(_) = device.run_cycle(now).unwrap() {
            now += 100;
        }
        now
    }

    #[test]
    fn boot_restores_lock_and_lights_red() {
        let rig = Rig::new(MemoryStore::with_state(PersistedLockState { locked: true }));
        let device = boot(&rig);

        assert!(device.engine().is_locked());
        assert!(rig.pins.level(12));
        assert!(!rig.pins.level(27));
    }

    #[test]
    fn correct_code_locks_arms_persists_and_reports() {
        let rig = Rig::new(MemoryStore::default());
        let mut device = boot(&rig);

        rig.keypad.push_str("1234#");
        drain(&mut device, 1_000);

        assert!(device.engine().is_locked());
        assert_eq!(rig.store.stored(), Some(PersistedLockState { locked: true }));
        assert!(rig.pins.level(12));
        assert!(!rig.pins.level(14));

        let abilities: Vec<String> = rig
            .transport
            .ability_calls()
            .into_iter()
            .map(|(ability, status)| format!("{ability}={status}"))
            .collect();
        assert_eq!(
            abilities,
            vec![
                "motionDetect=off",
                "linkDevAlarm=on",
                "linkageWhiteLight=on"
            ]
        );

        let reports: Vec<_> = rig
            .transport
            .requests()
            .into_iter()
            .filter(|request| request.url == "https://status.example.com/report")
            .collect();
        assert_eq!(reports.len(), 1, "throttled to one report");
        assert!(!reports[0].body.contains("1234"));
    }

    #[test]
    fn wrong_code_makes_no_ability_calls() {
        let rig = Rig::new(MemoryStore::default());
        let mut device = boot(&rig);

        rig.keypad.push_str("9999#");
        drain(&mut device, 1_000);

        assert!(!device.engine().is_locked());
        assert!(rig.transport.ability_calls().is_empty());
        assert_eq!(rig.store.save_count(), 0);
    }

    #[test]
    fn entering_shows_yellow() {
        let rig = Rig::new(MemoryStore::default());
        let mut device = boot(&rig);

        rig.keypad.push_str("12");
        drain(&mut device, 1_000);

        assert!(rig.pins.level(14));
        assert!(!rig.pins.level(27));
        assert_eq!(device.snapshot(1_500).leds, LedPattern::YELLOW);
    }

    #[test]
    fn stale_entry_is_cleared_by_the_cycle() {
        let rig = Rig::new(MemoryStore::with_state(PersistedLockState { locked: true }));
        let mut device = boot(&rig);

        rig.keypad.push_str("12");
        drain(&mut device, 1_000);
        assert_eq!(device.run_cycle(31_200).unwrap(), CycleOutcome::Idle);

        assert_eq!(device.engine().entered_password(), "");
        assert!(rig.pins.level(12));
    }

    #[test]
    fn idle_device_sleeps_and_wakes_with_empty_buffer() {
        let rig = Rig::new(MemoryStore::default());
        let mut device = boot(&rig);

        rig.keypad.push_str("1234#12");
        let now = drain(&mut device, 1_000);

        let outcome = device.run_cycle(now + 60_000).unwrap();

        assert_eq!(outcome, CycleOutcome::Woke);
        assert_eq!(rig.sleep.suspend_count(), 1);
        assert_eq!(rig.sleep.configured()[0].pin, 26);
        assert!(device.engine().is_locked());
        assert_eq!(device.engine().entered_password(), "");
        assert!(rig.pins.level(12));

        let after_wake = now + 600_000;
        assert_eq!(device.run_cycle(after_wake).unwrap(), CycleOutcome::Idle);
        assert_eq!(rig.sleep.suspend_count(), 1);
        assert_eq!(device.snapshot(after_wake).idle_ms, 0);
    }

    #[test]
    fn failed_sleep_waits_a_full_idle_window_before_retrying() {
        let rig = Rig::new(MemoryStore::default());
        rig.sleep.reject_wake_setup(true);
        let mut device = boot(&rig);

        let mut errors = 0;
        for step in 0..50u64 {
            if device.run_cycle(60_000 + step * 100).is_err() {
                errors += 1;
            }
        }

        assert_eq!(errors, 1);
        assert_eq!(rig.sleep.configured().len(), 1);
        assert_eq!(rig.sleep.suspend_count(), 0);
        assert_eq!(rig.store.save_count(), 0);
        assert!(rig.pins.level(27), "stays awake with the status LED lit");

        assert_eq!(device.run_cycle(119_999).unwrap(), CycleOutcome::Idle);
        assert!(device.run_cycle(120_000).is_err());
        assert_eq!(rig.sleep.configured().len(), 2);

        rig.sleep.reject_wake_setup(false);
        assert_eq!(device.run_cycle(180_000).unwrap(), CycleOutcome::Woke);
        assert_eq!(rig.sleep.suspend_count(), 1);
    }

    #[test]
    fn wake_drops_the_access_token() {
        let rig = Rig::new(MemoryStore::default());
        let mut device = boot(&rig);

        rig.keypad.push_str("1234#");
        let now = drain(&mut device, 1_000);
        assert!(device.snapshot(now).token_held);

        assert_eq!(device.run_cycle(now + 60_000).unwrap(), CycleOutcome::Woke);
        assert!(!device.snapshot(now + 60_000).token_held);

        rig.keypad.push_str("1234#");
        drain(&mut device, now + 61_000);
        let token_requests = rig
            .transport
            .requests()
            .into_iter()
            .filter(|request| request.url.ends_with("getAppAccessToken"))
            .count();
        assert_eq!(token_requests, 2);
    }

    #[test]
    fn snapshot_reports_token_and_entry_length() {
        let rig = Rig::new(MemoryStore::default());
        let mut device = boot(&rig);

        let before = device.snapshot(0);
        assert!(!before.token_held);
        assert_eq!(before.status, "UNLOCKED");

        rig.keypad.push_str("1234#56");
        drain(&mut device, 1_000);

        let after = device.snapshot(2_000);
        assert!(after.token_held);
        assert_eq!(after.status, "ENTERING");
        assert_eq!(after.entry_length, 2);
        assert_eq!(after.idle_ms, 400);
    }

    #[test]
    fn unconfigured_cloud_still_toggles_lock() {
        let rig = Rig::new(MemoryStore::default());
        let mut config = config();
        config.cloud.secret_key.clear();
        let mut device = LockDevice::boot(&config, rig.parts(), 0).unwrap();

        rig.keypad.push_str("1234#");
        drain(&mut device, 1_000);

        assert!(device.engine().is_locked());
        assert!(rig.transport.ability_calls().is_empty());
    }

    #[test]
    fn invalid_wake_line_fails_boot() {
        let rig = Rig::new(MemoryStore::default());
        let mut config = config();
        config.hardware.wake = WakeSourceConfig {
            line: KeypadLine::Row(7),
            trigger: WakeTrigger::Low,
        };

        let err = LockDevice::boot(&config, rig.parts(), 0).err().unwrap();
        assert!(matches!(
            err,
            DeviceError::Config(ConfigError::WakeLineOutOfRange { line: 7, .. })
        ));
    }

    #[test]
    fn non_rtc_wake_pin_fails_boot() {
        let rig = Rig::new(MemoryStore::default());
        let mut config = config();
        config.hardware.wake = WakeSourceConfig {
            line: KeypadLine::Row(0),
            trigger: WakeTrigger::Low,
        };

        let err = LockDevice::boot(&config, rig.parts(), 0).err().unwrap();
        assert!(matches!(
            err,
            DeviceError::Config(ConfigError::WakePinNotRtc(16))
        ));
    }
}
