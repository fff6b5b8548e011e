use crate::{
    config::HardwareConfig,
    error::HardwareError,
    power::WakeSource,
    types::{Key, LedPattern},
};

pub trait Keypad {
    /// Non-blocking; yields at most one newly pressed key per call.
    fn poll_key(&mut self) -> Option<Key>;
}

pub trait OutputPins {
    fn set_output(&mut self, pin: i32, high: bool) -> Result<(), HardwareError>;
}

pub trait SleepControl {
    fn configure_wake_source(&mut self, source: &WakeSource) -> Result<(), HardwareError>;

    /// Undoes an armed wake source when the device has to stay awake.
    fn release_wake_source(&mut self, _source: &WakeSource) {}

    /// Does not return on hardware: the chip resets and boots again on wake.
    fn suspend_until_wake(&mut self) -> Result<(), HardwareError>;
}

pub struct LedBank<O> {
    pins: O,
    green_pin: i32,
    yellow_pin: i32,
    red_pin: i32,
    current: Option<LedPattern>,
}

impl<O: OutputPins> LedBank<O> {
    pub fn new(pins: O, hardware: &HardwareConfig) -> Self {
        Self {
            pins,
            green_pin: hardware.green_pin,
            yellow_pin: hardware.yellow_pin,
            red_pin: hardware.red_pin,
            current: None,
        }
    }

    pub fn show(&mut self, pattern: LedPattern) -> Result<(), HardwareError> {
        if self.current == Some(pattern) {
            return Ok(());
        }

        self.pins.set_output(self.green_pin, pattern.green)?;
        self.pins.set_output(self.yellow_pin, pattern.yellow)?;
        self.pins.set_output(self.red_pin, pattern.red)?;
        self.current = Some(pattern);
        Ok(())
    }

    pub fn blank(&mut self) -> Result<(), HardwareError> {
        self.show(LedPattern::OFF)
    }

    pub fn current(&self) -> Option<LedPattern> {
        self.current
    }
}
