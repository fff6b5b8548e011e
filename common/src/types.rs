use std::fmt;

use serde::{Deserialize, Serialize};

/// Key layout of the 4x4 membrane keypad, indexed `[row][column]`.
pub const KEYMAP: [[Key; 4]; 4] = [
    [Key::Digit(1), Key::Digit(2), Key::Digit(3), Key::Letter('A')],
    [Key::Digit(4), Key::Digit(5), Key::Digit(6), Key::Letter('B')],
    [Key::Digit(7), Key::Digit(8), Key::Digit(9), Key::Letter('C')],
    [Key::Clear, Key::Digit(0), Key::Submit, Key::Letter('D')],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Digit(u8),
    Letter(char),
    /// `*`
    Clear,
    /// `#`
    Submit,
}

impl Key {
    /// `None` unless `d` is a single decimal digit.
    pub fn digit(d: u8) -> Option<Self> {
        (d <= 9).then_some(Self::Digit(d))
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0'..='9' => c.to_digit(10).and_then(|d| Self::digit(d as u8)),
            'A'..='D' => Some(Self::Letter(c)),
            'a'..='d' => Some(Self::Letter(c.to_ascii_uppercase())),
            '*' => Some(Self::Clear),
            '#' => Some(Self::Submit),
            _ => None,
        }
    }

    pub fn from_matrix(row: usize, col: usize) -> Option<Self> {
        KEYMAP.get(row)?.get(col).copied()
    }

    pub fn as_char(self) -> char {
        match self {
            // Out-of-range digits have no keypad symbol.
            Self::Digit(d) => char::from_digit(u32::from(d), 10).unwrap_or('?'),
            Self::Letter(c) => c,
            Self::Clear => '*',
            Self::Submit => '#',
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockStatus {
    Unlocked,
    Locked,
    Entering,
}

impl LockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "UNLOCKED",
            Self::Locked => "LOCKED",
            Self::Entering => "ENTERING",
        }
    }

    pub fn led_pattern(self) -> LedPattern {
        match self {
            Self::Unlocked => LedPattern::GREEN,
            Self::Locked => LedPattern::RED,
            Self::Entering => LedPattern::YELLOW,
        }
    }
}

/// Levels of the three status LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedPattern {
    pub green: bool,
    pub yellow: bool,
    pub red: bool,
}

impl LedPattern {
    pub const OFF: Self = Self {
        green: false,
        yellow: false,
        red: false,
    };
    pub const GREEN: Self = Self {
        green: true,
        yellow: false,
        red: false,
    };
    pub const YELLOW: Self = Self {
        green: false,
        yellow: true,
        red: false,
    };
    pub const RED: Self = Self {
        green: false,
        yellow: false,
        red: true,
    };

    pub fn lit_count(self) -> usize {
        [self.green, self.yellow, self.red]
            .into_iter()
            .filter(|lit| *lit)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    On,
    Off,
}

impl AlarmState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn for_lock(locked: bool) -> Self {
        if locked {
            Self::On
        } else {
            Self::Off
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockSnapshot {
    pub locked: bool,
    pub status: &'static str,
    #[serde(rename = "entryLength")]
    pub entry_length: usize,
    #[serde(rename = "idleMs")]
    pub idle_ms: u64,
    #[serde(rename = "tokenHeld")]
    pub token_held: bool,
    pub leds: LedPattern,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sixteen_symbols() {
        let symbols = "0123456789ABCD*#";
        for c in symbols.chars() {
            let key = Key::from_char(c).unwrap();
            assert_eq!(key.as_char(), c);
        }
        assert_eq!(Key::from_char('x'), None);
        assert_eq!(Key::from_char('b'), Some(Key::Letter('B')));
    }

    #[test]
    fn out_of_range_digit_renders_without_panicking() {
        assert_eq!(Key::digit(7), Some(Key::Digit(7)));
        assert_eq!(Key::digit(10), None);
        assert_eq!(Key::Digit(200).as_char(), '?');
        assert_eq!(Key::Digit(255).to_string(), "?");
    }

    #[test]
    fn matrix_lookup_follows_keymap() {
        assert_eq!(Key::from_matrix(0, 0), Some(Key::Digit(1)));
        assert_eq!(Key::from_matrix(3, 0), Some(Key::Clear));
        assert_eq!(Key::from_matrix(3, 2), Some(Key::Submit));
        assert_eq!(Key::from_matrix(2, 3), Some(Key::Letter('C')));
        assert_eq!(Key::from_matrix(4, 0), None);
    }

    #[test]
    fn every_status_lights_exactly_one_led() {
        for status in [LockStatus::Unlocked, LockStatus::Locked, LockStatus::Entering] {
            assert_eq!(status.led_pattern().lit_count(), 1);
        }
        assert_eq!(LedPattern::OFF.lit_count(), 0);
    }
}
