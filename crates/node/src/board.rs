//! Actuator board: irrigation relay, grow lamp and the device's own
//! automatic mode. Mock implementation; state changes are logged.

use crate::command::Key;

/// Automatic mode opens the relay below this humidity (percent)...
const AUTO_OPEN_BELOW: f64 = 50.0;
/// ...and closes it again at or above this one.
const AUTO_CLOSE_AT: f64 = 60.0;

#[derive(Debug, Default)]
pub(crate) struct ActuatorBoard {
    pub(crate) relay: bool,
    pub(crate) lamp: bool,
    pub(crate) auto: bool,
}

impl ActuatorBoard {
    pub(crate) fn new() -> Self {
        tracing::info!("[mock-board] actuator board initialised (no hardware), all off");
        Self::default()
    }

    /// Apply one decoded command key. Manual keys leave automatic mode.
    pub(crate) fn apply(&mut self, key: Key) {
        match key {
            Key::AutoOn => self.set_auto(true),
            Key::AutoOff => self.set_auto(false),
            Key::IrrigationOn | Key::IrrigationOff => {
                self.set_auto(false);
                self.set_relay(key == Key::IrrigationOn);
            }
            Key::LampOn | Key::LampOff => {
                self.set_auto(false);
                self.set_lamp(key == Key::LampOn);
            }
        }
    }

    /// Hysteresis control, only while in automatic mode.
    pub(crate) fn auto_step(&mut self, humidity: f64) {
        if !self.auto {
            return;
        }
        if !self.relay && humidity < AUTO_OPEN_BELOW {
            self.set_relay(true);
        } else if self.relay && humidity >= AUTO_CLOSE_AT {
            self.set_relay(false);
        }
    }

    fn set_relay(&mut self, on: bool) {
        if self.relay != on {
            self.relay = on;
            tracing::info!("[mock-board] irrigation relay {}", if on { "ON" } else { "OFF" });
        }
    }

    fn set_lamp(&mut self, on: bool) {
        if self.lamp != on {
            self.lamp = on;
            tracing::info!("[mock-board] grow lamp {}", if on { "ON" } else { "OFF" });
        }
    }

    fn set_auto(&mut self, on: bool) {
        if self.auto != on {
            self.auto = on;
            tracing::info!("[mock-board] automatic mode {}", if on { "ON" } else { "OFF" });
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_starts_all_off() {
        let board = ActuatorBoard::new();
        assert!(!board.relay && !board.lamp && !board.auto);
    }

    #[test]
    fn manual_irrigation_leaves_auto() {
        let mut board = ActuatorBoard::new();
        board.apply(Key::AutoOn);
        board.apply(Key::IrrigationOn);
        assert!(board.relay);
        assert!(!board.auto);
        board.apply(Key::IrrigationOff);
        assert!(!board.relay);
    }

    #[test]
    fn lamp_switch() {
        let mut board = ActuatorBoard::new();
        board.apply(Key::LampOn);
        assert!(board.lamp);
        board.apply(Key::LampOff);
        assert!(!board.lamp);
    }

    #[test]
    fn auto_mode_hysteresis() {
        let mut board = ActuatorBoard::new();
        board.apply(Key::AutoOn);

        board.auto_step(55.0);
        assert!(!board.relay, "between thresholds, stays closed");
        board.auto_step(49.9);
        assert!(board.relay);
        board.auto_step(55.0);
        assert!(board.relay, "between thresholds, stays open");
        board.auto_step(60.0);
        assert!(!board.relay);
    }

    #[test]
    fn auto_step_ignored_in_manual_mode() {
        let mut board = ActuatorBoard::new();
        board.auto_step(10.0);
        assert!(!board.relay);
    }
}
