//! # Button Decoder
//!
//! Turns the stream of repeated button frames into operator actions.
//!
//! The panel sends the code of a held button over and over and never sends a
//! release. Each code therefore runs its own state machine:
//!
//! ```text
//! Released --code--> Pressed   (emit once)
//! Pressed  --code, held >= hold_delay--> Holding
//! Holding  --code, >= hold_interval since last emit--> Holding (emit, repeatable only)
//! Pressed | Holding --silence > release_timeout--> Released (no emit)
//! ```
//!
//! Release is found by [`ButtonDecoder::sweep`], which the reader calls
//! periodically.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ButtonConfig;

/// Camera the operator is looking through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraMode {
    Day,
    Night,
}

impl CameraMode {
    /// Key used in the calibration file
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraMode::Day => "day",
            CameraMode::Night => "night",
        }
    }
}

/// Logical action bound to a panel button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ZoomIn,
    ZoomOut,
    /// Toggle the reticle lock
    ReticleToggle,
    SwitchCamera,
    /// Fire the rangefinder
    Laser,
}

impl Action {
    /// Whether holding the button repeats the action
    pub fn is_repeatable(&self) -> bool {
        matches!(self, Action::ZoomIn | Action::ZoomOut)
    }
}

/// Static code -> (action, camera hint) table
pub const COMMAND_TABLE: [(u16, Action, Option<CameraMode>); 8] = [
    (0x0032, Action::ZoomIn, Some(CameraMode::Day)),
    (0x0033, Action::ZoomIn, Some(CameraMode::Night)),
    (0x0034, Action::ZoomOut, Some(CameraMode::Day)),
    (0x0035, Action::ZoomOut, Some(CameraMode::Night)),
    (0x0036, Action::ReticleToggle, None),
    (0x0040, Action::SwitchCamera, Some(CameraMode::Night)),
    (0x0041, Action::SwitchCamera, Some(CameraMode::Day)),
    (0x0042, Action::Laser, None),
];

/// Look up a button code
pub fn lookup(code: u16) -> Option<(Action, Option<CameraMode>)> {
    COMMAND_TABLE
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|&(_, action, mode)| (action, mode))
}

/// Extract the trailing big-endian code from a button frame payload
///
/// Payloads shorter than two bytes are left-padded with zeros.
pub fn trailing_code(data: &[u8]) -> u16 {
    match data {
        [] => 0,
        [lo] => u16::from(*lo),
        [.., hi, lo] => u16::from_be_bytes([*hi, *lo]),
    }
}

/// Action emitted by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub action: Action,
    pub mode: Option<CameraMode>,
    /// `false` for a hold repeat
    pub first_press: bool,
}

/// Per-code press state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    pub is_pressed: bool,
    pub press_start_time: Instant,
    pub hold_started: bool,
    pub last_emit_time: Instant,
    /// Last frame of this code seen, debounced or not
    pub last_message_time: Instant,
    /// Last frame that got past the debounce
    pub last_accepted_time: Instant,
}

impl ButtonState {
    fn pressed_at(now: Instant) -> Self {
        Self {
            is_pressed: true,
            press_start_time: now,
            hold_started: false,
            last_emit_time: now,
            last_message_time: now,
            last_accepted_time: now,
        }
    }
}

/// Button timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonTiming {
    /// Same-code frames closer than this to the last accepted frame are ignored
    /// for hold timing; they still count as liveness
    pub debounce: Duration,
    pub hold_delay: Duration,
    pub hold_interval: Duration,
    pub release_timeout: Duration,
}

impl From<&ButtonConfig> for ButtonTiming {
    fn from(config: &ButtonConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            hold_delay: Duration::from_millis(config.hold_delay_ms),
            hold_interval: Duration::from_millis(config.hold_interval_ms),
            release_timeout: Duration::from_millis(config.release_timeout_ms),
        }
    }
}

impl Default for ButtonTiming {
    fn default() -> Self {
        Self::from(&ButtonConfig::default())
    }
}

/// Button state machines keyed by raw code
#[derive(Debug)]
pub struct ButtonDecoder {
    timing: ButtonTiming,
    states: HashMap<u16, ButtonState>,
}

impl ButtonDecoder {
    pub fn new(timing: ButtonTiming) -> Self {
        Self {
            timing,
            states: HashMap::new(),
        }
    }

    /// State for `code`, if it has ever been pressed
    pub fn state(&self, code: u16) -> Option<&ButtonState> {
        self.states.get(&code)
    }

    /// Handle a raw button frame payload
    pub fn handle_frame(&mut self, data: &[u8], now: Instant) -> Option<ButtonEvent> {
        self.handle_code(trailing_code(data), now)
    }

    /// Handle one observed button code
    ///
    /// # Returns
    ///
    /// The action to perform, if this observation emits one. Unknown codes
    /// never emit.
    pub fn handle_code(&mut self, code: u16, now: Instant) -> Option<ButtonEvent> {
        let Some((action, mode)) = lookup(code) else {
            debug!("Unmapped button code 0x{:04X}", code);
            return None;
        };

        let timing = self.timing;
        let pressed = self.states.get(&code).is_some_and(|s| s.is_pressed);
        if !pressed {
            self.states.insert(code, ButtonState::pressed_at(now));
            debug!("Button 0x{:04X} pressed -> {:?} ({:?})", code, action, mode);
            return Some(ButtonEvent {
                action,
                mode,
                first_press: true,
            });
        }
        let state = self.states.get_mut(&code)?;
        state.last_message_time = now;

        if now.saturating_duration_since(state.last_accepted_time) < timing.debounce {
            trace!("Debounced button 0x{:04X}", code);
            return None;
        }
        state.last_accepted_time = now;

        if !state.hold_started
            && now.saturating_duration_since(state.press_start_time) >= timing.hold_delay
        {
            state.hold_started = true;
            debug!("Button 0x{:04X} held", code);
        }

        if state.hold_started
            && now.saturating_duration_since(state.last_emit_time) >= timing.hold_interval
        {
            state.last_emit_time = now;
            if action.is_repeatable() {
                return Some(ButtonEvent {
                    action,
                    mode,
                    first_press: false,
                });
            }
        }

        None
    }

    /// Release every button whose frames stopped arriving
    ///
    /// Releases are silent: nothing is emitted.
    ///
    /// # Returns
    ///
    /// The codes released by this sweep
    pub fn sweep(&mut self, now: Instant) -> Vec<u16> {
        let timeout = self.timing.release_timeout;
        let mut released = Vec::new();

        for (&code, state) in self.states.iter_mut() {
            if state.is_pressed && now.saturating_duration_since(state.last_message_time) > timeout {
                state.is_pressed = false;
                state.hold_started = false;
                released.push(code);
                debug!("Button 0x{:04X} released", code);
            }
        }

        released
    }
}

impl Default for ButtonDecoder {
    fn default() -> Self {
        Self::new(ButtonTiming::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_trailing_code() {
        assert_eq!(trailing_code(&[]), 0);
        assert_eq!(trailing_code(&[0x32]), 0x0032);
        assert_eq!(trailing_code(&[0xFF, 0xEE, 0x00, 0x41]), 0x0041);
    }

    #[test]
    fn test_lookup_table() {
        assert_eq!(lookup(0x0032), Some((Action::ZoomIn, Some(CameraMode::Day))));
        assert_eq!(lookup(0x0035), Some((Action::ZoomOut, Some(CameraMode::Night))));
        assert_eq!(lookup(0x0036), Some((Action::ReticleToggle, None)));
        assert_eq!(lookup(0x0040), Some((Action::SwitchCamera, Some(CameraMode::Night))));
        assert_eq!(lookup(0x0041), Some((Action::SwitchCamera, Some(CameraMode::Day))));
        assert_eq!(lookup(0x0042), Some((Action::Laser, None)));
        assert_eq!(lookup(0x0099), None);
    }

    #[test]
    fn test_zoom_hold_scenario() {
        let start = Instant::now();
        let mut decoder = ButtonDecoder::default();
        let mut emitted = Vec::new();

        for step in 0..=26 {
            let t = ms(step * 50);
            if let Some(event) = decoder.handle_code(0x0032, start + t) {
                emitted.push((t, event.first_press));
            }
        }

        assert_eq!(emitted, vec![(ms(0), true), (ms(1000), false), (ms(1200), false)]);
    }

    #[test]
    fn test_silent_release_after_timeout() {
        let start = Instant::now();
        let mut decoder = ButtonDecoder::default();

        assert!(decoder.handle_code(0x0034, start).is_some());
        assert!(decoder.handle_code(0x0034, start + ms(50)).is_none());

        // 150 ms of silence is not yet a release
        assert!(decoder.sweep(start + ms(200)).is_empty());
        assert_eq!(decoder.sweep(start + ms(201)), vec![0x0034]);
        assert!(!decoder.state(0x0034).unwrap().is_pressed);

        // Next frame is a fresh press
        let event = decoder.handle_code(0x0034, start + ms(250)).unwrap();
        assert!(event.first_press);
    }

    #[test]
    fn test_momentary_actions_do_not_repeat() {
        for code in [0x0036, 0x0040, 0x0041, 0x0042] {
            let start = Instant::now();
            let mut decoder = ButtonDecoder::default();
            let mut count = 0;
            for step in 0..60 {
                if decoder.handle_code(code, start + ms(step * 50)).is_some() {
                    count += 1;
                }
            }
            assert_eq!(count, 1, "code 0x{:04X}", code);
            assert!(decoder.state(code).unwrap().hold_started);
        }
    }

    #[test]
    fn test_debounce_ignores_close_frames() {
        let start = Instant::now();
        let mut decoder = ButtonDecoder::default();
        decoder.handle_code(0x0032, start);
        decoder.handle_code(0x0032, start + ms(10));
        assert_eq!(decoder.state(0x0032).unwrap().last_accepted_time, start);

        decoder.handle_code(0x0032, start + ms(30));
        assert_eq!(decoder.state(0x0032).unwrap().last_accepted_time, start + ms(30));
    }

    #[test]
    fn test_debounced_frames_keep_button_alive() {
        let timing = ButtonTiming {
            debounce: ms(30),
            hold_delay: ms(1000),
            hold_interval: ms(200),
            release_timeout: ms(150),
        };
        let start = Instant::now();
        let mut decoder = ButtonDecoder::new(timing);
        decoder.handle_code(0x0032, start);

        // Frames every 10 ms: two of every three fall inside the debounce window.
        for step in 1..=40 {
            let now = start + ms(step * 10);
            decoder.handle_code(0x0032, now);
            assert!(decoder.sweep(now).is_empty(), "released at {} ms", step * 10);
        }
        assert_eq!(decoder.state(0x0032).unwrap().last_message_time, start + ms(400));
        assert!(decoder.state(0x0032).unwrap().is_pressed);
    }

    #[test]
    fn test_unmapped_code_is_ignored() {
        let mut decoder = ButtonDecoder::default();
        assert!(decoder.handle_frame(&[0x00, 0x77], Instant::now()).is_none());
        assert!(decoder.state(0x0077).is_none());
    }

    #[test]
    fn test_codes_are_independent() {
        let start = Instant::now();
        let mut decoder = ButtonDecoder::default();
        assert!(decoder.handle_code(0x0032, start).is_some());
        assert!(decoder.handle_code(0x0034, start + ms(10)).is_some());
        assert!(decoder.handle_code(0x0032, start + ms(50)).is_none());
    }

    #[test]
    fn test_event_carries_mode_hint() {
        let mut decoder = ButtonDecoder::default();
        let event = decoder.handle_frame(&[0x01, 0x02, 0x00, 0x33], Instant::now()).unwrap();
        assert_eq!(event.action, Action::ZoomIn);
        assert_eq!(event.mode, Some(CameraMode::Night));
    }
}
