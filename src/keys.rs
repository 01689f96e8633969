// SPDX-License-Identifier: Apache-2.0

//! Debounced two-key input.
//!
//! Each key runs its own small state machine, sampled once per scheduler tick:
//!
//! ```text
//!  Released ──contact──► PressedWait ──still down after 50 ms──► Pressed ──900 ms from contact──► Hold
//!     ▲                       │                                     │                               │
//!     │                       └──bounced──► Released                └────────── released ───────────┤
//!     └────────── 50 ms ◄────────────────── WaitForRelease ◄────────────────────────────────────────┘
//! ```
//!
//! A press is reported when a key leaves `Pressed` for `WaitForRelease`, a hold when it leaves
//! `Pressed` for `Hold`. Releasing a held key reports nothing.

use embedded_hal::digital::InputPin;
use heapless::Vec;

use crate::{
    components::{Deadline, MillisClock},
    config::{KEYS_STARTUP_MS, KEY_HOLD_MS, KEY_PRESS_MS, KEY_RELEASE_MS},
};

/// Debounce state of one key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyState {
    /// Up
    #[default]
    Released,
    /// Contact seen, waiting for it to settle
    PressedWait,
    /// Down
    Pressed,
    /// Up again, locked until the release delay passes
    WaitForRelease,
    /// Down past the hold time
    Hold,
}

/// Which key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    /// Upper key
    Upper,
    /// Lower key, also the power key
    Lower,
}

/// What the key did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyAction {
    /// Short press, reported on release
    Press,
    /// Long press, reported while still down
    Hold,
}

/// One debounced key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyEvent {
    /// Source
    pub key: Key,
    /// Kind
    pub action: KeyAction,
}

/// A single active-high key.
struct KeyInput<P> {
    /// Input, high while pressed
    pin: P,
    /// State after the last sample
    state: KeyState,
    /// State before the last sample
    previous: KeyState,
    /// Time of first contact or of release
    since: u32,
}

impl<P: InputPin> KeyInput<P> {
    /// Key starting released
    fn new(pin: P) -> Self {
        Self {
            pin,
            state: KeyState::Released,
            previous: KeyState::Released,
            since: 0,
        }
    }

    /// Sample the pin and advance the debounce state
    fn update(&mut self, now: u32) -> Result<(), P::Error> {
        self.previous = self.state;
        let down = self.pin.is_high()?;
        let held_for = now.wrapping_sub(self.since);

        self.state = match self.state {
            KeyState::Released if down => {
                self.since = now;
                KeyState::PressedWait
            }
            KeyState::Released => KeyState::Released,
            KeyState::PressedWait if held_for > KEY_PRESS_MS => {
                if down {
                    KeyState::Pressed
                } else {
                    KeyState::Released
                }
            }
            KeyState::PressedWait => KeyState::PressedWait,
            KeyState::Pressed | KeyState::Hold if !down => {
                self.since = now;
                KeyState::WaitForRelease
            }
            KeyState::Pressed if held_for > KEY_HOLD_MS => KeyState::Hold,
            KeyState::WaitForRelease if held_for > KEY_RELEASE_MS => KeyState::Released,
            state => state,
        };
        Ok(())
    }

    /// Event produced by the last [`update`](Self::update)
    fn action(&self) -> Option<KeyAction> {
        match (self.previous, self.state) {
            (KeyState::Pressed, KeyState::WaitForRelease) => Some(KeyAction::Press),
            (KeyState::Pressed, KeyState::Hold) => Some(KeyAction::Hold),
            _ => None,
        }
    }
}

/// Upper and lower key with a power-up lockout.
///
/// Nothing is reported during the first [`KEYS_STARTUP_MS`]. The lower key doubles as the power
/// key, so if it is still down when the lockout ends it stays ignored until it has been released.
pub struct Keys<P> {
    /// Lower (power) key
    lower: KeyInput<P>,
    /// Upper key
    upper: KeyInput<P>,
    /// End of the power-up lockout
    startup: Deadline,
    /// Lockout still in force
    startup_lock: bool,
}

impl<P: InputPin> Keys<P> {
    /// Start debouncing `lower` and `upper`. The lockout runs from now.
    pub fn new<C: MillisClock + ?Sized>(lower: P, upper: P, clock: &C) -> Self {
        Self {
            lower: KeyInput::new(lower),
            upper: KeyInput::new(upper),
            startup: Deadline::arm(clock, KEYS_STARTUP_MS),
            startup_lock: true,
        }
    }

    /// Sample both keys once and return the events this tick produced.
    pub fn poll<C: MillisClock + ?Sized>(
        &mut self,
        clock: &C,
    ) -> Result<Vec<KeyEvent, 2>, P::Error> {
        let now = clock.now_ms();
        self.lower.update(now)?;
        self.upper.update(now)?;

        let mut events = Vec::new();
        if !self.startup.elapsed(clock) {
            return Ok(events);
        }
        if self.startup_lock {
            if matches!(
                self.lower.state,
                KeyState::Pressed | KeyState::Hold | KeyState::WaitForRelease
            ) {
                return Ok(events);
            }
            debug!("Key lockout over");
            self.startup_lock = false;
        }

        for (key, input) in [(Key::Lower, &self.lower), (Key::Upper, &self.upper)] {
            if let Some(action) = input.action() {
                // two keys, two slots
                let _ = events.push(KeyEvent { key, action });
            }
        }
        Ok(events)
    }

    /// Debounce state of `key`
    pub fn state(&self, key: Key) -> KeyState {
        match key {
            Key::Lower => self.lower.state,
            Key::Upper => self.upper.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction};

    struct TestClock(Cell<u32>);

    impl MillisClock for TestClock {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }

    /// Run `steps` of `(time, lower down, upper down)` and collect every event with its time.
    fn run(steps: &[(u32, bool, bool)]) -> std::vec::Vec<(u32, KeyEvent)> {
        let level = |down: bool| Transaction::get(if down { State::High } else { State::Low });
        let lower_script: std::vec::Vec<_> = steps.iter().map(|s| level(s.1)).collect();
        let upper_script: std::vec::Vec<_> = steps.iter().map(|s| level(s.2)).collect();
        let mut lower = PinMock::new(&lower_script);
        let mut upper = PinMock::new(&upper_script);

        let clock = TestClock(Cell::new(0));
        let mut keys = Keys::new(lower.clone(), upper.clone(), &clock);
        let mut seen = std::vec::Vec::new();
        for (time, _, _) in steps {
            clock.0.set(*time);
            for event in keys.poll(&clock).unwrap() {
                seen.push((*time, event));
            }
        }
        lower.done();
        upper.done();
        seen
    }

    fn event(key: Key, action: KeyAction) -> KeyEvent {
        KeyEvent { key, action }
    }

    #[test]
    fn short_press_reports_on_release() {
        let seen = run(&[
            (400, false, true),
            (451, false, true),
            (460, false, false),
            (511, false, false),
            (520, false, false),
        ]);
        assert_eq!(seen, [(460, event(Key::Upper, KeyAction::Press))]);
    }

    #[test]
    fn bounce_is_ignored() {
        let seen = run(&[(400, false, true), (451, false, false), (460, false, false)]);
        assert!(seen.is_empty());
    }

    #[test]
    fn long_press_reports_hold_once() {
        let seen = run(&[
            (400, true, false),
            (451, true, false),
            (1300, true, false),
            (1301, true, false),
            (1400, true, false),
            (1410, false, false),
            (1461, false, false),
        ]);
        assert_eq!(seen, [(1301, event(Key::Lower, KeyAction::Hold))]);
    }

    #[test]
    fn nothing_reported_during_startup() {
        let seen = run(&[(0, false, true), (51, false, true), (60, false, false)]);
        assert!(seen.is_empty());
    }

    #[test]
    fn power_key_held_through_startup_stays_locked() {
        let seen = run(&[
            (0, true, false),
            (51, true, false),
            (400, true, false),
            (1000, true, false),
            (1010, false, false),
            (1061, false, false),
            (1100, true, false),
            (1151, true, false),
            (1160, false, true),
        ]);
        assert_eq!(seen, [(1160, event(Key::Lower, KeyAction::Press))]);
    }
}
