// SPDX-License-Identifier: Apache-2.0

//! Hardware collaborators consumed by the measurement engines, plus the small components shared
//! between them.
//!
//! The engines never touch peripheral registers. A board layer (see `board` with the `rp2040`
//! feature) implements these traits, and the tests implement them with plain structs.

use embedded_hal::pwm::SetDutyCycle;

use crate::{config::DAC_MAX_CODE, frequency::PrecisionMode};

/// Comparator → timer → DMA edge capture chain, plus the DAC that sets the comparator reference.
pub trait CaptureHardware {
    /// Configure the timer prescaler for `mode`, clear the previous window and start capturing.
    fn arm(&mut self, mode: PrecisionMode);
    /// Stop the timer and DMA and clear any pending completion.
    fn disarm(&mut self);
    /// The capture window has ended (set by the timer-update interrupt).
    fn is_complete(&self) -> bool;
    /// Number of edges captured in the finished window.
    fn event_count(&self) -> usize;
    /// Timer count of edge `index`, `None` past [`event_count`](Self::event_count).
    fn event(&self, index: usize) -> Option<u16>;
    /// Write the comparator reference DAC.
    fn set_dac_code(&mut self, code: u16);
}

/// Progress of an ADC block capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureStatus {
    /// No capture requested
    Idle,
    /// DMA still filling the buffer
    Running,
    /// Buffer complete, [`AdcCapture::raw_samples`] is valid
    Done,
}

/// Block ADC capture into an interleaved raw buffer.
pub trait AdcCapture {
    /// Start filling a fresh buffer. Ignored while a capture is running.
    fn start_capture(&mut self);
    /// Stop a running capture and drop its partial buffer. The next
    /// [`start_capture`](Self::start_capture) always starts fresh.
    fn abort_capture(&mut self);
    /// Progress of the last requested capture.
    fn status(&mut self) -> CaptureStatus;
    /// The last completed buffer, channels interleaved. Empty before the first capture.
    fn raw_samples(&self) -> &[u16];
    /// Change the per-channel sample rate used by the next capture.
    fn set_sample_rate(&mut self, hz: u32);
    /// Per-channel sample rate currently configured, Hz
    fn sample_rate(&self) -> u32;
}

/// Square-wave reference generator driven onto the probe tip in logic probe mode.
pub trait ReferenceGenerator {
    /// Restart the generator at the beginning of its period.
    fn restart(&mut self);
    /// Connect or disconnect the generator output pin.
    fn set_output_enabled(&mut self, enabled: bool);
}

/// Monotonic millisecond counter.
pub trait MillisClock {
    /// Milliseconds since boot, wrapping
    fn now_ms(&self) -> u32;
}

/// What the screen must show after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RedrawContext {
    /// Calibration requested, notice shown while the input settles
    CalibrationWait,
    /// Calibration started its captures
    CalibrationCapture,
    /// Calibration finished, new trigger level available
    CalibrationDone,
    /// Calibration message cleared
    CalibrationIdle,
    /// The instrument switched mode
    ModeChanged,
}

/// Menu/UI collaborator.
pub trait Display {
    /// Redraw whatever `context` affects.
    fn notify_redraw(&mut self, context: RedrawContext);
}

/// A point in time on a [`MillisClock`], used for every timed wait.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline(u32);

impl Deadline {
    /// Deadline `duration_ms` from now
    pub fn arm<C: MillisClock + ?Sized>(clock: &C, duration_ms: u32) -> Self {
        Self(clock.now_ms().wrapping_add(duration_ms))
    }

    /// The clock has moved strictly past the deadline. Survives counter wrap-around as long as
    /// the wait is shorter than ~24 days.
    pub fn elapsed<C: MillisClock + ?Sized>(&self, clock: &C) -> bool {
        let ahead = clock.now_ms().wrapping_sub(self.0);
        ahead != 0 && ahead < u32::MAX / 2
    }
}

/// Filtered PWM output used as the comparator reference DAC.
///
/// The 12-bit DAC code is mapped onto the channel's duty cycle range.
pub struct PwmDac<P> {
    /// PWM channel feeding the RC filter
    pwm: P,
    /// Last code written
    code: u16,
}

impl<P: SetDutyCycle> PwmDac<P> {
    /// Wrap a PWM channel, starting at code 0
    pub fn new(pwm: P) -> Self {
        Self { pwm, code: 0 }
    }

    /// Output `code` (clamped to [`DAC_MAX_CODE`]).
    pub fn set_code(&mut self, code: u16) -> Result<(), P::Error> {
        let code = code.min(DAC_MAX_CODE);
        self.pwm.set_duty_cycle_fraction(code, DAC_MAX_CODE)?;
        self.code = code;
        Ok(())
    }

    /// Last code successfully written
    pub fn code(&self) -> u16 {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::{cell::Cell, convert::Infallible};

    struct FakeClock(Cell<u32>);

    impl MillisClock for FakeClock {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }

    struct FakePwm {
        duty: u16,
    }

    impl embedded_hal::pwm::ErrorType for FakePwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for FakePwm {
        fn max_duty_cycle(&self) -> u16 {
            8191
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    #[test]
    fn deadline_elapses_strictly_after() {
        let clock = FakeClock(Cell::new(100));
        let deadline = Deadline::arm(&clock, 50);
        clock.0.set(150);
        assert!(!deadline.elapsed(&clock));
        clock.0.set(151);
        assert!(deadline.elapsed(&clock));
    }

    #[test]
    fn deadline_survives_wraparound() {
        let clock = FakeClock(Cell::new(u32::MAX - 10));
        let deadline = Deadline::arm(&clock, 20);
        clock.0.set(5);
        assert!(!deadline.elapsed(&clock));
        clock.0.set(10);
        assert!(deadline.elapsed(&clock));
    }

    #[test]
    fn pwm_dac_scales_and_clamps() {
        let mut dac = PwmDac::new(FakePwm { duty: 0 });
        dac.set_code(4095).unwrap();
        assert_eq!(dac.pwm.duty, 8191);
        dac.set_code(9000).unwrap();
        assert_eq!(dac.code(), DAC_MAX_CODE);
        dac.set_code(0).unwrap();
        assert_eq!(dac.pwm.duty, 0);
    }
}
