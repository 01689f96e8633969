// SPDX-License-Identifier: Apache-2.0

//! Mode ownership and the per-tick scheduler body.
//!
//! The capture timer, DMA channel, comparator and DAC belong to exactly one engine at a time.
//! [`Instrument`] owns every collaborator and lends each one to the engine of the active mode.

use crate::{
    calibration::{CalibrationController, CalibrationState},
    components::{
        AdcCapture, CaptureHardware, Display, MillisClock, RedrawContext, ReferenceGenerator,
    },
    config::{Config, PROBE_SAMPLE_RATE_HZ},
    frequency::{FrequencyMeter, FrequencyResult, PrecisionMode},
    logic_probe::{LogicProbe, SignalClassification},
    pipeline::PipelineState,
};

/// Active instrument function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InstrumentMode {
    /// Comparator frequency meter, with trigger calibration
    #[default]
    FrequencyMeter,
    /// ADC logic probe
    LogicProbe,
}

impl InstrumentMode {
    /// The other mode
    pub fn toggled(self) -> Self {
        match self {
            Self::FrequencyMeter => Self::LogicProbe,
            Self::LogicProbe => Self::FrequencyMeter,
        }
    }
}

/// The measurement core of the instrument.
///
/// - `C`: comparator capture chain and DAC
/// - `A`: ADC plus reference generator (the probe front end)
/// - `K`: millisecond clock
/// - `D`: menu/UI
pub struct Instrument<C, A, K, D>
where
    C: CaptureHardware,
    A: AdcCapture + ReferenceGenerator,
    K: MillisClock,
    D: Display,
{
    /// Comparator capture chain, lent to the frequency meter
    capture: C,
    /// ADC and generator, lent to calibration and the logic probe
    front_end: A,
    /// Millisecond clock
    clock: K,
    /// Menu/UI
    display: D,
    /// Active mode
    mode: InstrumentMode,
    /// Frequency engine
    meter: FrequencyMeter<C>,
    /// Trigger level calibration, runs alongside the frequency engine
    calibration: CalibrationController,
    /// Logic probe engine
    probe: LogicProbe<A>,
}

impl<C, A, K, D> Instrument<C, A, K, D>
where
    C: CaptureHardware,
    A: AdcCapture + ReferenceGenerator,
    K: MillisClock,
    D: Display,
{
    /// Take ownership of the collaborators and enter frequency meter mode.
    pub fn new(capture: C, front_end: A, clock: K, display: D, config: &Config) -> Self {
        let mut instrument = Self {
            capture,
            front_end,
            clock,
            display,
            mode: InstrumentMode::FrequencyMeter,
            meter: FrequencyMeter::new(config),
            calibration: CalibrationController::new(config),
            probe: LogicProbe::new(),
        };
        instrument.front_end.set_output_enabled(false);
        instrument.enter(InstrumentMode::FrequencyMeter);
        instrument
    }

    /// Active mode
    pub fn mode(&self) -> InstrumentMode {
        self.mode
    }

    /// Switch function. The outgoing engine releases the hardware before the new one may arm it.
    pub fn set_mode(&mut self, mode: InstrumentMode) {
        if mode == self.mode {
            return;
        }
        self.leave(self.mode);
        self.enter(mode);
        info!("Mode {:?}", mode);
        self.display.notify_redraw(RedrawContext::ModeChanged);
    }

    /// Quiesce the engine of `mode`. Nothing it armed is left running.
    fn leave(&mut self, mode: InstrumentMode) {
        match mode {
            InstrumentMode::FrequencyMeter => {
                self.capture.disarm();
                if self.calibration.state() == CalibrationState::Capturing {
                    self.front_end.abort_capture();
                }
                self.calibration.cancel();
            }
            InstrumentMode::LogicProbe => {
                if self.probe.state() == PipelineState::Capturing {
                    debug!("Leaving logic probe mid-capture, aborting ADC");
                    self.front_end.abort_capture();
                    self.probe.start();
                }
                self.front_end.set_output_enabled(false);
            }
        }
    }

    /// Prepare the hardware for `mode` and start its first cycle.
    fn enter(&mut self, mode: InstrumentMode) {
        self.mode = mode;
        match mode {
            InstrumentMode::FrequencyMeter => {
                self.meter.reset_threshold();
                self.meter.start();
            }
            InstrumentMode::LogicProbe => {
                self.front_end.set_sample_rate(PROBE_SAMPLE_RATE_HZ);
                self.front_end.set_output_enabled(true);
                self.probe.start();
            }
        }
    }

    /// Discard the current result and measure again.
    ///
    /// A frequency window or ADC capture still in flight is stopped first, so a late completion
    /// cannot be mistaken for the new cycle's.
    pub fn start_measurement(&mut self) {
        match self.mode {
            InstrumentMode::FrequencyMeter => {
                if self.meter.state() == PipelineState::Capturing {
                    debug!("Restart during capture, disarming");
                    self.capture.disarm();
                }
                self.meter.start();
            }
            InstrumentMode::LogicProbe => {
                if self.probe.state() == PipelineState::Capturing {
                    self.front_end.abort_capture();
                }
                self.probe.start();
            }
        }
    }

    /// Begin trigger level calibration. Only meaningful in frequency meter mode.
    pub fn start_calibration(&mut self) {
        match self.mode {
            InstrumentMode::FrequencyMeter => self.calibration.begin(),
            InstrumentMode::LogicProbe => warn!("Calibration requested in logic probe mode"),
        }
    }

    /// One scheduler tick: poll the active engine. Returns its pipeline state.
    pub fn tick(&mut self) -> PipelineState {
        match self.mode {
            InstrumentMode::FrequencyMeter => {
                let state = self.meter.poll(&mut self.capture);
                if let Some(level) =
                    self.calibration
                        .poll(&mut self.front_end, &self.clock, &mut self.display)
                {
                    self.meter.change_threshold_voltage(level);
                }
                state
            }
            InstrumentMode::LogicProbe => self.probe.poll(&mut self.front_end),
        }
    }

    /// Result of the last finished frequency measurement
    pub fn frequency(&self) -> Option<FrequencyResult> {
        self.meter.result()
    }

    /// Precision of the frequency window armed last
    pub fn precision(&self) -> PrecisionMode {
        self.meter.precision()
    }

    /// Trigger level used by the next frequency measurement, V
    pub fn threshold_voltage(&self) -> f32 {
        self.meter.threshold_voltage()
    }

    /// Store a new trigger level. Negative values are ignored.
    pub fn change_threshold_voltage(&mut self, voltage: f32) {
        self.meter.change_threshold_voltage(voltage);
    }

    /// Classification of the last finished logic probe capture
    pub fn signal(&self) -> Option<SignalClassification> {
        self.probe.result()
    }

    /// Calibration progress
    pub fn calibration_state(&self) -> CalibrationState {
        self.calibration.state()
    }

    /// Comparator capture chain
    pub fn capture(&self) -> &C {
        &self.capture
    }

    /// Probe front end
    pub fn front_end(&self) -> &A {
        &self.front_end
    }

    /// Clock
    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Menu/UI
    pub fn display(&self) -> &D {
        &self.display
    }
}
