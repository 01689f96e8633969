// SPDX-License-Identifier: Apache-2.0

//! Comparator based frequency meter.
//!
//! The comparator turns the probe signal into edges, the capture timer stamps each edge and DMA
//! moves the stamps into a [`CaptureBuffer`] until the timer overflows. Every measurement starts in
//! [`PrecisionMode::Slow`]. If the slow window has too few edges or an edge spacing shorter than
//! the slow minimum, the same cycle retries once in [`PrecisionMode::Fast`]; whatever the fast
//! window yields is final until the next [`FrequencyMeter::start`].

use crate::{
    buffer::CaptureBuffer,
    components::CaptureHardware,
    config::{
        Config, DAC_MAX_CODE, DEFAULT_TRIGGER_V, FAST_MIN_PERIOD, FAST_PRESCALER, MCU_VREF,
        MIN_EVENTS, MIN_THRESHOLD_V, SLOW_MIN_PERIOD, SLOW_PRESCALER,
    },
    pipeline::{Acquisition, Pipeline, PipelineState, Processed},
};

/// Capture timer configuration, trading measurable range against resolution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrecisionMode {
    /// Long window, coarse ticks. Always tried first.
    #[default]
    Slow,
    /// Short window, fine ticks. Used at most once per measurement, after a slow failure.
    Fast,
}

impl PrecisionMode {
    /// Timer prescaler
    pub const fn prescaler(self) -> u32 {
        match self {
            Self::Slow => SLOW_PRESCALER,
            Self::Fast => FAST_PRESCALER,
        }
    }

    /// Shortest valid inter-edge period, in ticks
    pub const fn min_period(self) -> u16 {
        match self {
            Self::Slow => SLOW_MIN_PERIOD,
            Self::Fast => FAST_MIN_PERIOD,
        }
    }

    /// Tick rate for a timer clocked at `timer_clock_hz`
    pub const fn base_frequency_hz(self, timer_clock_hz: u32) -> u32 {
        timer_clock_hz / self.prescaler()
    }

    /// Periods dropped from the end of the averaging window.
    ///
    /// Slow mode averages one period less than it validates. The trim is part of the calibrated
    /// behaviour of the instrument and must stay.
    const fn trailing_trim(self) -> usize {
        match self {
            Self::Slow => 1,
            Self::Fast => 0,
        }
    }
}

/// Outcome of a complete measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrequencyResult {
    /// Measured frequency, Hz
    Hz(u32),
    /// Neither precision produced a usable capture
    Unmeasurable,
}

impl FrequencyResult {
    /// Raw value reported for [`FrequencyResult::Unmeasurable`]
    pub const SENTINEL: u32 = u32::MAX;

    /// Frequency in Hz, or [`Self::SENTINEL`]
    pub fn raw(self) -> u32 {
        match self {
            Self::Hz(hz) => hz,
            Self::Unmeasurable => Self::SENTINEL,
        }
    }

    /// Frequency in Hz, if measured
    pub fn hz(self) -> Option<u32> {
        match self {
            Self::Hz(hz) => Some(hz),
            Self::Unmeasurable => None,
        }
    }
}

/// Why a capture window could not be turned into a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// Fewer than [`MIN_EVENTS`] edges
    TooFewEvents(usize),
    /// An edge spacing below the mode's minimum, in ticks
    PeriodTooShort(u16),
    /// Valid periods exist but the trimmed averaging window is empty
    EmptyWindow,
}

/// Turn one capture window into a frequency.
///
/// The first two edges only let the comparator and timer settle: periods are taken between
/// consecutive edges from the third edge on. Every period is validated against the mode's
/// minimum, then the leading `count - 2 - trim` periods are averaged with integer division.
///
/// Slow mode trims one trailing period, so a slow window of exactly [`MIN_EVENTS`] edges has
/// nothing left to average. It is rejected with [`Rejection::EmptyWindow`] instead of dividing by
/// zero, and the cycle retries in fast mode like any other slow rejection.
pub fn measure(
    events: &CaptureBuffer,
    mode: PrecisionMode,
    timer_clock_hz: u32,
) -> Result<u32, Rejection> {
    let count = events.len();
    if count < MIN_EVENTS {
        return Err(Rejection::TooFewEvents(count));
    }

    if let Some(short) = events.periods(2).find(|period| *period < mode.min_period()) {
        return Err(Rejection::PeriodTooShort(short));
    }

    let window = count - 2 - mode.trailing_trim();
    if window == 0 {
        return Err(Rejection::EmptyWindow);
    }
    let sum: u32 = events.periods(2).take(window).map(u32::from).sum();
    let average = sum / window as u32;

    Ok(mode.base_frequency_hz(timer_clock_hz) / average)
}

/// DAC code that puts the comparator reference at `voltage` volts at the probe tip, or `None`
/// below [`MIN_THRESHOLD_V`].
pub fn dac_code_for(voltage: f32, main_div: f32) -> Option<u16> {
    if voltage < MIN_THRESHOLD_V {
        return None;
    }
    let code = voltage / main_div * DAC_MAX_CODE as f32 / MCU_VREF;
    Some(code.min(DAC_MAX_CODE as f32) as u16)
}

/// [`Acquisition`] strategy for the frequency meter.
#[derive(Debug, Clone)]
pub struct FrequencyCapture {
    /// Precision of the window currently armed
    mode: PrecisionMode,
    /// Trigger level applied at the start of every cycle, V
    threshold_v: f32,
    /// Capture timer input clock, Hz
    timer_clock_hz: u32,
    /// Probe attenuation
    main_div: f32,
    /// Edges of the last finished window
    events: CaptureBuffer,
}

impl FrequencyCapture {
    /// Strategy for the instrument described by `config`
    pub fn new(config: &Config) -> Self {
        Self {
            mode: PrecisionMode::Slow,
            threshold_v: DEFAULT_TRIGGER_V,
            timer_clock_hz: config.timer_clock_hz,
            main_div: config.main_div,
            events: CaptureBuffer::new(),
        }
    }

    /// Copy the finished window out of the capture hardware.
    fn harvest<H: CaptureHardware + ?Sized>(&mut self, hw: &H) {
        self.events.clear();
        for index in 0..hw.event_count() {
            let Some(tick) = hw.event(index) else {
                break;
            };
            #[cfg(feature = "trace_captures")]
            trace!("edge {}: {}", index, tick);
            if !self.events.push(tick) {
                warn!("Capture reported more edges than the buffer holds");
                break;
            }
        }
    }
}

impl<H: CaptureHardware + ?Sized> Acquisition<H> for FrequencyCapture {
    type Output = FrequencyResult;

    fn begin(&mut self, hw: &mut H) {
        if let Some(code) = dac_code_for(self.threshold_v, self.main_div) {
            hw.set_dac_code(code);
        }
        self.mode = PrecisionMode::Slow;
        hw.arm(self.mode);
    }

    fn is_complete(&self, hw: &mut H) -> bool {
        hw.is_complete()
    }

    fn process(&mut self, hw: &mut H) -> Processed<FrequencyResult> {
        self.harvest(&*hw);
        match (measure(&self.events, self.mode, self.timer_clock_hz), self.mode) {
            (Ok(hz), mode) => {
                debug!("{:?} capture: {} Hz from {} edges", mode, hz, self.events.len());
                Processed::Done(FrequencyResult::Hz(hz))
            }
            (Err(rejection), PrecisionMode::Slow) => {
                debug!("Slow capture rejected ({:?}), retrying in fast mode", rejection);
                self.mode = PrecisionMode::Fast;
                hw.arm(self.mode);
                Processed::Rearmed
            }
            (Err(rejection), PrecisionMode::Fast) => {
                warn!("Fast capture rejected ({:?}), frequency unmeasurable", rejection);
                Processed::Done(FrequencyResult::Unmeasurable)
            }
        }
    }
}

/// Frequency measurement engine: the [`Pipeline`] around [`FrequencyCapture`], plus the
/// comparator trigger level.
pub struct FrequencyMeter<H: CaptureHardware + ?Sized> {
    /// Capture/process state machine
    pipeline: Pipeline<FrequencyCapture, H>,
}

impl<H: CaptureHardware + ?Sized> FrequencyMeter<H> {
    /// Idle engine with the default trigger level
    pub fn new(config: &Config) -> Self {
        Self {
            pipeline: Pipeline::new(FrequencyCapture::new(config)),
        }
    }

    /// Discard any result and measure again from slow mode on the next poll.
    pub fn start(&mut self) {
        self.pipeline.start();
    }

    /// Advance by one scheduler tick.
    pub fn poll(&mut self, hw: &mut H) -> PipelineState {
        self.pipeline.poll(hw)
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Result of the finished cycle
    pub fn result(&self) -> Option<FrequencyResult> {
        self.pipeline.result()
    }

    /// Precision of the window armed last
    pub fn precision(&self) -> PrecisionMode {
        self.pipeline.acquisition().mode
    }

    /// Write the comparator reference for `voltage` right away. Ignored below
    /// [`MIN_THRESHOLD_V`].
    pub fn set_threshold_voltage(&mut self, hw: &mut H, voltage: f32) {
        match dac_code_for(voltage, self.pipeline.acquisition().main_div) {
            Some(code) => hw.set_dac_code(code),
            None => debug!("Ignoring trigger level {} V", voltage),
        }
    }

    /// Trigger level applied at the start of the next cycle, V
    pub fn threshold_voltage(&self) -> f32 {
        self.pipeline.acquisition().threshold_v
    }

    /// Store a new trigger level for the next cycle. Negative values are ignored.
    pub fn change_threshold_voltage(&mut self, voltage: f32) {
        if voltage < 0.0 {
            return;
        }
        self.pipeline.acquisition_mut().threshold_v = voltage;
    }

    /// Go back to [`DEFAULT_TRIGGER_V`]
    pub fn reset_threshold(&mut self) {
        self.pipeline.acquisition_mut().threshold_v = DEFAULT_TRIGGER_V;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::VecDeque;

    /// Capture hardware that replays one scripted window per arming.
    #[derive(Default)]
    pub(crate) struct ScriptedCapture {
        pub(crate) windows: VecDeque<Vec<u16>>,
        pub(crate) current: Vec<u16>,
        pub(crate) armed: Vec<PrecisionMode>,
        pub(crate) disarmed: u32,
        pub(crate) dac_codes: Vec<u16>,
        pub(crate) complete: bool,
    }

    impl ScriptedCapture {
        pub(crate) fn with_windows(windows: &[&[u16]]) -> Self {
            Self {
                windows: windows.iter().map(|w| w.to_vec()).collect(),
                ..Self::default()
            }
        }
    }

    impl CaptureHardware for ScriptedCapture {
        fn arm(&mut self, mode: PrecisionMode) {
            self.armed.push(mode);
            self.current = self.windows.pop_front().unwrap_or_default();
            self.complete = false;
        }

        fn disarm(&mut self) {
            self.disarmed += 1;
            self.complete = false;
        }

        fn is_complete(&self) -> bool {
            self.complete
        }

        fn event_count(&self) -> usize {
            self.current.len()
        }

        fn event(&self, index: usize) -> Option<u16> {
            self.current.get(index).copied()
        }

        fn set_dac_code(&mut self, code: u16) {
            self.dac_codes.push(code);
        }
    }

    fn events(ticks: &[u16]) -> CaptureBuffer {
        let mut buffer = CaptureBuffer::new();
        for tick in ticks {
            buffer.push(*tick);
        }
        buffer
    }

    /// Run one full cycle, completing every window as soon as it is armed.
    fn run_cycle(meter: &mut FrequencyMeter<ScriptedCapture>, hw: &mut ScriptedCapture) {
        for _ in 0..8 {
            if meter.poll(hw) == PipelineState::Done {
                return;
            }
            hw.complete = true;
        }
        panic!("measurement did not finish");
    }

    const TIMER_HZ: u32 = 72_000_000;

    #[rstest]
    #[case(PrecisionMode::Slow, 50, 80, 1_440_000)]
    #[case(PrecisionMode::Fast, 4, 5, 18_000_000)]
    fn precision_constants(
        #[case] mode: PrecisionMode,
        #[case] prescaler: u32,
        #[case] min_period: u16,
        #[case] base: u32,
    ) {
        assert_eq!(mode.prescaler(), prescaler);
        assert_eq!(mode.min_period(), min_period);
        assert_eq!(mode.base_frequency_hz(TIMER_HZ), base);
    }

    #[test]
    fn slow_average_drops_trailing_period() {
        // periods from the third edge: 950, 1000, 1000, 1000; slow averages the first three
        let capture = events(&[0, 50, 1000, 2000, 3000, 4000]);
        assert_eq!(measure(&capture, PrecisionMode::Slow, TIMER_HZ), Ok(1_440_000 / 983));
    }

    #[test]
    fn fast_average_uses_every_period() {
        let capture = events(&[0, 50, 1000, 2000, 3000, 4000]);
        assert_eq!(measure(&capture, PrecisionMode::Fast, TIMER_HZ), Ok(18_000_000 / 987));
    }

    #[test]
    fn settling_edges_are_ignored() {
        // first spacing is far below the slow minimum but belongs to the settling edges
        let capture = events(&[0, 1, 200, 400, 600]);
        assert_eq!(measure(&capture, PrecisionMode::Slow, TIMER_HZ), Ok(1_440_000 / 199));
    }

    #[rstest]
    #[case(&[], PrecisionMode::Slow, Rejection::TooFewEvents(0))]
    #[case(&[10, 500], PrecisionMode::Fast, Rejection::TooFewEvents(2))]
    #[case(&[0, 10, 100, 150, 300], PrecisionMode::Slow, Rejection::PeriodTooShort(50))]
    #[case(&[0, 10, 20, 23], PrecisionMode::Fast, Rejection::PeriodTooShort(3))]
    #[case(&[0, 100, 200], PrecisionMode::Slow, Rejection::EmptyWindow)]
    fn rejected_windows(
        #[case] ticks: &[u16],
        #[case] mode: PrecisionMode,
        #[case] rejection: Rejection,
    ) {
        assert_eq!(measure(&events(ticks), mode, TIMER_HZ), Err(rejection));
    }

    #[test]
    fn three_edges_are_enough_in_fast_mode() {
        let capture = events(&[0, 100, 200]);
        assert_eq!(measure(&capture, PrecisionMode::Fast, TIMER_HZ), Ok(180_000));
    }

    #[test]
    fn slow_success_finishes_without_escalation() {
        let mut hw = ScriptedCapture::with_windows(&[&[0, 50, 1000, 2000, 3000, 4000]]);
        let mut meter = FrequencyMeter::new(&Config::default());
        run_cycle(&mut meter, &mut hw);
        assert_eq!(meter.result(), Some(FrequencyResult::Hz(1464)));
        assert_eq!(hw.armed, [PrecisionMode::Slow]);
        assert_eq!(meter.precision(), PrecisionMode::Slow);
    }

    #[test]
    fn short_period_escalates_to_fast() {
        let mut hw =
            ScriptedCapture::with_windows(&[&[0, 10, 100, 150, 300], &[0, 10, 100, 150, 300]]);
        let mut meter = FrequencyMeter::new(&Config::default());
        meter.poll(&mut hw);
        hw.complete = true;
        assert_eq!(meter.poll(&mut hw), PipelineState::Capturing);
        assert_eq!(meter.precision(), PrecisionMode::Fast);
        hw.complete = true;
        assert_eq!(meter.poll(&mut hw), PipelineState::Done);
        // fast window: 90, 50, 150 → 290 / 3 = 96
        assert_eq!(meter.result(), Some(FrequencyResult::Hz(18_000_000 / 96)));
        assert_eq!(hw.armed, [PrecisionMode::Slow, PrecisionMode::Fast]);
    }

    #[test]
    fn fast_failure_is_terminal() {
        let mut hw = ScriptedCapture::with_windows(&[&[0, 5], &[0, 5]]);
        let mut meter = FrequencyMeter::new(&Config::default());
        run_cycle(&mut meter, &mut hw);
        assert_eq!(meter.result(), Some(FrequencyResult::Unmeasurable));
        assert_eq!(meter.result().map(FrequencyResult::raw), Some(0xFFFF_FFFF));
        assert_eq!(hw.armed, [PrecisionMode::Slow, PrecisionMode::Fast]);
        // nothing more happens until the next start
        assert_eq!(meter.poll(&mut hw), PipelineState::Done);
        assert_eq!(hw.armed.len(), 2);
    }

    #[test]
    fn restart_begins_in_slow_mode_again() {
        let mut hw = ScriptedCapture::with_windows(&[&[], &[]]);
        let mut meter = FrequencyMeter::new(&Config::default());
        run_cycle(&mut meter, &mut hw);
        meter.start();
        meter.poll(&mut hw);
        assert_eq!(meter.precision(), PrecisionMode::Slow);
        assert_eq!(hw.armed.last(), Some(&PrecisionMode::Slow));
    }

    #[test]
    fn every_cycle_applies_the_stored_threshold() {
        let mut hw = ScriptedCapture::default();
        let mut meter = FrequencyMeter::new(&Config::default());
        meter.change_threshold_voltage(3.3);
        meter.poll(&mut hw);
        assert_eq!(hw.dac_codes, [dac_code_for(3.3, 10.0).unwrap()]);
    }

    #[test]
    fn negative_threshold_change_is_ignored() {
        let mut meter = FrequencyMeter::<ScriptedCapture>::new(&Config::default());
        meter.change_threshold_voltage(2.0);
        meter.change_threshold_voltage(-1.0);
        assert_eq!(meter.threshold_voltage(), 2.0);
        meter.reset_threshold();
        assert_eq!(meter.threshold_voltage(), DEFAULT_TRIGGER_V);
    }

    #[test]
    fn low_threshold_is_not_written() {
        let mut hw = ScriptedCapture::default();
        let mut meter = FrequencyMeter::new(&Config::default());
        meter.set_threshold_voltage(&mut hw, 0.05);
        assert!(hw.dac_codes.is_empty());
        meter.set_threshold_voltage(&mut hw, 1.5);
        assert_eq!(hw.dac_codes, [186]);
    }

    #[rstest]
    #[case(0.099, None)]
    #[case(0.1, Some(12))]
    #[case(1.5, Some(186))]
    #[case(40.0, Some(4095))]
    #[case(100.0, Some(4095))]
    fn threshold_to_dac_code(#[case] voltage: f32, #[case] code: Option<u16>) {
        assert_eq!(dac_code_for(voltage, 10.0), code);
    }

    #[test]
    fn dac_code_is_monotonic() {
        let mut last = 0;
        let mut voltage = MIN_THRESHOLD_V;
        while voltage < 40.0 {
            let code = dac_code_for(voltage, 10.0).unwrap();
            assert!(code >= last, "{voltage} V gave {code} after {last}");
            last = code;
            voltage += 0.01;
        }
        assert_eq!(last, DAC_MAX_CODE);
    }
}
