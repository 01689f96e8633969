//! End-to-end runs of the instrument against scripted hardware.

use std::{cell::Cell, collections::VecDeque};

use meterprobe::{
    calibration::CalibrationState,
    components::{
        AdcCapture, CaptureHardware, CaptureStatus, Display, MillisClock, RedrawContext,
        ReferenceGenerator,
    },
    config::{Config, ADC_CHANNELS, PROBE_CAPTURED_POINTS, PROBE_HALF_PERIOD, PROBE_SAMPLE_RATE_HZ},
    frequency::{dac_code_for, FrequencyResult, PrecisionMode},
    instrument::{Instrument, InstrumentMode},
    logic_probe::SignalClassification,
    pipeline::PipelineState,
};

/// Capture chain whose windows finish as soon as they are armed.
#[derive(Default)]
struct CaptureBench {
    windows: VecDeque<Vec<u16>>,
    current: Vec<u16>,
    armed: Vec<PrecisionMode>,
    dac_codes: Vec<u16>,
}

impl CaptureHardware for CaptureBench {
    fn arm(&mut self, mode: PrecisionMode) {
        self.armed.push(mode);
        self.current = self.windows.pop_front().unwrap_or_default();
    }

    fn disarm(&mut self) {}

    fn is_complete(&self) -> bool {
        !self.armed.is_empty()
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

/// ADC plus generator. A capture records `driven` while the generator output is on (and
/// `driven` is set), `pattern` otherwise, and completes `latency` status checks after it starts.
#[derive(Default)]
struct FrontEnd {
    pattern: Vec<u16>,
    driven: Option<Vec<u16>>,
    latency: u32,
    in_flight: Option<(Vec<u16>, u32)>,
    buffer: Vec<u16>,
    done: bool,
    rate: u32,
    generator_on: bool,
    generator_restarts: u32,
    aborts: u32,
}

impl AdcCapture for FrontEnd {
    fn start_capture(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let recorded = match (&self.driven, self.generator_on) {
            (Some(driven), true) => driven.clone(),
            _ => self.pattern.clone(),
        };
        self.in_flight = Some((recorded, self.latency));
        self.done = false;
    }

    fn abort_capture(&mut self) {
        self.aborts += 1;
        self.in_flight = None;
        self.done = false;
    }

    fn status(&mut self) -> CaptureStatus {
        match self.in_flight.take() {
            Some((recorded, 0)) => {
                self.buffer = recorded;
                self.done = true;
                CaptureStatus::Done
            }
            Some((recorded, remaining)) => {
                self.in_flight = Some((recorded, remaining - 1));
                CaptureStatus::Running
            }
            None if self.done => CaptureStatus::Done,
            None => CaptureStatus::Idle,
        }
    }

    fn raw_samples(&self) -> &[u16] {
        if self.done {
            &self.buffer
        } else {
            &[]
        }
    }

    fn set_sample_rate(&mut self, hz: u32) {
        self.rate = hz;
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

impl ReferenceGenerator for FrontEnd {
    fn restart(&mut self) {
        self.generator_restarts += 1;
    }

    fn set_output_enabled(&mut self, enabled: bool) {
        self.generator_on = enabled;
    }
}

struct Clock(Cell<u32>);

impl MillisClock for Clock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

#[derive(Default)]
struct Screen(Vec<RedrawContext>);

impl Display for Screen {
    fn notify_redraw(&mut self, context: RedrawContext) {
        self.0.push(context);
    }
}

type Bench = Instrument<CaptureBench, FrontEnd, Clock, Screen>;

fn bench(capture: CaptureBench, front_end: FrontEnd) -> Bench {
    Instrument::new(
        capture,
        front_end,
        Clock(Cell::new(0)),
        Screen::default(),
        &Config::default(),
    )
}

/// Interleaved raw buffer whose probe channel alternates `high`/`low` every half period.
fn square_wave(high: u16, low: u16) -> Vec<u16> {
    (0..PROBE_CAPTURED_POINTS)
        .flat_map(|point| {
            let level = if (point / PROBE_HALF_PERIOD) % 2 == 0 {
                high
            } else {
                low
            };
            [level, 2048]
        })
        .collect()
}

fn tick_until_done(instrument: &mut Bench) {
    for _ in 0..10 {
        if instrument.tick() == PipelineState::Done {
            return;
        }
    }
    panic!("measurement did not finish");
}

#[test]
fn slow_failure_escalates_to_fast_result() {
    let capture = CaptureBench {
        windows: VecDeque::from([vec![0, 10, 100, 150, 300], vec![0, 10, 100, 150, 300]]),
        ..CaptureBench::default()
    };
    let mut instrument = bench(capture, FrontEnd::default());
    tick_until_done(&mut instrument);

    assert_eq!(instrument.frequency(), Some(FrequencyResult::Hz(18_000_000 / 96)));
    assert_eq!(instrument.precision(), PrecisionMode::Fast);
    assert_eq!(instrument.capture().armed, [PrecisionMode::Slow, PrecisionMode::Fast]);
    // trigger level written once, at the start of the cycle
    assert_eq!(instrument.capture().dac_codes, [186]);
}

#[test]
fn no_signal_reports_sentinel() {
    let mut instrument = bench(CaptureBench::default(), FrontEnd::default());
    tick_until_done(&mut instrument);
    assert_eq!(instrument.frequency(), Some(FrequencyResult::Unmeasurable));
    assert_eq!(
        instrument.frequency().map(FrequencyResult::raw),
        Some(FrequencyResult::SENTINEL)
    );
}

#[test]
fn calibrated_level_drives_next_cycle() {
    let front_end = FrontEnd {
        pattern: square_wave(300, 100),
        ..FrontEnd::default()
    };
    let mut instrument = bench(CaptureBench::default(), front_end);
    instrument.start_calibration();
    instrument.tick();
    assert_eq!(instrument.calibration_state(), CalibrationState::WaitStart);

    instrument.clock().0.set(1001);
    instrument.tick();
    assert_eq!(instrument.calibration_state(), CalibrationState::Capturing);
    for _ in 0..11 {
        instrument.tick();
    }
    assert_eq!(instrument.calibration_state(), CalibrationState::Done);

    let expected = 200.0 * Config::default().volts_per_code();
    assert!((instrument.threshold_voltage() - expected).abs() < 1e-4);
    assert_eq!(
        instrument.display().0,
        [
            RedrawContext::CalibrationWait,
            RedrawContext::CalibrationCapture,
            RedrawContext::CalibrationDone
        ]
    );

    instrument.start_measurement();
    instrument.tick();
    let code = dac_code_for(instrument.threshold_voltage(), Config::default().main_div);
    assert_eq!(instrument.capture().dac_codes.last().copied(), code);
}

#[test]
fn logic_probe_sees_open_tip() {
    let front_end = FrontEnd {
        pattern: square_wave(900, 100),
        ..FrontEnd::default()
    };
    let mut instrument = bench(CaptureBench::default(), front_end);
    instrument.set_mode(InstrumentMode::LogicProbe);
    assert!(instrument.front_end().generator_on);
    assert_eq!(instrument.front_end().sample_rate(), PROBE_SAMPLE_RATE_HZ);

    tick_until_done(&mut instrument);
    assert_eq!(instrument.signal(), Some(SignalClassification::Floating));
    assert_eq!(instrument.front_end().generator_restarts, 1);
    assert_eq!(instrument.front_end().raw_samples().len(), PROBE_CAPTURED_POINTS * ADC_CHANNELS);
    // frequency hardware left alone in probe mode
    assert!(instrument.capture().armed.is_empty());
}

#[test]
fn logic_probe_sees_static_high() {
    let front_end = FrontEnd {
        pattern: square_wave(400, 400),
        ..FrontEnd::default()
    };
    let mut instrument = bench(CaptureBench::default(), front_end);
    instrument.set_mode(InstrumentMode::LogicProbe);
    tick_until_done(&mut instrument);
    assert_eq!(instrument.signal(), Some(SignalClassification::HighLevel));

    instrument.set_mode(InstrumentMode::FrequencyMeter);
    assert!(!instrument.front_end().generator_on);
    assert_eq!(instrument.signal(), Some(SignalClassification::HighLevel));
}

#[test]
fn calibration_after_probe_mode_ignores_driven_capture() {
    let front_end = FrontEnd {
        pattern: square_wave(300, 100),
        driven: Some(square_wave(2000, 100)),
        latency: 3,
        ..FrontEnd::default()
    };
    let mut instrument = bench(CaptureBench::default(), front_end);
    instrument.set_mode(InstrumentMode::LogicProbe);
    assert_eq!(instrument.tick(), PipelineState::Capturing);
    assert_eq!(instrument.tick(), PipelineState::Capturing);

    instrument.set_mode(InstrumentMode::FrequencyMeter);
    assert_eq!(instrument.front_end().aborts, 1);
    assert!(!instrument.front_end().generator_on);

    instrument.start_calibration();
    instrument.tick();
    instrument.clock().0.set(1001);
    instrument.tick();
    for _ in 0..100 {
        if instrument.calibration_state() == CalibrationState::Done {
            break;
        }
        instrument.tick();
    }
    assert_eq!(instrument.calibration_state(), CalibrationState::Done);

    let clean = 200.0 * Config::default().volts_per_code();
    assert!(
        (instrument.threshold_voltage() - clean).abs() < 1e-4,
        "trigger {} V, clean-signal midpoint {} V",
        instrument.threshold_voltage(),
        clean
    );
}
