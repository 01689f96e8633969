//! Firmware for the RP2040 build of the frequency meter and logic probe.
#![no_std]
#![no_main]
#![warn(missing_docs)]

use defmt::{debug, info, warn};
#[allow(unused_imports)]
use defmt_rtt as _;
#[allow(unused_imports)]
use panic_probe as _;
use rp2040_hal::{
    adc::AdcPin,
    clocks::init_clocks_and_plls,
    dma::DMAExt,
    entry,
    gpio::Pins,
    pac::{self, interrupt},
    prelude::*,
    pwm::Slices,
    Adc, Sio, Timer, Watchdog,
};

use meterprobe::{
    board::{
        arm_wake, on_capture_wrap_irq, on_edge_irq, RpCapture, RpClock, RpFrontEnd, RttDisplay,
        SignalWake, CAPTURE_TIMER, EDGE_PIN,
    },
    buffer::create_adc_buffer,
    components::{Deadline, MillisClock},
    config::{Config, DAC_MAX_CODE, DEFAULT_TRIGGER_V, PROBE_SAMPLE_RATE_HZ},
    frequency::FrequencyResult,
    instrument::{Instrument, InstrumentMode},
    interrupt::EDGE_WAKE,
    keys::{Key, KeyAction, KeyEvent, Keys},
    pipeline::PipelineState,
};

/// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
/// External high-speed crystal on the pico board is 12Mhz
pub const XOSC_FREQ_HZ: u32 = 12_000_000;
/// A finished result stays up this long before the next measurement, ms
const RESULT_HOLD_MS: u32 = 500;
/// With no signal, wait this long for a comparator edge before trying again, ms
const WAKE_TIMEOUT_MS: u32 = 2000;

/// Raised by the comparator edge interrupt while waiting for a signal
static SIGNAL_WAKE: SignalWake = SignalWake::new();

/// The concrete instrument
type Meter = Instrument<RpCapture, RpFrontEnd, RpClock, RttDisplay>;

/// Main operation loop
#[entry]
fn main() -> ! {
    info!("Meter startup");
    let mut pac = pac::Peripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let sio = Sio::new(pac.SIO);

    let clocks = init_clocks_and_plls(
        XOSC_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    let sys_clock_hz = clocks.system_clock.freq().to_Hz();
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    let clock = RpClock(Timer::new(pac.TIMER, &mut pac.RESETS, &clocks));
    // PWM slices count at the system clock
    let config = Config {
        timer_clock_hz: sys_clock_hz,
        ..Config::default()
    };

    let mut pwm_slices = Slices::new(pac.PWM, &mut pac.RESETS);

    // Capture timer: one window is a full 16-bit count
    let mut capture_timer = pwm_slices.pwm1;
    capture_timer.set_top(u16::MAX);
    capture_timer.enable_interrupt();
    let edge_pin = pins.gpio16.into_floating_input();
    debug!("critical_section: init capture timer and comparator pin");
    critical_section::with(|cs| {
        CAPTURE_TIMER.replace(cs, Some(capture_timer));
        EDGE_PIN.replace(cs, Some(edge_pin));
    });
    EDGE_WAKE.register(&SIGNAL_WAKE);

    // Trigger DAC: one PWM count per DAC code
    pwm_slices.pwm4.set_top(DAC_MAX_CODE);
    pwm_slices.pwm4.enable();
    let mut dac = pwm_slices.pwm4.channel_a;
    dac.output_to(pins.gpio8);

    // Reference generator
    let mut generator = pwm_slices.pwm3;
    generator.channel_a.output_to(pins.gpio22);

    // ADC round robin over both inputs, DMA into a static buffer
    let adc = cortex_m::singleton!(: Adc = Adc::new(pac.ADC, &mut pac.RESETS)).unwrap();
    let probe_pin = AdcPin::new(pins.gpio26.into_floating_input()).unwrap();
    let aux_pin = AdcPin::new(pins.gpio27.into_floating_input()).unwrap();
    let dma = pac.DMA.split(&mut pac.RESETS);
    let front_end = RpFrontEnd::new(
        adc,
        (probe_pin, aux_pin),
        dma.ch0,
        create_adc_buffer().unwrap(),
        generator,
        sys_clock_hz,
        PROBE_SAMPLE_RATE_HZ,
    );

    let mut keys = Keys::new(
        pins.gpio14.into_pull_down_input().into_dyn_pin(),
        pins.gpio15.into_pull_down_input().into_dyn_pin(),
        &clock,
    );
    let mut instrument = Instrument::new(
        RpCapture::new(dac),
        front_end,
        clock,
        RttDisplay,
        &config,
    );

    unsafe {
        pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0);
        pac::NVIC::unmask(pac::Interrupt::PWM_IRQ_WRAP);
    }
    info!("Startup complete, {=u32} Hz timer clock", sys_clock_hz);

    let mut last_tick = clock.now_ms();
    let mut restart_at: Option<Deadline> = None;
    loop {
        // 1 ms scheduler tick
        let now = clock.now_ms();
        if now == last_tick {
            continue;
        }
        last_tick = now;

        match keys.poll(&clock) {
            Ok(events) => {
                for event in events {
                    handle_key(&mut instrument, event);
                    EDGE_WAKE.disarm();
                    restart_at = None;
                }
            }
            Err(_) => warn!("Key read failed"),
        }

        let state = instrument.tick();
        match restart_at {
            None if state == PipelineState::Done => {
                let delay = if report(&instrument) {
                    RESULT_HOLD_MS
                } else {
                    arm_wake();
                    WAKE_TIMEOUT_MS
                };
                restart_at = Some(Deadline::arm(&clock, delay));
            }
            Some(deadline) if SIGNAL_WAKE.take() || deadline.elapsed(&clock) => {
                EDGE_WAKE.disarm();
                instrument.start_measurement();
                restart_at = None;
            }
            _ => {}
        }
    }
}

/// Map a key event onto the instrument.
fn handle_key(instrument: &mut Meter, event: KeyEvent) {
    debug!("Key {:?}", event);
    match (event.key, event.action) {
        (Key::Upper, KeyAction::Press) => instrument.set_mode(instrument.mode().toggled()),
        (Key::Upper, KeyAction::Hold) => {
            instrument.change_threshold_voltage(DEFAULT_TRIGGER_V);
            instrument.start_measurement();
        }
        (Key::Lower, KeyAction::Hold) => instrument.start_calibration(),
        (Key::Lower, KeyAction::Press) => instrument.start_measurement(),
    }
}

/// Log the finished result. Returns `false` if nothing was measured.
fn report(instrument: &Meter) -> bool {
    match instrument.mode() {
        InstrumentMode::FrequencyMeter => match instrument.frequency() {
            Some(FrequencyResult::Hz(hz)) => {
                info!(
                    "{=u32} Hz ({:?}, trigger {} V)",
                    hz,
                    instrument.precision(),
                    instrument.threshold_voltage()
                );
                true
            }
            _ => {
                info!("No signal");
                false
            }
        },
        InstrumentMode::LogicProbe => {
            if let Some(signal) = instrument.signal() {
                info!("Probe: {:?}", signal);
            }
            true
        }
    }
}

/// Comparator edge
#[interrupt]
fn IO_IRQ_BANK0() {
    on_edge_irq();
}

/// Capture window over
#[interrupt]
fn PWM_IRQ_WRAP() {
    on_capture_wrap_irq();
}
