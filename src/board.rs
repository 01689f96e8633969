// SPDX-License-Identifier: Apache-2.0

//! RP2040 implementations of the hardware collaborators.
//!
//! | Function            | Peripheral                                                    |
//! |---------------------|---------------------------------------------------------------|
//! | Capture timer       | PWM slice 1, free running, wrap interrupt ends the window     |
//! | Comparator edges    | GPIO16 rising-edge interrupt, stamps the slice 1 counter       |
//! | Trigger DAC         | PWM slice 4 channel A on GPIO8, RC filtered                    |
//! | Reference generator | PWM slice 3 channel A on GPIO22                                |
//! | ADC                 | GPIO26 (probe) and GPIO27, round robin, DMA channel 0          |
//! | Keys                | GPIO14 (lower) and GPIO15 (upper), active high                 |
//!
//! The interrupt bodies live here; the `#[interrupt]` handlers in the binary only forward to
//! [`on_edge_irq`] and [`on_capture_wrap_irq`].

use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, Ordering},
};
use critical_section::Mutex;
use embedded_hal::pwm::SetDutyCycle;
use rp2040_hal::{
    adc::{AdcFifo, AdcPin, DmaReadTarget},
    dma::{single_buffer, Channel, CH0},
    gpio::{
        bank0::{Gpio16, Gpio26, Gpio27},
        DynPinId, FunctionSioInput, Interrupt, Pin, PullDown, PullNone,
    },
    pwm::{self, FreeRunning, Pwm1, Pwm3, Pwm4, Slice},
    Adc, Timer,
};

use crate::{
    components::{
        AdcCapture, CaptureHardware, CaptureStatus, Display, MillisClock, PwmDac, RedrawContext,
        ReferenceGenerator,
    },
    config::{ADC_BUFFER_SIZE, ADC_CHANNELS, PROBE_GENERATOR_HZ},
    frequency::PrecisionMode,
    interrupt::{
        finish_window, record_edge, reset_window, WakeHandler, CAPTURE_DONE, CAPTURE_EDGES,
        EDGE_WAKE,
    },
};

/// Comparator output
pub type EdgePin = Pin<Gpio16, FunctionSioInput, PullNone>;
/// Free-running slice used as the capture timer
pub type CaptureTimer = Slice<Pwm1, FreeRunning>;
/// PWM channel feeding the trigger DAC filter
pub type DacChannel = pwm::Channel<Slice<Pwm4, FreeRunning>, pwm::A>;
/// Probe tip ADC input
pub type ProbePin = AdcPin<Pin<Gpio26, FunctionSioInput, PullNone>>;
/// Second, interleaved ADC input
pub type AuxPin = AdcPin<Pin<Gpio27, FunctionSioInput, PullNone>>;
/// Debounced key input
pub type KeyPin = Pin<DynPinId, FunctionSioInput, PullDown>;
/// Raw interleaved ADC buffer
pub type AdcBuffer = &'static mut [u16; ADC_BUFFER_SIZE];

/// ADC clock feeding the conversion pacer, Hz
const ADC_CLOCK_HZ: u32 = 48_000_000;
/// Integer divider of the reference generator slice
const GENERATOR_DIV: u8 = 10;

/// Comparator pin, shared with the edge interrupt
pub static EDGE_PIN: Mutex<RefCell<Option<EdgePin>>> = Mutex::new(RefCell::new(None));
/// Capture timer, shared with the wrap interrupt
pub static CAPTURE_TIMER: Mutex<RefCell<Option<CaptureTimer>>> = Mutex::new(RefCell::new(None));
/// A capture window is open: edges are stamped instead of waking
static WINDOW_OPEN: AtomicBool = AtomicBool::new(false);

/// GPIO bank 0 interrupt body.
pub fn on_edge_irq() {
    critical_section::with(|cs| {
        let mut pin = EDGE_PIN.borrow_ref_mut(cs);
        let Some(pin) = pin.as_mut() else {
            return;
        };
        if !pin.interrupt_status(Interrupt::EdgeHigh) {
            return;
        }
        pin.clear_interrupt(Interrupt::EdgeHigh);

        if WINDOW_OPEN.load(Ordering::Acquire) {
            if let Some(timer) = CAPTURE_TIMER.borrow_ref(cs).as_ref() {
                record_edge(timer.get_counter());
            }
        } else {
            // one shot: the source disarms before its handler runs
            pin.set_interrupt_enabled(Interrupt::EdgeHigh, false);
            EDGE_WAKE.on_edge();
        }
    });
}

/// PWM wrap interrupt body: the capture timer has run a full window.
pub fn on_capture_wrap_irq() {
    let ended = critical_section::with(|cs| {
        let mut timer = CAPTURE_TIMER.borrow_ref_mut(cs);
        match timer.as_mut() {
            Some(timer) if timer.has_overflown() => {
                timer.disable();
                timer.clear_interrupt();
                true
            }
            _ => false,
        }
    });
    if ended {
        WINDOW_OPEN.store(false, Ordering::Release);
        finish_window();
    }
}

/// Arm the comparator pin as a one-shot wake source.
pub fn arm_wake() {
    EDGE_WAKE.arm();
    critical_section::with(|cs| {
        if let Some(pin) = EDGE_PIN.borrow_ref_mut(cs).as_mut() {
            pin.clear_interrupt(Interrupt::EdgeHigh);
            pin.set_interrupt_enabled(Interrupt::EdgeHigh, true);
        }
    });
}

/// Wake handler that latches "signal present" for the main loop.
#[derive(Debug, Default)]
pub struct SignalWake(AtomicBool);

impl SignalWake {
    /// Not triggered
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Consume the latched wake, if any
    pub fn take(&self) -> bool {
        let seen = self.0.load(Ordering::Acquire);
        if seen {
            self.0.store(false, Ordering::Release);
        }
        seen
    }
}

impl WakeHandler for SignalWake {
    fn on_edge(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Comparator → PWM counter capture chain plus the trigger DAC.
///
/// [`EDGE_PIN`] and [`CAPTURE_TIMER`] must be populated before the first arm.
pub struct RpCapture {
    /// Trigger reference
    dac: PwmDac<DacChannel>,
}

impl RpCapture {
    /// Drive the trigger DAC from `channel` (its slice top must be 4095)
    pub fn new(channel: DacChannel) -> Self {
        Self {
            dac: PwmDac::new(channel),
        }
    }
}

impl CaptureHardware for RpCapture {
    fn arm(&mut self, mode: PrecisionMode) {
        reset_window();
        critical_section::with(|cs| {
            let mut timer = CAPTURE_TIMER.borrow_ref_mut(cs);
            let Some(timer) = timer.as_mut() else {
                warn!("Capture timer missing, window not armed");
                return;
            };
            timer.disable();
            timer.set_counter(0);
            timer.set_div_int(u8::try_from(mode.prescaler()).unwrap_or(u8::MAX));
            timer.set_div_frac(0);
            timer.clear_interrupt();
            if let Some(pin) = EDGE_PIN.borrow_ref_mut(cs).as_mut() {
                pin.clear_interrupt(Interrupt::EdgeHigh);
                pin.set_interrupt_enabled(Interrupt::EdgeHigh, true);
            }
            WINDOW_OPEN.store(true, Ordering::Release);
            timer.enable();
        });
    }

    fn disarm(&mut self) {
        critical_section::with(|cs| {
            if let Some(timer) = CAPTURE_TIMER.borrow_ref_mut(cs).as_mut() {
                timer.disable();
                timer.clear_interrupt();
            }
            if let Some(pin) = EDGE_PIN.borrow_ref_mut(cs).as_mut() {
                pin.set_interrupt_enabled(Interrupt::EdgeHigh, EDGE_WAKE.is_armed());
            }
        });
        WINDOW_OPEN.store(false, Ordering::Release);
        CAPTURE_DONE.clear();
    }

    fn is_complete(&self) -> bool {
        CAPTURE_DONE.is_complete()
    }

    fn event_count(&self) -> usize {
        CAPTURE_DONE.event_count()
    }

    fn event(&self, index: usize) -> Option<u16> {
        if index >= CAPTURE_DONE.event_count() {
            return None;
        }
        critical_section::with(|cs| CAPTURE_EDGES.borrow_ref(cs).as_slice().get(index).copied())
    }

    fn set_dac_code(&mut self, code: u16) {
        if self.dac.set_code(code).is_err() {
            warn!("Trigger DAC write failed");
        }
    }
}

/// Where the ADC DMA buffer currently lives.
enum AdcDma {
    /// Buffer readable, channel free
    Parked(Channel<CH0>, AdcBuffer),
    /// DMA filling the buffer
    Running(single_buffer::Transfer<Channel<CH0>, DmaReadTarget<u16>, AdcBuffer>),
    /// Only while moving between the other two
    Moving,
}

/// ADC, its DMA channel and the reference generator: the logic probe front end.
pub struct RpFrontEnd {
    /// Round robin FIFO, rebuilt when the rate changes
    fifo: Option<AdcFifo<'static, u16>>,
    /// ADC inputs
    pins: (ProbePin, AuxPin),
    /// DMA state
    dma: AdcDma,
    /// A capture has finished since the last start
    done: bool,
    /// Per-channel rate of the current FIFO, Hz
    rate: u32,
    /// Per-channel rate requested for the next capture, Hz
    requested_rate: u32,
    /// Reference generator slice
    generator: Slice<Pwm3, FreeRunning>,
}

impl RpFrontEnd {
    /// Set up the FIFO at `rate_hz` per channel and park the DMA channel on `buffer`.
    ///
    /// The generator slice is configured for [`PROBE_GENERATOR_HZ`] with its output held low.
    pub fn new(
        adc: &'static mut Adc,
        mut pins: (ProbePin, AuxPin),
        channel: Channel<CH0>,
        buffer: AdcBuffer,
        mut generator: Slice<Pwm3, FreeRunning>,
        sys_clock_hz: u32,
        rate_hz: u32,
    ) -> Self {
        let fifo = build_fifo(adc, &mut pins, rate_hz);

        generator.set_div_int(GENERATOR_DIV);
        generator.set_top((sys_clock_hz / (GENERATOR_DIV as u32 * PROBE_GENERATOR_HZ) - 1) as u16);
        let _ = generator.channel_a.set_duty_cycle_fully_off();
        generator.enable();

        Self {
            fifo: Some(fifo),
            pins,
            dma: AdcDma::Parked(channel, buffer),
            done: false,
            rate: rate_hz,
            requested_rate: rate_hz,
            generator,
        }
    }

    /// Rebuild the FIFO if a new rate was requested. Only called while DMA is parked.
    fn apply_rate(&mut self) {
        if self.rate == self.requested_rate {
            return;
        }
        if let Some(fifo) = self.fifo.take() {
            let adc = fifo.stop();
            self.fifo = Some(build_fifo(adc, &mut self.pins, self.requested_rate));
            self.rate = self.requested_rate;
            debug!("ADC rate now {} Hz per channel", self.rate);
        }
    }
}

/// Round robin FIFO over both inputs, probe channel first, paced for `rate_hz` per channel.
fn build_fifo(
    adc: &'static mut Adc,
    pins: &mut (ProbePin, AuxPin),
    rate_hz: u32,
) -> AdcFifo<'static, u16> {
    let conversions = (rate_hz * ADC_CHANNELS as u32).max(1);
    let divider = (ADC_CLOCK_HZ / conversions).saturating_sub(1).min(u16::MAX as u32) as u16;
    adc.build_fifo()
        .clock_divider(divider, 0)
        .set_channel(&mut pins.0)
        .round_robin((&pins.0, &pins.1))
        .enable_dma()
        .start_paused()
}

impl AdcCapture for RpFrontEnd {
    fn start_capture(&mut self) {
        if matches!(self.dma, AdcDma::Running(_)) {
            return;
        }
        self.apply_rate();
        let AdcDma::Parked(channel, buffer) = core::mem::replace(&mut self.dma, AdcDma::Moving)
        else {
            warn!("ADC DMA lost");
            return;
        };
        let Some(fifo) = self.fifo.as_mut() else {
            self.dma = AdcDma::Parked(channel, buffer);
            return;
        };
        fifo.clear();
        let transfer = single_buffer::Config::new(channel, fifo.dma_read_target(), buffer).start();
        fifo.resume();
        self.done = false;
        self.dma = AdcDma::Running(transfer);
    }

    fn abort_capture(&mut self) {
        self.dma = match core::mem::replace(&mut self.dma, AdcDma::Moving) {
            AdcDma::Running(transfer) => {
                if let Some(fifo) = self.fifo.as_mut() {
                    fifo.pause();
                }
                let (channel, _, buffer) = transfer.abort();
                if let Some(fifo) = self.fifo.as_mut() {
                    fifo.clear();
                }
                debug!("ADC capture aborted");
                AdcDma::Parked(channel, buffer)
            }
            parked => parked,
        };
        self.done = false;
    }

    fn status(&mut self) -> CaptureStatus {
        match &self.dma {
            AdcDma::Running(transfer) if transfer.is_done() => {}
            AdcDma::Running(_) => return CaptureStatus::Running,
            _ if self.done => return CaptureStatus::Done,
            _ => return CaptureStatus::Idle,
        }
        if let AdcDma::Running(transfer) = core::mem::replace(&mut self.dma, AdcDma::Moving) {
            let (channel, _, buffer) = transfer.wait();
            if let Some(fifo) = self.fifo.as_mut() {
                fifo.pause();
            }
            self.dma = AdcDma::Parked(channel, buffer);
        }
        self.done = true;
        CaptureStatus::Done
    }

    fn raw_samples(&self) -> &[u16] {
        match &self.dma {
            AdcDma::Parked(_, buffer) if self.done => &buffer[..],
            _ => &[],
        }
    }

    fn set_sample_rate(&mut self, hz: u32) {
        self.requested_rate = hz;
    }

    fn sample_rate(&self) -> u32 {
        self.requested_rate
    }
}

impl ReferenceGenerator for RpFrontEnd {
    fn restart(&mut self) {
        self.generator.set_counter(0);
    }

    fn set_output_enabled(&mut self, enabled: bool) {
        let _ = if enabled {
            self.generator.channel_a.set_duty_cycle_percent(50)
        } else {
            self.generator.channel_a.set_duty_cycle_fully_off()
        };
    }
}

/// Millisecond clock on the 1 MHz system timer.
#[derive(Clone, Copy)]
pub struct RpClock(pub Timer);

impl MillisClock for RpClock {
    fn now_ms(&self) -> u32 {
        (self.0.get_counter().ticks() / 1000) as u32
    }
}

/// Stand-in UI: reports redraw requests over RTT.
#[derive(Debug, Default)]
pub struct RttDisplay;

impl Display for RttDisplay {
    fn notify_redraw(&mut self, context: RedrawContext) {
        info!("Redraw: {:?}", context);
    }
}
