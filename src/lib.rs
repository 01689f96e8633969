//! Measurement core for a handheld frequency meter and logic probe. The same probe tip feeds a
//! comparator, whose edges are timestamped by a capture timer, and an ADC, which samples the tip
//! against a reference square wave.
//!
//! The engines are plain state machines polled from a ~1 ms scheduler tick. They never block and
//! never touch peripheral registers: the hardware is reached through the traits in
//! [`components`], so the whole core runs (and is tested) on the host.
//!
//! - [`pipeline`]: the generic Idle → Capturing → Processing → Done cycle
//! - [`frequency`]: edge capture with slow → fast precision escalation
//! - [`calibration`]: learns the comparator trigger level from ADC captures
//! - [`logic_probe`]: classifies the tip as floating, static high/low, or pulsed
//! - [`instrument`]: owns the hardware and hands it to the engine of the active mode
//!
//! ## Crate features
//!
//! - `rp2040`: Builds the RP2040 board layer (`board`) and the `meterprobe` firmware binary. Pulls
//!   in the HAL, the runtime and `defmt`.
//! - `defmt`: Logs through [`defmt`](https://docs.rs/defmt) instead of the [`log`] facade. Enabled
//!   by `rp2040`.
//! - `trace_captures`: Logs every captured comparator edge and every logic probe window average.
//!   Very noisy!
//!
//! ## Demo
//!
//! Classifying a logic probe capture whose half-period averages follow the reference generator:
//!
//! ```
//! use meterprobe::logic_probe::{classify, SignalClassification};
//!
//! let windows = [900, 100, 900, 100, 880, 120, 900, 100];
//! assert_eq!(classify(&windows), SignalClassification::Floating);
//! ```
//!
//! Driving an [`Instrument`](instrument::Instrument) from the firmware main loop:
//!
//! ```ignore
//! let mut instrument = Instrument::new(capture, front_end, clock, display, &Config::default());
//! loop {
//!     for event in keys.poll(&clock).unwrap_or_default() {
//!         match (event.key, event.action) {
//!             (Key::Upper, KeyAction::Press) => instrument.set_mode(instrument.mode().toggled()),
//!             (Key::Lower, KeyAction::Hold) => instrument.start_calibration(),
//!             _ => instrument.start_measurement(),
//!         }
//!     }
//!     if instrument.tick() == PipelineState::Done {
//!         // show the result, then measure again
//!         instrument.start_measurement();
//!     }
//! }
//! ```

// Copyright 2024 Cameron Rodriguez
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

#[macro_use]
mod fmt;

pub mod buffer;
pub mod calibration;
pub mod components;
pub mod config;
pub mod frequency;
pub mod instrument;
pub mod interrupt;
pub mod keys;
pub mod logic_probe;
pub mod pipeline;

#[cfg(feature = "rp2040")]
pub mod board;
