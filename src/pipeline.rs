// SPDX-License-Identifier: Apache-2.0

//! Generic capture → process state machine shared by the frequency meter and the logic probe.
//!
//! The pipeline never blocks. It advances only when [`Pipeline::poll`] is called from the
//! scheduler tick:
//!
//! ```text
//!            start()                    poll: armed
//!   any ───────────────► Idle ─────────────────────────► Capturing
//!                                                          │  ▲
//!                                   poll: window complete  │  │ Processed::Rearmed
//!                                                          ▼  │
//!                           Done ◄──────────────────── Processing
//!                                    Processed::Done
//! ```
//!
//! Processing runs to completion inside the tick that observed the finished window.

/// Lifecycle of one acquisition.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineState {
    /// Waiting for the next poll to arm the hardware
    #[default]
    Idle,
    /// Hardware armed, window not finished yet
    Capturing,
    /// Captured data being reduced. [`Pipeline::poll`] runs processing to completion inside the
    /// tick that saw the window finish, so `poll` never returns this state.
    Processing,
    /// Result available until the next [`Pipeline::start`]
    Done,
}

/// Outcome of [`Acquisition::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed<T> {
    /// Terminal result of this cycle
    Done(T),
    /// The strategy re-armed the hardware for another window
    Rearmed,
}

/// Capture and process strategy plugged into a [`Pipeline`], over hardware `H`.
pub trait Acquisition<H: ?Sized> {
    /// Result of one completed cycle
    type Output: Copy;

    /// Arm the hardware for the first window of a fresh cycle.
    fn begin(&mut self, hw: &mut H);

    /// The armed window has finished.
    fn is_complete(&self, hw: &mut H) -> bool;

    /// Reduce the finished window. May re-arm `hw` and return [`Processed::Rearmed`].
    fn process(&mut self, hw: &mut H) -> Processed<Self::Output>;
}

/// Idle → Capturing → Processing → Done driver around an [`Acquisition`].
pub struct Pipeline<A: Acquisition<H>, H: ?Sized> {
    /// Current state
    state: PipelineState,
    /// Strategy
    acquisition: A,
    /// Result of the last completed cycle
    result: Option<A::Output>,
    /// Ties the hardware type to the pipeline
    _hw: core::marker::PhantomData<fn(&mut H)>,
}

impl<A: Acquisition<H>, H: ?Sized> Pipeline<A, H> {
    /// Wrap `acquisition`. The first poll arms the hardware.
    pub fn new(acquisition: A) -> Self {
        Self {
            state: PipelineState::Idle,
            acquisition,
            result: None,
            _hw: core::marker::PhantomData,
        }
    }

    /// Force the pipeline back to Idle, whatever it is doing. Nothing is armed until the next
    /// poll, so repeated calls are harmless.
    ///
    /// This is a logical reset only: hardware already armed keeps running until the caller
    /// disarms it.
    pub fn start(&mut self) {
        self.state = PipelineState::Idle;
        self.result = None;
    }

    /// Advance by one scheduler tick and return the new state.
    pub fn poll(&mut self, hw: &mut H) -> PipelineState {
        match self.state {
            PipelineState::Idle => {
                self.acquisition.begin(hw);
                self.state = PipelineState::Capturing;
            }
            PipelineState::Capturing => {
                if self.acquisition.is_complete(hw) {
                    self.state = match self.acquisition.process(hw) {
                        Processed::Done(output) => {
                            self.result = Some(output);
                            PipelineState::Done
                        }
                        Processed::Rearmed => PipelineState::Capturing,
                    };
                }
            }
            PipelineState::Processing | PipelineState::Done => {}
        }
        self.state
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Result of the finished cycle, `None` unless [`PipelineState::Done`]
    pub fn result(&self) -> Option<A::Output> {
        self.result
    }

    /// The strategy
    pub fn acquisition(&self) -> &A {
        &self.acquisition
    }

    /// The strategy, mutably
    pub fn acquisition_mut(&mut self) -> &mut A {
        &mut self.acquisition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Bench {
        armed: u32,
        complete: bool,
    }

    /// Finishes after `rearms` extra windows, yielding the number of windows used.
    #[derive(Default)]
    struct Counting {
        rearms: u32,
        windows: u32,
    }

    impl Acquisition<Bench> for Counting {
        type Output = u32;

        fn begin(&mut self, hw: &mut Bench) {
            self.windows = 1;
            hw.armed += 1;
            hw.complete = false;
        }

        fn is_complete(&self, hw: &mut Bench) -> bool {
            hw.complete
        }

        fn process(&mut self, hw: &mut Bench) -> Processed<u32> {
            if self.windows <= self.rearms {
                self.windows += 1;
                hw.armed += 1;
                hw.complete = false;
                Processed::Rearmed
            } else {
                Processed::Done(self.windows)
            }
        }
    }

    #[test]
    fn runs_idle_to_done() {
        let mut hw = Bench::default();
        let mut pipeline = Pipeline::new(Counting::default());
        assert_eq!(pipeline.poll(&mut hw), PipelineState::Capturing);
        assert_eq!(pipeline.poll(&mut hw), PipelineState::Capturing);
        hw.complete = true;
        assert_eq!(pipeline.poll(&mut hw), PipelineState::Done);
        assert_eq!(pipeline.result(), Some(1));
        // Done holds until restarted
        assert_eq!(pipeline.poll(&mut hw), PipelineState::Done);
        assert_eq!(hw.armed, 1);
    }

    #[test]
    fn processing_is_never_reported() {
        let mut hw = Bench::default();
        let mut pipeline = Pipeline::new(Counting {
            rearms: 2,
            windows: 0,
        });
        let mut seen = std::vec::Vec::new();
        for _ in 0..6 {
            seen.push(pipeline.poll(&mut hw));
            hw.complete = true;
        }
        assert!(!seen.contains(&PipelineState::Processing));
        assert_eq!(seen.last(), Some(&PipelineState::Done));
    }

    #[test]
    fn rearm_returns_to_capturing() {
        let mut hw = Bench::default();
        let mut pipeline = Pipeline::new(Counting {
            rearms: 1,
            windows: 0,
        });
        pipeline.poll(&mut hw);
        hw.complete = true;
        assert_eq!(pipeline.poll(&mut hw), PipelineState::Capturing);
        assert_eq!(pipeline.result(), None);
        hw.complete = true;
        assert_eq!(pipeline.poll(&mut hw), PipelineState::Done);
        assert_eq!(pipeline.result(), Some(2));
        assert_eq!(hw.armed, 2);
    }

    #[test]
    fn repeated_start_arms_once() {
        let mut hw = Bench::default();
        let mut pipeline = Pipeline::new(Counting::default());
        pipeline.start();
        pipeline.start();
        assert_eq!(hw.armed, 0);
        pipeline.poll(&mut hw);
        assert_eq!(hw.armed, 1);
    }

    #[test]
    fn start_discards_result() {
        let mut hw = Bench::default();
        let mut pipeline = Pipeline::new(Counting::default());
        pipeline.poll(&mut hw);
        hw.complete = true;
        pipeline.poll(&mut hw);
        assert!(pipeline.result().is_some());
        pipeline.start();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.result(), None);
    }
}
