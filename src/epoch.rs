use std::{fmt, time::Instant};

/// States of an iterative training run. A run moves through them strictly
/// sequentially: no two epochs ever overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochState {
    Init,
    EStep,
    Aggregate,
    Eval,
    Done,
}

impl fmt::Display for EpochState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            EpochState::Init => "INIT",
            EpochState::EStep => "E_STEP",
            EpochState::Aggregate => "AGGREGATE",
            EpochState::Eval => "EVAL",
            EpochState::Done => "DONE",
        })
    }
}

impl EpochState {
    fn can_transition_to(self, next: EpochState) -> bool {
        use EpochState::*;

        matches!(
            (self, next),
            (Init, EStep)
                | (Init, Eval)
                | (Init, Done)
                | (EStep, Aggregate)
                | (Aggregate, EStep)
                | (Aggregate, Eval)
                | (Aggregate, Done)
                | (Eval, EStep)
                | (Eval, Done)
        )
    }
}

/// Tracks the current state and epoch number of a training run and logs
/// every transition.
#[derive(Debug)]
pub struct EpochController {
    name: &'static str,
    state: EpochState,
    epoch: usize,
    start: Instant,
}

impl EpochController {
    pub fn new(name: &'static str) -> Self {
        log::debug!("{} | {}", name, EpochState::Init);

        Self {
            name,
            state: EpochState::Init,
            epoch: 0,
            start: Instant::now(),
        }
    }

    pub fn state(&self) -> EpochState {
        self.state
    }

    /// Number of completed epochs. An epoch completes when the run leaves
    /// `AGGREGATE`.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Moves to `next`.
    ///
    /// # Panics
    ///
    /// Panics on a transition that would reorder or overlap epochs.
    pub fn transition(&mut self, next: EpochState) {
        assert!(
            self.state.can_transition_to(next),
            "{}: illegal transition {} -> {}",
            self.name,
            self.state,
            next
        );

        if self.state == EpochState::Aggregate {
            self.epoch += 1;
        }

        log::debug!(
            "{} | epoch={} | {} -> {} | {:.2}s",
            self.name,
            self.epoch,
            self.state,
            next,
            self.start.elapsed().as_secs_f64()
        );

        self.state = next;
    }

    pub fn is_done(&self) -> bool {
        self.state == EpochState::Done
    }
}
