//! Polling activation loop.
//!
//! [`Runner::activate`] keeps turning a machine, pausing for the machine's
//! tick rate between turns, until a given state is no longer active.

use crate::error::Error;
use std::time::Duration;
use tickfsm_core::{Machine, StateId};

/// How the runner pauses between turns.
pub trait Wait {
    fn wait(&mut self, period: Duration);
}

impl<F: FnMut(Duration)> Wait for F {
    fn wait(&mut self, period: Duration) {
        self(period)
    }
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Wait for ThreadSleep {
    fn wait(&mut self, period: Duration) {
        std::thread::sleep(period);
    }
}

/// Drives machines with non-recursive turns on a fixed period.
#[derive(Debug, Clone)]
pub struct Runner<W = ThreadSleep> {
    wait: W,
    max_turns: Option<u64>,
}

impl Runner<ThreadSleep> {
    pub fn new() -> Self {
        Self::with_wait(ThreadSleep)
    }
}

impl Default for Runner<ThreadSleep> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Wait> Runner<W> {
    /// Uses a custom wait, e.g. one that advances a simulated clock.
    pub fn with_wait(wait: W) -> Self {
        Self {
            wait,
            max_turns: None,
        }
    }

    /// Gives up with [`Error::TurnLimitExceeded`] after this many turns.
    pub fn max_turns(mut self, limit: u64) -> Self {
        self.max_turns = Some(limit);
        self
    }

    /// Turns `machine` until `target` is inactive. Returns the number of turns.
    ///
    /// Always runs at least one turn and waits one period after every turn,
    /// so an already inactive `target` still costs one turn. Turn errors stop
    /// the loop and leave the machine as the failed turn left it.
    pub fn activate(&mut self, machine: &mut Machine, target: StateId) -> Result<u64, Error> {
        machine.registry().check(target)?;
        let period = machine.tick_rate();
        let mut turns = 0u64;

        loop {
            if let Some(limit) = self.max_turns {
                if turns >= limit {
                    return Err(Error::TurnLimitExceeded { limit });
                }
            }

            machine.turn(false)?;
            turns += 1;
            self.wait.wait(period);

            if !machine.is(target) {
                break;
            }
        }

        tracing::debug!(
            target_state = machine.state_name(target),
            turns,
            "activation finished"
        );
        Ok(turns)
    }
}
