//! Client-side prediction of the local player
//!
//! Every fixed step samples an [`InputCommand`], applies it immediately through
//! the shared [`Integrator`] and keeps it until the server acknowledges it.

use std::collections::VecDeque;

use tracing::warn;

use crate::sim::{InputCommand, InputFlags, Integrator, MotionState};
use crate::ws::protocol::PlayerSnapshot;

/// The local player's predicted state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedState {
    pub motion: MotionState,
    pub health: f32,
    pub alive: bool,
}

impl From<&PlayerSnapshot> for PredictedState {
    fn from(snapshot: &PlayerSnapshot) -> Self {
        Self {
            motion: snapshot.motion,
            health: snapshot.health,
            alive: snapshot.alive,
        }
    }
}

/// Unacknowledged commands, sorted ascending by sequence number
#[derive(Debug, Clone, Default)]
pub struct PendingInputQueue {
    commands: VecDeque<InputCommand>,
}

impl PendingInputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping sequence order. A command whose sequence is already
    /// present is ignored.
    pub fn push(&mut self, command: InputCommand) {
        match self.commands.back() {
            None => self.commands.push_back(command),
            Some(last) if last.sequence_number < command.sequence_number => self.commands.push_back(command),
            Some(_) => {
                if let Err(idx) = self
                    .commands
                    .binary_search_by_key(&command.sequence_number, |c| c.sequence_number)
                {
                    self.commands.insert(idx, command);
                }
            }
        }
    }

    /// Drop every command with sequence `<= sequence`, returning how many went
    pub fn acknowledge(&mut self, sequence: u32) -> usize {
        let before = self.commands.len();
        while self
            .commands
            .front()
            .is_some_and(|c| c.sequence_number <= sequence)
        {
            self.commands.pop_front();
        }
        before - self.commands.len()
    }

    /// Remove a single command (e.g. one the server rejected)
    pub fn remove(&mut self, sequence: u32) -> bool {
        match self
            .commands
            .binary_search_by_key(&sequence, |c| c.sequence_number)
        {
            Ok(idx) => self.commands.remove(idx).is_some(),
            Err(_) => false,
        }
    }

    /// Drop oldest commands beyond `max`
    pub fn truncate_front(&mut self, max: usize) -> usize {
        let excess = self.commands.len().saturating_sub(max);
        for _ in 0..excess {
            self.commands.pop_front();
        }
        excess
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputCommand> {
        self.commands.iter()
    }

    pub fn sequences(&self) -> Vec<u32> {
        self.commands.iter().map(|c| c.sequence_number).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Predicts the local player ahead of the server
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    integrator: Integrator,
    state: PredictedState,
    pending: PendingInputQueue,
    next_sequence: u32,
    max_pending: usize,
}

impl PredictionEngine {
    pub fn new(integrator: Integrator, initial: PredictedState, max_pending: usize) -> Self {
        Self {
            integrator,
            state: initial,
            pending: PendingInputQueue::new(),
            next_sequence: 1,
            max_pending: max_pending.max(1),
        }
    }

    /// Continue numbering from `next_sequence`, for a new engine on a
    /// connection that already sent inputs
    pub fn with_next_sequence(mut self, next_sequence: u32) -> Self {
        self.next_sequence = next_sequence.max(1);
        self
    }

    /// Apply an authoritative health change that arrived between snapshots
    pub fn set_vitals(&mut self, health: f32, alive: bool) {
        self.state.health = health;
        self.state.alive = alive;
    }

    /// Sample, apply and record one fixed step of input
    pub fn predict(&mut self, flags: InputFlags, timestamp: u64) -> InputCommand {
        let command = InputCommand {
            sequence_number: self.next_sequence,
            flags,
            timestamp,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);

        if let Err(e) = self.integrator.step(&mut self.state.motion, self.state.alive, flags) {
            warn!(sequence = command.sequence_number, error = %e, "Prediction step failed");
        }

        self.pending.push(command);
        let dropped = self.pending.truncate_front(self.max_pending);
        if dropped > 0 {
            warn!(dropped, "Pending input queue overflowed, oldest inputs discarded");
        }

        command
    }

    /// Replace the state with an authoritative one and replay every pending
    /// command on top. Returns the number of commands replayed.
    pub fn rebase(&mut self, authoritative: PredictedState) -> usize {
        self.state = authoritative;
        for command in self.pending.iter() {
            if let Err(e) = self.integrator.step(&mut self.state.motion, self.state.alive, command.flags) {
                warn!(sequence = command.sequence_number, error = %e, "Replay step failed");
            }
        }
        self.pending.len()
    }

    pub fn state(&self) -> &PredictedState {
        &self.state
    }

    pub fn pending(&self) -> &PendingInputQueue {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingInputQueue {
        &mut self.pending
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// Sequence number the next prediction will use
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }
}
