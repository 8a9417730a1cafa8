//! Per-connection bounded input queue
//!
//! Written by the connection's I/O task, drained one command per tick by the
//! room. The highest admitted sequence number survives consumption, so a
//! sequence number can never be admitted twice.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::sim::InputCommand;
use crate::ws::protocol::RejectReason;

/// Shared handle between a session and its room
pub type SharedInputBuffer = Arc<Mutex<InputBuffer>>;

#[derive(Debug, Clone, Copy)]
pub struct InputBufferConfig {
    /// Maximum queued, unconsumed commands
    pub capacity: usize,
    /// Maximum timestamp lead over server time (ms)
    pub max_future_ms: u64,
    /// Maximum timestamp lag behind server time (ms)
    pub max_age_ms: u64,
}

impl Default for InputBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            max_future_ms: 1_000,
            max_age_ms: 5_000,
        }
    }
}

/// Structured validation failure, relayed to the client as INPUT_REJECTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputRejection {
    #[error("sequence {sequence} is not newer than last admitted {highest}")]
    Stale { sequence: u32, highest: u32 },

    #[error("timestamp is {ahead_ms}ms ahead of server time")]
    TimestampInFuture { ahead_ms: u64 },

    #[error("timestamp is {behind_ms}ms behind server time")]
    TimestampTooOld { behind_ms: u64 },
}

impl InputRejection {
    pub fn reason(&self) -> RejectReason {
        match self {
            InputRejection::Stale { .. } => RejectReason::Stale,
            InputRejection::TimestampInFuture { .. } => RejectReason::TimestampInFuture,
            InputRejection::TimestampTooOld { .. } => RejectReason::TimestampTooOld,
        }
    }
}

/// Outcome of a successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Queue was full; the oldest unconsumed command was dropped
    QueuedWithEviction { evicted_sequence: u32 },
}

#[derive(Debug)]
pub struct InputBuffer {
    queue: VecDeque<InputCommand>,
    config: InputBufferConfig,
    highest_admitted: u32,
    evicted: u64,
}

impl InputBuffer {
    pub fn new(config: InputBufferConfig) -> Self {
        Self {
            queue: VecDeque::with_capacity(config.capacity),
            config,
            highest_admitted: 0,
            evicted: 0,
        }
    }

    pub fn shared(config: InputBufferConfig) -> SharedInputBuffer {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Validate and enqueue a command
    pub fn admit(&mut self, command: InputCommand, server_now_ms: u64) -> Result<Admission, InputRejection> {
        if command.sequence_number <= self.highest_admitted {
            return Err(InputRejection::Stale {
                sequence: command.sequence_number,
                highest: self.highest_admitted,
            });
        }

        if command.timestamp > server_now_ms.saturating_add(self.config.max_future_ms) {
            return Err(InputRejection::TimestampInFuture {
                ahead_ms: command.timestamp - server_now_ms,
            });
        }

        if command.timestamp.saturating_add(self.config.max_age_ms) < server_now_ms {
            return Err(InputRejection::TimestampTooOld {
                behind_ms: server_now_ms - command.timestamp,
            });
        }

        self.highest_admitted = command.sequence_number;

        let admission = if self.queue.len() >= self.config.capacity.max(1) {
            let evicted_sequence = self
                .queue
                .pop_front()
                .map(|c| c.sequence_number)
                .unwrap_or_default();
            self.evicted += 1;
            debug!(evicted_sequence, "Input buffer full, evicted oldest command");
            Admission::QueuedWithEviction { evicted_sequence }
        } else {
            Admission::Queued
        };

        self.queue.push_back(command);
        Ok(admission)
    }

    /// Oldest unconsumed command, if any
    pub fn pop_next(&mut self) -> Option<InputCommand> {
        self.queue.pop_front()
    }

    /// Drop every queued command. The sequence high-water mark is kept, so
    /// numbers already used on this connection stay stale.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn highest_admitted(&self) -> u32 {
        self.highest_admitted
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::InputFlags;

    const NOW: u64 = 1_000_000;

    fn cmd(sequence_number: u32) -> InputCommand {
        InputCommand {
            sequence_number,
            flags: InputFlags::NONE,
            timestamp: NOW,
        }
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let mut buffer = InputBuffer::new(InputBufferConfig::default());
        assert_eq!(buffer.admit(cmd(1), NOW), Ok(Admission::Queued));

        let err = buffer.admit(cmd(1), NOW).unwrap_err();
        assert_eq!(err, InputRejection::Stale { sequence: 1, highest: 1 });
        assert_eq!(err.reason(), RejectReason::Stale);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn older_sequence_is_rejected_even_after_consumption() {
        let mut buffer = InputBuffer::new(InputBufferConfig::default());
        buffer.admit(cmd(5), NOW).unwrap();
        assert_eq!(buffer.pop_next().map(|c| c.sequence_number), Some(5));

        assert!(buffer.admit(cmd(4), NOW).is_err());
        assert!(buffer.admit(cmd(5), NOW).is_err());
        assert!(buffer.admit(cmd(6), NOW).is_ok());
    }

    #[test]
    fn admitted_sequences_are_strictly_increasing() {
        let mut buffer = InputBuffer::new(InputBufferConfig {
            capacity: 64,
            ..InputBufferConfig::default()
        });
        let arrivals = [1, 3, 2, 3, 7, 4, 8, 8, 9, 6, 12];
        for seq in arrivals {
            let _ = buffer.admit(cmd(seq), NOW);
        }

        let admitted: Vec<u32> = std::iter::from_fn(|| buffer.pop_next())
            .map(|c| c.sequence_number)
            .collect();
        assert_eq!(admitted, vec![1, 3, 7, 8, 9, 12]);
        assert!(admitted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut buffer = InputBuffer::new(InputBufferConfig {
            capacity: 3,
            ..InputBufferConfig::default()
        });
        for seq in 1..=3 {
            buffer.admit(cmd(seq), NOW).unwrap();
        }

        assert_eq!(
            buffer.admit(cmd(4), NOW),
            Ok(Admission::QueuedWithEviction { evicted_sequence: 1 })
        );
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.evicted_count(), 1);
        assert_eq!(buffer.pop_next().map(|c| c.sequence_number), Some(2));
    }

    #[test]
    fn implausible_timestamps_are_rejected() {
        let mut buffer = InputBuffer::new(InputBufferConfig::default());

        let future = InputCommand {
            timestamp: NOW + 5_000,
            ..cmd(1)
        };
        assert_eq!(
            buffer.admit(future, NOW),
            Err(InputRejection::TimestampInFuture { ahead_ms: 5_000 })
        );

        let ancient = InputCommand {
            timestamp: NOW - 60_000,
            ..cmd(1)
        };
        assert_eq!(
            buffer.admit(ancient, NOW).map_err(|e| e.reason()),
            Err(RejectReason::TimestampTooOld)
        );

        // Rejected commands do not advance the admitted sequence
        assert_eq!(buffer.highest_admitted(), 0);
        assert!(buffer.admit(cmd(1), NOW).is_ok());
    }

    #[test]
    fn clearing_keeps_the_high_water_mark() {
        let mut buffer = InputBuffer::new(InputBufferConfig::default());
        for seq in 1..=3 {
            buffer.admit(cmd(seq), NOW).unwrap();
        }

        assert_eq!(buffer.clear_pending(), 3);
        assert!(buffer.pop_next().is_none());
        assert!(matches!(buffer.admit(cmd(2), NOW), Err(InputRejection::Stale { .. })));
        assert_eq!(buffer.admit(cmd(4), NOW), Ok(Admission::Queued));
    }
}
