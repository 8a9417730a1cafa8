//! Bounded per-session outbound queue
//!
//! The room tick pushes without awaiting; the session's writer task drains.
//! When a session falls behind, its oldest unsent snapshot is dropped first so
//! control messages (JOINED, PLAYER_LEFT, ...) are not lost to backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error};

use crate::ws::protocol::ServerMsg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Snapshot,
    Control,
}

/// A serialized message ready for the socket. Snapshots share one allocation
/// across every session in the room.
#[derive(Debug, Clone)]
pub struct Frame {
    pub text: Arc<str>,
    pub kind: FrameKind,
}

impl Frame {
    pub fn snapshot(text: Arc<str>) -> Self {
        Self {
            text,
            kind: FrameKind::Snapshot,
        }
    }

    /// Serialize a control message
    pub fn control(msg: &ServerMsg) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(msg)?;
        Ok(Self {
            text: Arc::from(text),
            kind: FrameKind::Control,
        })
    }
}

#[derive(Debug)]
pub struct OutboundQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue without blocking. Returns false once the queue is closed.
    pub fn push(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }

        {
            let mut frames = self.frames.lock();
            if frames.len() >= self.capacity {
                let victim = frames
                    .iter()
                    .position(|f| f.kind == FrameKind::Snapshot)
                    .unwrap_or(0);
                frames.remove(victim);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "Outbound queue full, dropped oldest frame");
            }
            frames.push_back(frame);
        }

        self.notify.notify_one();
        true
    }

    /// Serialize and enqueue a control message
    pub fn push_msg(&self, msg: &ServerMsg) -> bool {
        match Frame::control(msg) {
            Ok(frame) => self.push(frame),
            Err(e) => {
                error!(error = %e, "Failed to serialize server message");
                false
            }
        }
    }

    /// Wait for the next frame. Returns None after close once drained.
    pub async fn next(&self) -> Option<Frame> {
        loop {
            let notified = self.notify.notified();

            let frame = self.frames.lock().pop_front();
            if frame.is_some() {
                return frame;
            }
            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tag: &str) -> Frame {
        Frame::snapshot(Arc::from(tag))
    }

    #[test]
    fn full_queue_drops_oldest_snapshot_first() {
        let queue = OutboundQueue::new(3);
        queue.push(snap("s1"));
        queue.push_msg(&ServerMsg::error("room_full", "full"));
        queue.push(snap("s2"));

        queue.push(snap("s3"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped_count(), 1);
        let texts: Vec<String> = std::iter::from_fn(|| queue.frames.lock().pop_front())
            .map(|f| f.text.to_string())
            .collect();
        assert!(texts[0].contains("room_full"));
        assert_eq!(&texts[1..], &["s2".to_string(), "s3".to_string()]);
    }

    #[test]
    fn control_only_queue_drops_oldest() {
        let queue = OutboundQueue::new(1);
        queue.push_msg(&ServerMsg::error("a", "first"));
        queue.push_msg(&ServerMsg::error("b", "second"));

        let frame = queue.frames.lock().pop_front().unwrap();
        assert!(frame.text.contains("second"));
    }

    #[tokio::test]
    async fn next_wakes_on_push_and_ends_on_close() {
        let queue = OutboundQueue::new(4);
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(frame) = queue.next().await {
                    seen.push(frame.text.to_string());
                }
                seen
            })
        };

        tokio::task::yield_now().await;
        queue.push(snap("hello"));
        tokio::task::yield_now().await;
        queue.close();

        let seen = reader.await.unwrap();
        assert_eq!(seen, vec!["hello".to_string()]);
        assert!(!queue.push(snap("late")));
    }
}
