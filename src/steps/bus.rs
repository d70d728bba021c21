//! Per-session bounded step queues with single-consumer draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::time::Instant;

use super::event::StepEvent;

struct SessionQueue {
    tx: flume::Sender<StepEvent>,
    rx: flume::Receiver<StepEvent>,
}

/// Registry of per-session step queues.
///
/// Concurrency contract: any number of producers per session, exactly one
/// consumer. Emission is non-blocking; when a queue is absent or full the
/// event is silently dropped (progress loss is acceptable, back-pressure on
/// agents is not). Events are delivered FIFO per session.
pub struct StepBus {
    queues: RwLock<FxHashMap<String, SessionQueue>>,
    capacity: usize,
    dropped: AtomicUsize,
}

impl StepBus {
    /// Create a bus whose per-session queues hold at most `capacity` events.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queues: RwLock::new(FxHashMap::default()),
            capacity: capacity.max(1),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Idempotently create the queue for a session.
    pub fn ensure_queue(&self, session_id: &str) {
        let mut queues = self.queues.write();
        queues.entry(session_id.to_string()).or_insert_with(|| {
            let (tx, rx) = flume::bounded(self.capacity);
            SessionQueue { tx, rx }
        });
    }

    /// Non-blocking enqueue. Drops the event when the session has no queue
    /// or the queue is full.
    pub fn emit(&self, session_id: &str, event: StepEvent) {
        let queues = self.queues.read();
        let Some(queue) = queues.get(session_id) else {
            return;
        };
        if queue.tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                target: "findry::steps",
                session_id,
                total_dropped = total,
                "step queue full; dropped event"
            );
        }
    }

    /// Total events dropped across all sessions since startup.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove a session queue, releasing its buffered events.
    pub fn remove(&self, session_id: &str) {
        self.queues.write().remove(session_id);
    }

    /// Number of live session queues.
    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    /// Begin consuming a session's steps.
    ///
    /// Ensures the queue exists (the consumer may connect before the query
    /// starts), then returns a [`StepStream`] which yields events until a
    /// terminal event or until `timeout` elapses. Dropping or exhausting the
    /// stream removes the queue.
    pub fn stream(self: &Arc<Self>, session_id: &str, timeout: Duration) -> StepStream {
        self.ensure_queue(session_id);
        let rx = {
            let queues = self.queues.read();
            queues
                .get(session_id)
                .map(|q| q.rx.clone())
                .expect("queue just ensured")
        };
        StepStream {
            bus: Arc::clone(self),
            session_id: session_id.to_string(),
            rx,
            deadline: Instant::now() + timeout,
            finished: false,
        }
    }
}

/// Single consumer over one session's step queue.
///
/// Yields events in emission order. Terminates after yielding a `Complete`
/// event (emitted by the workflow) or after yielding a synthesized
/// `Timeout`/`Error` event. The session queue is removed on termination and
/// on drop, so no further events are observable after the stream ends.
pub struct StepStream {
    bus: Arc<StepBus>,
    session_id: String,
    rx: flume::Receiver<StepEvent>,
    deadline: Instant,
    finished: bool,
}

impl StepStream {
    /// Receive the next event, or `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<StepEvent> {
        if self.finished {
            return None;
        }
        let event = match tokio::time::timeout_at(self.deadline, self.rx.recv_async()).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => StepEvent::error("step queue closed"),
            Err(_) => StepEvent::timeout(),
        };
        if event.is_terminal() {
            self.finish();
        }
        Some(event)
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.bus.remove(&self.session_id);
        }
    }
}

impl Drop for StepStream {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::event::StepKind;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let bus = StepBus::new(16);
        bus.ensure_queue("s1");
        for i in 0..5 {
            bus.emit("s1", StepEvent::step("agent", format!("action-{i}"), ""));
        }
        bus.emit("s1", StepEvent::complete());

        let mut stream = bus.stream("s1", Duration::from_secs(1));
        let mut actions = Vec::new();
        while let Some(event) = stream.next().await {
            if event.kind == StepKind::Step {
                actions.push(event.action);
            }
        }
        assert_eq!(
            actions,
            (0..5).map(|i| format!("action-{i}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn stream_ends_on_complete_and_removes_queue() {
        let bus = StepBus::new(16);
        bus.ensure_queue("s2");
        bus.emit("s2", StepEvent::step("a", "b", "c"));
        bus.emit("s2", StepEvent::complete());

        let mut stream = bus.stream("s2", Duration::from_secs(1));
        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, StepKind::Step);
        let second = stream.next().await.unwrap();
        assert_eq!(second.kind, StepKind::Complete);
        assert!(stream.next().await.is_none());
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn emit_without_queue_is_a_silent_noop() {
        let bus = StepBus::new(4);
        bus.emit("missing", StepEvent::step("a", "b", "c"));
        assert_eq!(bus.dropped(), 0);
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_newest_and_counts() {
        let bus = StepBus::new(2);
        bus.ensure_queue("s3");
        bus.emit("s3", StepEvent::step("a", "1", ""));
        bus.emit("s3", StepEvent::step("a", "2", ""));
        bus.emit("s3", StepEvent::step("a", "3", ""));
        assert_eq!(bus.dropped(), 1);

        let mut stream = bus.stream("s3", Duration::from_millis(50));
        assert_eq!(stream.next().await.unwrap().action, "1");
        assert_eq!(stream.next().await.unwrap().action, "2");
        // No terminal event was emitted, so the consumer times out.
        let last = stream.next().await.unwrap();
        assert_eq!(last.kind, StepKind::Timeout);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn consumer_can_connect_before_producer() {
        let bus = StepBus::new(8);
        let mut stream = bus.stream("s4", Duration::from_secs(1));
        let bus2 = Arc::clone(&bus);
        tokio::spawn(async move {
            bus2.emit("s4", StepEvent::step("worker", "start", ""));
            bus2.emit("s4", StepEvent::complete());
        });
        assert_eq!(stream.next().await.unwrap().action, "start");
        assert_eq!(stream.next().await.unwrap().kind, StepKind::Complete);
    }
}
