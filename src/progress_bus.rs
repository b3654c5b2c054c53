//! In-process progress topics with SSE-friendly subscriptions.
//!
//! One topic per import session (or upload task). A single publisher
//! assigns monotonic sequence numbers; any number of subscribers each get
//! backlog-then-live delivery in `seq` order. Replay comes from a bounded
//! in-memory ring per topic; slow subscribers lose oldest non-terminal
//! events from their own queue only and see a synthetic marker in place
//! of the gap.
//!
//! Finished topics stay resident so a subscriber attaching after the
//! `done` sentinel can still replay the run, but only the most recent
//! [`MAX_FINISHED_TOPICS`] of them: each topic that finishes evicts the
//! oldest finished topic beyond that bound, so a long-lived process does
//! not accumulate history without limit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// Replay window per topic.
const BACKLOG_CAP: usize = 1024;
// Per-subscriber buffer; beyond this the oldest non-terminal event goes.
const SUBSCRIBER_CAP: usize = 256;
// Finished topics retained for late subscribers before eviction.
const MAX_FINISHED_TOPICS: usize = 64;

/// Event vocabulary a topic carries.
pub trait BusEvent: Clone + Send + 'static {
    fn kind(&self) -> &'static str;
    fn payload_json(&self) -> String;
    /// Terminal events are never dropped from a lagging subscriber.
    fn is_terminal(&self) -> bool;
    /// The stream-closing sentinel (`done`).
    fn is_done(&self) -> bool;
    /// Synthetic event marking dropped backlog for one subscriber.
    fn lag_marker(dropped: u64) -> Self;
}

#[derive(Debug, Clone)]
pub struct SequencedEvent<E> {
    pub seq: u64,
    pub event: E,
}

pub struct ProgressBus<E> {
    inner: Mutex<BusState<E>>,
}

struct BusState<E> {
    topics: HashMap<String, Arc<Topic<E>>>,
    /// Keys of finished topics, oldest first.
    finished: VecDeque<String>,
}

struct Topic<E> {
    state: Mutex<TopicState<E>>,
}

struct TopicState<E> {
    next_seq: u64,
    backlog: VecDeque<SequencedEvent<E>>,
    subscribers: Vec<Arc<SubscriberShared<E>>>,
    done: bool,
}

struct SubscriberShared<E> {
    state: Mutex<SubscriberState<E>>,
    notify: Notify,
}

struct SubscriberState<E> {
    queue: VecDeque<SequencedEvent<E>>,
    /// Seq of the first dropped event and how many were dropped since the
    /// last marker was emitted.
    pending_drop: Option<(u64, u64)>,
    finished: bool,
    detached: bool,
}

impl<E: BusEvent> Default for ProgressBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> ProgressBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusState {
                topics: HashMap::new(),
                finished: VecDeque::new(),
            }),
        }
    }

    fn topic(&self, key: &str) -> Arc<Topic<E>> {
        let mut bus = self.inner.lock().expect("bus lock poisoned");
        bus.topics
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Topic {
                    state: Mutex::new(TopicState {
                        next_seq: 0,
                        backlog: VecDeque::new(),
                        subscribers: Vec::new(),
                        done: false,
                    }),
                })
            })
            .clone()
    }

    /// Assigns the next sequence number, appends to the replay ring, and
    /// fans out to live subscribers. Returns the assigned seq.
    pub fn publish(&self, key: &str, event: E) -> u64 {
        let topic = self.topic(key);
        let mut state = topic.state.lock().expect("topic lock poisoned");

        let seq = state.next_seq;
        state.next_seq += 1;
        let sequenced = SequencedEvent {
            seq,
            event: event.clone(),
        };

        state.backlog.push_back(sequenced.clone());
        if state.backlog.len() > BACKLOG_CAP {
            state.backlog.pop_front();
        }

        state.subscribers.retain(|sub| {
            let mut sub_state = sub.state.lock().expect("subscriber lock poisoned");
            if sub_state.detached {
                return false;
            }
            Self::enqueue(&mut sub_state, sequenced.clone());
            drop(sub_state);
            sub.notify.notify_one();
            true
        });

        let newly_done = event.is_done() && !state.done;
        if newly_done {
            state.done = true;
        }
        drop(state);

        if newly_done {
            self.retire(key);
        }

        seq
    }

    /// Records a finished topic and evicts the oldest finished ones past
    /// the retention bound. Live subscribers keep their queues; only the
    /// bus-side replay state is released.
    fn retire(&self, key: &str) {
        let mut bus = self.inner.lock().expect("bus lock poisoned");
        bus.finished.push_back(key.to_string());
        while bus.finished.len() > MAX_FINISHED_TOPICS {
            if let Some(oldest) = bus.finished.pop_front() {
                bus.topics.remove(&oldest);
            }
        }
    }

    fn enqueue(sub: &mut SubscriberState<E>, event: SequencedEvent<E>) {
        if sub.queue.len() >= SUBSCRIBER_CAP && !event.event.is_terminal() {
            // Shed the oldest droppable event for this subscriber only.
            if let Some(victim_idx) = sub.queue.iter().position(|e| !e.event.is_terminal()) {
                let victim = sub.queue.remove(victim_idx).expect("index in range");
                let (first, count) = sub.pending_drop.unwrap_or((victim.seq, 0));
                sub.pending_drop = Some((first.min(victim.seq), count + 1));
            } else {
                // Nothing droppable: every buffered event is terminal.
                // Count the incoming one as dropped instead.
                let (first, count) = sub.pending_drop.unwrap_or((event.seq, 0));
                sub.pending_drop = Some((first.min(event.seq), count + 1));
                return;
            }
        }
        sub.queue.push_back(event);
    }

    /// Attaches a subscriber: it first drains the retained backlog, then
    /// receives live events, and its stream ends after `done`.
    pub fn subscribe(&self, key: &str) -> Subscription<E> {
        let topic = self.topic(key);
        let mut state = topic.state.lock().expect("topic lock poisoned");

        let shared = Arc::new(SubscriberShared {
            state: Mutex::new(SubscriberState {
                queue: state.backlog.iter().cloned().collect(),
                pending_drop: None,
                finished: false,
                detached: false,
            }),
            notify: Notify::new(),
        });
        state.subscribers.push(shared.clone());

        Subscription { shared }
    }

    #[cfg(test)]
    fn retained_topics(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").topics.len()
    }
}

pub struct Subscription<E> {
    shared: Arc<SubscriberShared<E>>,
}

impl<E: BusEvent> Subscription<E> {
    /// Next event in seq order, or `None` once the stream is finished.
    pub async fn recv(&mut self) -> Option<SequencedEvent<E>> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().expect("subscriber lock poisoned");
                if state.finished {
                    return None;
                }

                // Surface a drop marker before the first event after a gap.
                if let Some((first_seq, count)) = state.pending_drop {
                    let emit = state
                        .queue
                        .front()
                        .map(|next| next.seq > first_seq)
                        .unwrap_or(false);
                    if emit {
                        state.pending_drop = None;
                        return Some(SequencedEvent {
                            seq: first_seq,
                            event: E::lag_marker(count),
                        });
                    }
                }

                if let Some(event) = state.queue.pop_front() {
                    if event.event.is_done() {
                        state.finished = true;
                    }
                    return Some(event);
                }
            }
            notified.await;
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.detached = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestEvent {
        Tick(u32),
        Lagged(u64),
        Finished,
        Done,
    }

    impl BusEvent for TestEvent {
        fn kind(&self) -> &'static str {
            match self {
                TestEvent::Tick(_) => "tick",
                TestEvent::Lagged(_) => "lagged",
                TestEvent::Finished => "finished",
                TestEvent::Done => "done",
            }
        }

        fn payload_json(&self) -> String {
            "{}".to_string()
        }

        fn is_terminal(&self) -> bool {
            matches!(self, TestEvent::Finished | TestEvent::Done)
        }

        fn is_done(&self) -> bool {
            matches!(self, TestEvent::Done)
        }

        fn lag_marker(dropped: u64) -> Self {
            TestEvent::Lagged(dropped)
        }
    }

    #[tokio::test]
    async fn live_subscriber_sees_ordered_events() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("s1");

        for i in 0..5 {
            bus.publish("s1", TestEvent::Tick(i));
        }
        bus.publish("s1", TestEvent::Done);

        let mut last_seq = None;
        let mut count = 0;
        while let Some(event) = sub.recv().await {
            if let Some(last) = last_seq {
                assert!(event.seq > last, "seq must strictly increase");
            }
            last_seq = Some(event.seq);
            count += 1;
        }
        assert_eq!(count, 6);
    }

    #[tokio::test]
    async fn late_subscriber_replays_backlog_then_live() {
        let bus = ProgressBus::new();

        bus.publish("s1", TestEvent::Tick(0));
        bus.publish("s1", TestEvent::Tick(1));

        let mut sub = bus.subscribe("s1");
        bus.publish("s1", TestEvent::Tick(2));
        bus.publish("s1", TestEvent::Done);

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[3].seq, 3);
        assert!(events[3].event.is_done());
    }

    #[tokio::test]
    async fn stream_closes_after_done() {
        let bus = ProgressBus::new();
        bus.publish("s1", TestEvent::Done);

        let mut sub = bus.subscribe("s1");
        assert!(sub.recv().await.unwrap().event.is_done());
        assert!(sub.recv().await.is_none());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_sees_marker() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe("s1");

        // Overfill the per-subscriber queue without draining.
        let overflow = 40;
        for i in 0..(SUBSCRIBER_CAP + overflow) {
            bus.publish("s1", TestEvent::Tick(i as u32));
        }
        bus.publish("s1", TestEvent::Finished);
        bus.publish("s1", TestEvent::Done);

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }

        // First delivered event is the synthetic marker covering the gap.
        assert!(matches!(events[0].event, TestEvent::Lagged(n) if n as usize == overflow));

        // Terminal events survived the shedding.
        let kinds: Vec<_> = events.iter().map(|e| e.event.kind()).collect();
        assert!(kinds.contains(&"finished"));
        assert_eq!(*kinds.last().unwrap(), "done");

        // Ordering still holds across the gap.
        for pair in events.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }
    }

    #[tokio::test]
    async fn drop_in_one_subscriber_does_not_affect_another() {
        let bus = ProgressBus::new();
        let mut slow = bus.subscribe("s1");
        let mut fast_events = Vec::new();

        // Drain the fast subscriber as we go so it never sheds.
        let mut fast = bus.subscribe("s1");
        let total = SUBSCRIBER_CAP + 20;

        for i in 0..total {
            bus.publish("s1", TestEvent::Tick(i as u32));
            if let Some(e) = fast.recv().await {
                fast_events.push(e);
            }
        }
        bus.publish("s1", TestEvent::Done);
        while let Some(e) = fast.recv().await {
            fast_events.push(e);
        }

        assert_eq!(fast_events.len(), total + 1);
        assert!(!fast_events
            .iter()
            .any(|e| matches!(e.event, TestEvent::Lagged(_))));

        // The slow one lagged.
        let mut slow_events = Vec::new();
        while let Some(e) = slow.recv().await {
            slow_events.push(e);
        }
        assert!(slow_events
            .iter()
            .any(|e| matches!(e.event, TestEvent::Lagged(_))));
    }

    #[tokio::test]
    async fn finished_topic_still_replays_for_late_subscribers() {
        let bus = ProgressBus::new();
        bus.publish("s1", TestEvent::Tick(0));
        bus.publish("s1", TestEvent::Done);

        let mut sub = bus.subscribe("s1");
        assert_eq!(sub.recv().await.unwrap().seq, 0);
        assert!(sub.recv().await.unwrap().event.is_done());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn finished_topics_are_evicted_beyond_retention_bound() {
        let bus = ProgressBus::new();

        let extra = 5;
        for i in 0..(MAX_FINISHED_TOPICS + extra) {
            let key = format!("s{}", i);
            bus.publish(&key, TestEvent::Tick(0));
            bus.publish(&key, TestEvent::Done);
        }

        assert_eq!(bus.retained_topics(), MAX_FINISHED_TOPICS);

        // The oldest topics were evicted: subscribing recreates them
        // empty, so a fresh publish starts at seq 0 again.
        let seq = bus.publish("s0", TestEvent::Tick(9));
        assert_eq!(seq, 0);

        // A recent topic still replays its run.
        let mut sub = bus.subscribe(&format!("s{}", MAX_FINISHED_TOPICS + extra - 1));
        assert_eq!(sub.recv().await.unwrap().seq, 0);
        assert!(sub.recv().await.unwrap().event.is_done());
    }

    #[tokio::test]
    async fn double_done_retires_once() {
        let bus = ProgressBus::new();
        bus.publish("s1", TestEvent::Done);
        bus.publish("s1", TestEvent::Done);

        // One retention slot consumed, not two.
        let bus_state = bus.inner.lock().unwrap();
        assert_eq!(bus_state.finished.len(), 1);
    }
}
