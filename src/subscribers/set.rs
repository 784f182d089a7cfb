//! # SubscriberSet: non-blocking fan-out
//!
//! ```text
//!    emit(&Event)
//!        ├──► [queue S1] ─► worker S1 ─► on_event()
//!        ├──► [queue S2] ─► worker S2 ─► on_event()
//!        └──► [queue SN] ─► worker SN ─► on_event()
//! ```
//!
//! `emit` returns immediately. Order is FIFO per subscriber, with no ordering
//! across subscribers. A panic in `on_event` is caught, logged and reported on
//! the bus; the subscriber keeps receiving events. A full queue drops the
//! event for that subscriber only.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{Bus, Event};

use super::Subscribe;

struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
    bus: Option<Bus>,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self::build(subs, None)
    }

    /// Like [`SubscriberSet::new`], reporting overflow and panics on `bus`.
    #[must_use]
    pub fn with_bus(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        Self::build(subs, Some(bus))
    }

    fn build(subs: Vec<Arc<dyn Subscribe>>, bus: Option<Bus>) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let report = bus.clone();

            workers.push(tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()));
                    if let Err(panic) = fut.catch_unwind().await {
                        let info = panic_message(panic.as_ref());
                        tracing::warn!(subscriber = name, panic = %info, "subscriber panicked");
                        if let Some(bus) = &report {
                            if !ev.is_internal() {
                                bus.publish(Event::subscriber_panicked(name, info));
                            }
                        }
                    }
                }
            }));
            lanes.push(Lane { name, tx });
        }

        Self {
            lanes,
            workers,
            bus,
        }
    }

    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for lane in &self.lanes {
            let why = match lane.tx.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            tracing::warn!(subscriber = lane.name, reason = why, seq = ev.seq, "event dropped");
            // Overflow reports are not re-reported, or a stuck subscriber would feed itself.
            if let Some(bus) = &self.bus {
                if !ev.is_internal() {
                    bus.publish(Event::subscriber_overflow(lane.name, why));
                }
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for w in self.workers {
            let _ = w.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::events::EventKind;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl Subscribe for Counter {
        async fn on_event(&self, _: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Grumpy;

    #[async_trait]
    impl Subscribe for Grumpy {
        async fn on_event(&self, ev: &Event) {
            if ev.kind == EventKind::WorkerCrashed {
                panic!("crash events upset me");
            }
        }
        fn name(&self) -> &'static str {
            "grumpy"
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_is_isolated_and_reported() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let counter = Arc::new(Counter::default());
        let set = SubscriberSet::with_bus(
            vec![Arc::new(Grumpy), Arc::clone(&counter) as Arc<dyn Subscribe>],
            bus,
        );

        set.emit(&Event::new(EventKind::WorkerCrashed));
        set.emit(&Event::new(EventKind::WorkerStopped));

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.kind, EventKind::SubscriberPanicked);
        assert!(reported.reason.as_deref().unwrap().contains("grumpy"));

        set.shutdown().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
