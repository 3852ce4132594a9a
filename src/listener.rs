//! Event listeners: filter/callback pairs for events no action claimed

use futures_util::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::event::Event;

/// Listener filter: `(source, listener id, event) -> matches`.
pub type ListenerFilter = Arc<dyn Fn(&str, &ListenerId, &Event) -> bool + Send + Sync>;

/// Listener callback: `(source, listener id, event)`.
pub type ListenerCallback = Arc<dyn Fn(&str, &ListenerId, &Event) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(String);

impl ListenerId {
    fn generate() -> Self {
        Self(
            uuid::Uuid::new_v4().to_string(),
        )
    }

    /// String form of the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options for [`AmiClient::add_listener`](crate::AmiClient::add_listener).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Remove the listener after the first event that passes its filter.
    pub once: bool,
}

impl ListenerOptions {
    /// Fire at most once.
    pub fn once() -> Self {
        Self { once: true }
    }
}

pub(crate) struct Listener {
    id: ListenerId,
    filter: ListenerFilter,
    callback: ListenerCallback,
    once: bool,
    /// Set when a `once` listener claims its single invocation.
    fired: AtomicBool,
}

impl Listener {
    /// Run filter then callback. Returns whether the callback ran.
    fn invoke(&self, event: &Event) -> bool {
        let source = event.source();
        if !(self.filter)(source, &self.id, event) {
            return false;
        }
        // Two concurrent matches may both pass the filter; only one wins.
        if self.once
            && self
                .fired
                .swap(true, Ordering::AcqRel)
        {
            return false;
        }
        (self.callback)(source, &self.id, event);
        true
    }

    fn is_spent(&self) -> bool {
        self.once
            && self
                .fired
                .load(Ordering::Acquire)
    }
}

/// Registered listeners, owned by the connection task.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: HashMap<ListenerId, Arc<Listener>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(
        &mut self,
        filter: ListenerFilter,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> ListenerId {
        let id = ListenerId::generate();
        self.listeners
            .insert(
                id.clone(),
                Arc::new(Listener {
                    id: id.clone(),
                    filter,
                    callback,
                    once: options.once,
                    fired: AtomicBool::new(false),
                }),
            );
        trace!("[LISTENER] Added listener {} (once={})", id, options.once);
        id
    }

    /// Returns whether the listener was registered.
    pub(crate) fn remove(&mut self, id: &ListenerId) -> bool {
        self.listeners
            .remove(id)
            .is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners
            .len()
    }

    /// Hand `event` to every listener, each in its own task.
    ///
    /// Works from a snapshot of the registry, so later `add`/`remove` calls
    /// do not affect invocations already spawned. Once-listeners that fire
    /// report their id on `retired` for removal. Returns the number of
    /// listener tasks spawned.
    pub(crate) fn dispatch(
        &self,
        event: Event,
        retired: &mpsc::UnboundedSender<ListenerId>,
    ) -> usize {
        if self
            .listeners
            .is_empty()
        {
            return 0;
        }

        let event = Arc::new(event);
        let mut spawned = 0;
        for listener in self
            .listeners
            .values()
        {
            if listener.is_spent() {
                continue;
            }
            tokio::spawn(run_listener(
                listener.clone(),
                event.clone(),
                retired.clone(),
            ));
            spawned += 1;
        }
        spawned
    }
}

/// One listener invocation. A panicking filter or callback is logged and
/// goes no further than this task.
async fn run_listener(
    listener: Arc<Listener>,
    event: Arc<Event>,
    retired: mpsc::UnboundedSender<ListenerId>,
) {
    let result = AssertUnwindSafe(async { listener.invoke(&event) })
        .catch_unwind()
        .await;

    match result {
        Ok(true) => trace!("[LISTENER] {} handled '{}'", listener.id, event.name()),
        Ok(false) => {}
        Err(_) => error!(
            "[LISTENER] Listener {} panicked on event '{}'",
            listener.id,
            event.name()
        ),
    }

    if listener.is_spent() {
        let _ = retired.send(
            listener
                .id
                .clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{classify, Message};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn event(name: &str) -> Event {
        let lines = vec![format!("Event: {}", name)];
        match classify("pbx", &lines) {
            Message::Event(e) => e,
            Message::Response(_) => unreachable!(),
        }
    }

    fn filter(f: impl Fn(&str, &ListenerId, &Event) -> bool + Send + Sync + 'static) -> ListenerFilter {
        Arc::new(f)
    }

    fn callback(f: impl Fn(&str, &ListenerId, &Event) + Send + Sync + 'static) -> ListenerCallback {
        Arc::new(f)
    }

    fn counter_callback(counter: Arc<AtomicUsize>) -> ListenerCallback {
        callback(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_filter_selects_events() {
        let mut registry = ListenerRegistry::new();
        let (retired_tx, _retired_rx) = mpsc::unbounded_channel();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.add(
            filter(|_, _, e| e.is("hangup")),
            counter_callback(hits.clone()),
            ListenerOptions::default(),
        );

        registry.dispatch(event("Hangup"), &retired_tx);
        registry.dispatch(event("Newchannel"), &retired_tx);
        registry.dispatch(event("Hangup"), &retired_tx);
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_callback_receives_source_and_id() {
        let mut registry = ListenerRegistry::new();
        let (retired_tx, _retired_rx) = mpsc::unbounded_channel();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let id = registry.add(
            filter(|_, _, _| true),
            callback(move |source, id, e| {
                let _ = seen_tx.send((source.to_string(), id.clone(), e.name().to_string()));
            }),
            ListenerOptions::default(),
        );

        registry.dispatch(event("FullyBooted"), &retired_tx);
        let (source, seen_id, name) = seen_rx
            .recv()
            .await
            .unwrap();
        assert_eq!(source, "pbx");
        assert_eq!(seen_id, id);
        assert_eq!(name, "fullybooted");
    }

    #[tokio::test]
    async fn test_failing_listener_is_isolated() {
        let mut registry = ListenerRegistry::new();
        let (retired_tx, _retired_rx) = mpsc::unbounded_channel();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.add(
            filter(|_, _, _| true),
            callback(|_, _, _| panic!("listener bug")),
            ListenerOptions::default(),
        );
        registry.add(
            filter(|_, _, _| panic!("filter bug")),
            counter_callback(hits.clone()),
            ListenerOptions::default(),
        );
        registry.add(
            filter(|_, _, _| true),
            counter_callback(hits.clone()),
            ListenerOptions::default(),
        );

        assert_eq!(registry.dispatch(event("Hangup"), &retired_tx), 3);
        assert_eq!(registry.dispatch(event("Hangup"), &retired_tx), 3);
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_once_fires_at_most_once() {
        let mut registry = ListenerRegistry::new();
        let (retired_tx, mut retired_rx) = mpsc::unbounded_channel();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = registry.add(
            filter(|_, _, _| true),
            counter_callback(hits.clone()),
            ListenerOptions::once(),
        );

        for _ in 0..5 {
            registry.dispatch(event("Hangup"), &retired_tx);
        }
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            retired_rx
                .recv()
                .await,
            Some(id.clone())
        );
        assert!(registry.remove(&id));
        assert_eq!(registry.dispatch(event("Hangup"), &retired_tx), 0);
    }

    #[tokio::test]
    async fn test_once_not_spent_until_filter_matches() {
        let mut registry = ListenerRegistry::new();
        let (retired_tx, mut retired_rx) = mpsc::unbounded_channel();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.add(
            filter(|_, _, e| e.is("hangup")),
            counter_callback(hits.clone()),
            ListenerOptions::once(),
        );

        registry.dispatch(event("Newchannel"), &retired_tx);
        settle().await;
        assert!(retired_rx
            .try_recv()
            .is_err());

        registry.dispatch(event("Hangup"), &retired_tx);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(retired_rx
            .try_recv()
            .is_ok());
    }

    #[tokio::test]
    async fn test_remove() {
        let mut registry = ListenerRegistry::new();
        let id = registry.add(
            filter(|_, _, _| true),
            callback(|_, _, _| {}),
            ListenerOptions::default(),
        );
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert_eq!(registry.len(), 0);
    }
}
