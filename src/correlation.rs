//! Matching responses and list events to in-flight actions

use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::{
    error::{AmiError, AmiResult},
    event::{Event, Response},
    protocol::Message,
};

/// Where a completed response is delivered.
pub(crate) type Caller = oneshot::Sender<AmiResult<Response>>;

/// One in-flight action.
struct PendingAction {
    /// `None` for actions the connection sends on its own behalf (login).
    caller: Option<Caller>,
    response: Option<Response>,
    /// List events that overtook their response.
    early_events: Vec<Event>,
}

/// Outcome of routing one message through the table.
#[derive(Debug)]
pub(crate) enum Correlated {
    /// Stored against its action; the response is not complete yet.
    Pending,
    /// The response completed and was handed to its caller.
    Delivered { action_id: String },
    /// The response to an internal action completed.
    Completed(Response),
    /// Nothing is waiting for this action id; dropped.
    Orphan,
    /// An event that belongs to no action.
    Unclaimed(Event),
}

/// In-flight actions keyed by action id.
///
/// Owned by the connection task and only touched from its loop.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: HashMap<String, PendingAction>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending
            .len()
    }

    pub(crate) fn contains(&self, action_id: &str) -> bool {
        self.pending
            .contains_key(action_id)
    }

    /// Track an action whose response goes to `caller`.
    pub(crate) fn register(&mut self, action_id: &str, caller: Caller) -> AmiResult<()> {
        self.insert(action_id, Some(caller))
    }

    /// Track an action the connection sent itself.
    pub(crate) fn register_internal(&mut self, action_id: &str) -> AmiResult<()> {
        self.insert(action_id, None)
    }

    fn insert(&mut self, action_id: &str, caller: Option<Caller>) -> AmiResult<()> {
        if self.contains(action_id) {
            return Err(AmiError::DuplicateActionId {
                action_id: action_id.to_string(),
            });
        }
        self.pending
            .insert(
                action_id.to_string(),
                PendingAction {
                    caller,
                    response: None,
                    early_events: Vec::new(),
                },
            );
        Ok(())
    }

    /// Stop tracking an action without resolving it.
    pub(crate) fn forget(&mut self, action_id: &str) {
        self.pending
            .remove(action_id);
    }

    /// Route a classified message.
    pub(crate) fn on_message(&mut self, message: Message) -> Correlated {
        match message {
            Message::Response(response) => self.on_response(response),
            Message::Event(event) => self.on_event(event),
        }
    }

    fn on_response(&mut self, mut response: Response) -> Correlated {
        let action_id = response
            .action_id()
            .to_string();
        let Some(entry) = self
            .pending
            .get_mut(&action_id)
        else {
            debug!("Discarding response for unknown action id '{}'", action_id);
            return Correlated::Orphan;
        };

        // A repeated response replaces the first but keeps its events.
        if let Some(previous) = entry
            .response
            .take()
        {
            response.events = previous.events;
        }
        for event in entry
            .early_events
            .drain(..)
        {
            response.add_event(event);
        }
        entry.response = Some(response);

        self.finish_if_complete(&action_id)
    }

    fn on_event(&mut self, event: Event) -> Correlated {
        let Some(action_id) = event
            .action_id()
            .map(str::to_string)
        else {
            return Correlated::Unclaimed(event);
        };
        let Some(entry) = self
            .pending
            .get_mut(&action_id)
        else {
            return Correlated::Unclaimed(event);
        };

        match entry
            .response
            .as_mut()
        {
            Some(response) => response.add_event(event),
            None => {
                trace!("Event for '{}' arrived before its response", action_id);
                entry
                    .early_events
                    .push(event);
                return Correlated::Pending;
            }
        }

        self.finish_if_complete(&action_id)
    }

    fn finish_if_complete(&mut self, action_id: &str) -> Correlated {
        let complete = self
            .pending
            .get(action_id)
            .and_then(|entry| {
                entry
                    .response
                    .as_ref()
            })
            .is_some_and(Response::is_complete);
        if !complete {
            return Correlated::Pending;
        }

        let Some(entry) = self
            .pending
            .remove(action_id)
        else {
            return Correlated::Pending;
        };
        let Some(response) = entry.response else {
            return Correlated::Pending;
        };

        match entry.caller {
            Some(caller) => {
                if caller
                    .send(Ok(response))
                    .is_err()
                {
                    debug!("Caller for '{}' went away before the response", action_id);
                }
                Correlated::Delivered {
                    action_id: action_id.to_string(),
                }
            }
            None => Correlated::Completed(response),
        }
    }

    /// Resolve every in-flight action with an error and clear the table.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> AmiError) {
        for (action_id, entry) in self
            .pending
            .drain()
        {
            if let Some(caller) = entry.caller {
                trace!("Failing in-flight action '{}'", action_id);
                let _ = caller.send(Err(error()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::classify;

    fn msg(lines: &[&str]) -> Message {
        let lines: Vec<String> = lines
            .iter()
            .map(|s| s.to_string())
            .collect();
        classify("pbx", &lines)
    }

    #[test]
    fn test_response_resolves_caller() {
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table
            .register("1", tx)
            .unwrap();

        let out = table.on_message(msg(&["Response: Success", "ActionID: 1", "Ping: Pong"]));
        assert!(matches!(out, Correlated::Delivered { ref action_id } if action_id == "1"));
        assert_eq!(table.len(), 0);

        let response = rx
            .try_recv()
            .unwrap()
            .unwrap();
        assert_eq!(response.key("ping"), Some("Pong"));
    }

    #[test]
    fn test_event_list_aggregation() {
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table
            .register("9", tx)
            .unwrap();

        let out = table.on_message(msg(&[
            "Response: Success",
            "ActionID: 9",
            "EventList: start",
        ]));
        assert!(matches!(out, Correlated::Pending));

        for peer in ["100", "101", "102"] {
            let line = format!("ObjectName: {}", peer);
            let out = table.on_message(msg(&["Event: PeerEntry", "ActionID: 9", &line]));
            assert!(matches!(out, Correlated::Pending));
            assert!(rx
                .try_recv()
                .is_err());
        }

        let out = table.on_message(msg(&[
            "Event: PeerlistComplete",
            "ActionID: 9",
            "EventList: Complete",
        ]));
        assert!(matches!(out, Correlated::Delivered { .. }));

        let response = rx
            .try_recv()
            .unwrap()
            .unwrap();
        assert!(response.is_complete());
        let names: Vec<_> = response
            .events()
            .iter()
            .map(|e| e.key("objectname"))
            .collect();
        assert_eq!(names, vec![Some("100"), Some("101"), Some("102"), None]);
        assert_eq!(
            response.events()[3].name(),
            "peerlistcomplete"
        );
    }

    #[test]
    fn test_orphans_are_discarded() {
        let mut table = CorrelationTable::new();
        assert!(matches!(
            table.on_message(msg(&["Response: Success", "ActionID: nobody"])),
            Correlated::Orphan
        ));
        assert!(matches!(
            table.on_message(msg(&["Response: Success"])),
            Correlated::Orphan
        ));
    }

    #[test]
    fn test_unclaimed_events() {
        let mut table = CorrelationTable::new();
        let out = table.on_message(msg(&["Event: Hangup", "Channel: SIP/100"]));
        let Correlated::Unclaimed(event) = out else {
            panic!("expected unclaimed event");
        };
        assert_eq!(event.name(), "hangup");

        let out = table.on_message(msg(&["Event: PeerEntry", "ActionID: stale"]));
        assert!(matches!(out, Correlated::Unclaimed(_)));
    }

    #[test]
    fn test_early_events_attached_in_order() {
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table
            .register("e", tx)
            .unwrap();

        assert!(matches!(
            table.on_message(msg(&["Event: A", "ActionID: e"])),
            Correlated::Pending
        ));
        assert!(matches!(
            table.on_message(msg(&["Event: B", "ActionID: e", "EventList: Complete"])),
            Correlated::Pending
        ));
        assert!(matches!(
            table.on_message(msg(&["Response: Success", "ActionID: e", "EventList: start"])),
            Correlated::Delivered { .. }
        ));

        let response = rx
            .try_recv()
            .unwrap()
            .unwrap();
        let names: Vec<_> = response
            .events()
            .iter()
            .map(Event::name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_late_duplicate_response_is_orphan() {
        let mut table = CorrelationTable::new();
        let (tx, _rx) = oneshot::channel();
        table
            .register("1", tx)
            .unwrap();
        table.on_message(msg(&["Response: Success", "ActionID: 1"]));
        assert!(matches!(
            table.on_message(msg(&["Response: Success", "ActionID: 1"])),
            Correlated::Orphan
        ));
    }

    #[test]
    fn test_dropped_caller_is_not_an_error() {
        let mut table = CorrelationTable::new();
        let (tx, rx) = oneshot::channel();
        drop(rx);
        table
            .register("1", tx)
            .unwrap();
        assert!(matches!(
            table.on_message(msg(&["Response: Success", "ActionID: 1"])),
            Correlated::Delivered { .. }
        ));
    }

    #[test]
    fn test_internal_action_completes() {
        let mut table = CorrelationTable::new();
        table
            .register_internal("login")
            .unwrap();
        let out = table.on_message(msg(&[
            "Response: Error",
            "ActionID: login",
            "Message: Authentication failed",
        ]));
        let Correlated::Completed(response) = out else {
            panic!("expected completed internal response");
        };
        assert!(!response.is_success());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut table = CorrelationTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        table
            .register("dup", tx1)
            .unwrap();
        assert!(matches!(
            table.register("dup", tx2),
            Err(AmiError::DuplicateActionId { .. })
        ));
    }

    #[test]
    fn test_fail_all() {
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table
            .register("1", tx)
            .unwrap();
        table
            .register_internal("login")
            .unwrap();

        table.fail_all(|| AmiError::ConnectionLost);
        assert_eq!(table.len(), 0);
        assert!(matches!(
            rx.try_recv()
                .unwrap(),
            Err(AmiError::ConnectionLost)
        ));
    }
}
