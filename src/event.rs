//! Events and responses received from the switch

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    error::{AmiError, AmiResult},
    headers::{EventListMarker, ResponseStatus},
};

/// An asynchronous notification from the switch.
///
/// Keys are case-folded on receipt; the reserved `event` and `actionid` keys
/// are lifted into fields and `Variable: name=value` lines land in
/// [`variables`](Self::variables). Lookups through [`key`](Self::key) are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub(crate) event: String,
    pub(crate) source: String,
    pub(crate) action_id: Option<String>,
    pub(crate) keys: HashMap<String, String>,
    pub(crate) variables: HashMap<String, String>,
}

impl Event {
    pub(crate) fn new(event: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            source: source.into(),
            action_id: None,
            keys: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Lower-cased event name, e.g. `peerstatus`.
    pub fn name(&self) -> &str {
        &self.event
    }

    /// Identifier of the connection that received the event.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `ActionID` if the event belongs to an action's event list.
    pub fn action_id(&self) -> Option<&str> {
        self.action_id
            .as_deref()
    }

    /// Look up a key (case-insensitive).
    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// All non-reserved keys, lower-cased.
    pub fn keys(&self) -> &HashMap<String, String> {
        &self.keys
    }

    /// Look up a channel variable (case-sensitive, as sent).
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables
            .get(name)
            .map(|s| s.as_str())
    }

    /// All channel variables.
    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    /// Parsed `EventList` key, if present and recognized.
    pub fn event_list(&self) -> Option<EventListMarker> {
        self.key("eventlist")?
            .parse()
            .ok()
    }

    /// True on the event that closes an action's event list.
    pub fn is_list_complete(&self) -> bool {
        self.event_list() == Some(EventListMarker::Complete)
    }

    /// Check the event name (case-insensitive).
    pub fn is(&self, name: &str) -> bool {
        self.event
            .eq_ignore_ascii_case(name)
    }
}

/// The reply to an [`Action`](crate::Action), with any events that were
/// sent as part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub(crate) action_id: String,
    pub(crate) source: String,
    pub(crate) success: bool,
    pub(crate) complete: bool,
    pub(crate) keys: HashMap<String, String>,
    pub(crate) variables: HashMap<String, String>,
    pub(crate) events: Vec<Event>,
}

impl Response {
    pub(crate) fn new(action_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            source: source.into(),
            success: false,
            complete: true,
            keys: HashMap::new(),
            variables: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Append an event from this response's list. The event carrying
    /// `EventList: Complete` marks the response complete.
    pub(crate) fn add_event(&mut self, event: Event) {
        if event.is_list_complete() {
            self.complete = true;
        }
        self.events
            .push(event);
    }

    /// Identifier of the action this answers.
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Identifier of the connection that received the response.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `Response: Success`.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// False while an announced event list is still arriving. Callers only
    /// ever see complete responses.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Look up a key (case-insensitive).
    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// All non-reserved keys, lower-cased.
    pub fn keys(&self) -> &HashMap<String, String> {
        &self.keys
    }

    /// Look up a channel variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables
            .get(name)
            .map(|s| s.as_str())
    }

    /// All channel variables.
    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    /// `Message` key, usually a human-readable status.
    pub fn message(&self) -> Option<&str> {
        self.key("message")
    }

    /// Events attached to this response, in receipt order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Take the attached events.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Convert to result based on success status.
    ///
    /// `Response: Error` (or anything other than `Success`) becomes
    /// [`AmiError::ActionFailed`] carrying the `Message` key.
    pub fn into_result(self) -> AmiResult<Self> {
        if self.success {
            return Ok(self);
        }
        let message = self
            .message()
            .unwrap_or(ResponseStatus::Error.as_str())
            .to_string();
        Err(AmiError::ActionFailed { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_event(marker: Option<&str>) -> Event {
        let mut event = Event::new("peerentry", "pbx");
        event.action_id = Some("7".into());
        if let Some(m) = marker {
            event
                .keys
                .insert("eventlist".into(), m.into());
        }
        event
    }

    #[test]
    fn test_key_lookup_case_insensitive() {
        let mut event = Event::new("newchannel", "pbx");
        event
            .keys
            .insert("channel".into(), "SIP/100-0001".into());
        assert_eq!(event.key("Channel"), Some("SIP/100-0001"));
        assert_eq!(event.key("CHANNEL"), Some("SIP/100-0001"));
        assert!(event.is("NewChannel"));
    }

    #[test]
    fn test_add_event_completes_on_marker() {
        let mut response = Response::new("7", "pbx");
        response.complete = false;

        response.add_event(list_event(None));
        assert!(!response.is_complete());

        response.add_event(list_event(Some("Complete")));
        assert!(response.is_complete());
        assert_eq!(
            response
                .events()
                .len(),
            2
        );
    }

    #[test]
    fn test_add_event_ignores_other_markers() {
        let mut response = Response::new("7", "pbx");
        response.complete = false;
        response.add_event(list_event(Some("start")));
        assert!(!response.is_complete());
    }

    #[test]
    fn test_into_result() {
        let mut ok = Response::new("1", "pbx");
        ok.success = true;
        assert!(ok
            .into_result()
            .is_ok());

        let mut failed = Response::new("2", "pbx");
        failed
            .keys
            .insert("message".into(), "Authentication failed".into());
        match failed.into_result() {
            Err(AmiError::ActionFailed { message }) => {
                assert_eq!(message, "Authentication failed")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_response_serializes() {
        let mut response = Response::new("1", "pbx");
        response.success = true;
        response
            .keys
            .insert("ping".into(), "Pong".into());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["action_id"], "1");
        assert_eq!(json["keys"]["ping"], "Pong");
        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
