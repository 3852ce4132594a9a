//! AMI message framing and classification
//!
//! The wire carries CRLF-terminated `key: value` lines; a blank line ends a
//! message. Responses and events share the same grammar and are told apart
//! only by the presence of a `Response` key.

use std::collections::HashMap;

use crate::{
    constants::LINE_TERMINATOR,
    error::{AmiError, AmiResult},
    event::{Event, Response},
    headers::{AmiHeader, EventListMarker, ResponseStatus},
};

/// A classified message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Message {
    Event(Event),
    Response(Response),
}

impl Message {
    pub(crate) fn action_id(&self) -> Option<&str> {
        match self {
            Message::Event(event) => event.action_id(),
            Message::Response(response) => Some(response.action_id()),
        }
    }
}

/// Strip the trailing line terminator. A bare `\n` is tolerated.
fn strip_terminator(line: &str) -> &str {
    line.strip_suffix(LINE_TERMINATOR)
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Accumulates lines into message blocks.
#[derive(Debug, Default)]
pub(crate) struct LineFramer {
    lines: Vec<String>,
}

impl LineFramer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one line as read from the socket, terminator included.
    ///
    /// Returns the accumulated lines, oldest first, when `line` is the blank
    /// terminator. A blank line with nothing accumulated yields nothing.
    ///
    /// A line without a colon is rejected with [`AmiError::InvalidHeader`]
    /// and not kept; the message being accumulated is unaffected.
    pub(crate) fn feed(&mut self, line: &str) -> AmiResult<Option<Vec<String>>> {
        let line = strip_terminator(line);

        if line.is_empty() {
            if self
                .lines
                .is_empty()
            {
                return Ok(None);
            }
            return Ok(Some(std::mem::take(&mut self.lines)));
        }

        if !line.contains(':') {
            return Err(AmiError::InvalidHeader {
                header: line.to_string(),
            });
        }

        self.lines
            .push(line.to_string());
        Ok(None)
    }

    /// Drop any partial message, e.g. after the socket closed mid-message.
    pub(crate) fn reset(&mut self) {
        self.lines
            .clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.lines
            .is_empty()
    }
}

/// Turn a framed block of `key: value` lines into an [`Event`] or a
/// [`Response`].
///
/// Lines are split at the first colon with both sides trimmed; keys are
/// lower-cased. Lines the framer would have rejected are skipped.
pub(crate) fn classify(source: &str, lines: &[String]) -> Message {
    let mut action_id = None;
    let mut event_name = None;
    let mut response_status = None;
    let mut event_list = None;
    let mut keys = HashMap::new();
    let mut variables = HashMap::new();

    for line in lines {
        let Some((raw_key, raw_value)) = line.split_once(':') else {
            continue;
        };
        let key = raw_key
            .trim()
            .to_ascii_lowercase();
        let value = raw_value
            .trim()
            .to_string();

        match key.parse::<AmiHeader>() {
            Ok(AmiHeader::ActionId) => action_id = Some(value),
            Ok(AmiHeader::Event) => event_name = Some(value),
            Ok(AmiHeader::Response) => response_status = Some(value),
            Ok(AmiHeader::EventList) => event_list = Some(value),
            Ok(AmiHeader::Variable) => match value.split_once('=') {
                Some((name, val)) => {
                    variables.insert(name.to_string(), val.to_string());
                }
                None => {
                    keys.insert(key, value);
                }
            },
            _ => {
                keys.insert(key, value);
            }
        }
    }

    // The one place the two message kinds are told apart.
    match response_status {
        Some(status) => {
            let mut response = Response::new(action_id.unwrap_or_default(), source);
            // Exact, case-sensitive token. `success` in any other case is a failure.
            response.success = status == ResponseStatus::Success.as_str();
            // Announcing a list means the terminal event is still to come. A
            // `Complete` marker on the Response itself says nothing follows, so
            // it stays complete rather than waiting for an event that never comes.
            response.complete = match event_list.as_deref() {
                None => true,
                Some(marker) => marker.parse::<EventListMarker>() == Ok(EventListMarker::Complete),
            };
            if let Some(name) = event_name {
                keys.insert(AmiHeader::Event.to_string(), name);
            }
            response.keys = keys;
            response.variables = variables;
            Message::Response(response)
        }
        None => {
            let mut event = Event::new(
                event_name
                    .unwrap_or_default()
                    .to_ascii_lowercase(),
                source,
            );
            event.action_id = action_id;
            if let Some(marker) = event_list {
                keys.insert(AmiHeader::EventList.to_string(), marker);
            }
            event.keys = keys;
            event.variables = variables;
            Message::Event(event)
        }
    }
}
