//! Actions sent to the switch and their wire format

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{
    constants::LINE_TERMINATOR,
    error::{AmiError, AmiResult},
    headers::AmiHeader,
};

/// Validate that a user-provided string contains no line breaks.
///
/// AMI is line-delimited; an embedded CR or LF would let a value smuggle in
/// extra keys or a whole second action.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::protocol_error(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

fn validate_key(key: &str, context: &str) -> AmiResult<()> {
    validate_no_newlines(key, context)?;
    if key.is_empty() || key.contains(':') {
        return Err(AmiError::protocol_error(format!(
            "{} must be non-empty and must not contain ':'",
            context
        )));
    }
    Ok(())
}

/// A request to the switch.
///
/// Build one right before sending; the identifier is a fresh UUID unless
/// [`with_id`](Self::with_id) sets one.
///
/// ```
/// use asterisk_ami_tokio::Action;
///
/// let action = Action::new("Originate")
///     .with_id("call-1")
///     .key("Channel", "PJSIP/100")
///     .key("Timeout", 30000)
///     .key_opt("CallerID", None::<&str>)
///     .variable("CDR(userfield)", "vip");
///
/// let wire = action.to_wire_format().unwrap();
/// assert!(wire.starts_with("actionid: call-1\r\naction: Originate\r\n"));
/// assert!(wire.contains("Timeout: 30000\r\n"));
/// assert!(!wire.contains("CallerID"));
/// assert!(wire.ends_with("Variable: CDR(userfield)=vip\r\n\r\n"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    id: String,
    name: String,
    keys: BTreeMap<String, Option<String>>,
    variables: BTreeMap<String, String>,
}

impl Action {
    /// New action with a generated identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            keys: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }

    /// `Login` with the given credentials. `events` maps to `Events: on|off`.
    pub fn login(username: &str, secret: &str, events: bool) -> Self {
        Self::new("Login")
            .key("Username", username)
            .key("Secret", secret)
            .key("Events", if events { "on" } else { "off" })
    }

    /// `Ping`; the switch answers with `Ping: Pong`.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// Replace the generated identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set a key.
    pub fn key(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.keys
            .insert(name.into(), Some(value.to_string()));
        self
    }

    /// Set a key that may be absent. `None` keys are left off the wire.
    pub fn key_opt(mut self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        self.keys
            .insert(name.into(), value.map(|v| v.to_string()));
        self
    }

    /// Set a channel variable, sent as `Variable: name=value`.
    pub fn variable(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.variables
            .insert(name.into(), value.to_string());
        self
    }

    /// Action identifier, echoed by the switch as `ActionID`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Action name, e.g. `Ping`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of a key, `None` if unset or set to null.
    pub fn get_key(&self, name: &str) -> Option<&str> {
        self.keys
            .get(name)?
            .as_deref()
    }

    /// All keys, including null ones.
    pub fn keys(&self) -> &BTreeMap<String, Option<String>> {
        &self.keys
    }

    /// All variables.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Validate all fields, then serialize to the wire format, blank line
    /// included.
    pub fn to_wire_format(&self) -> AmiResult<String> {
        use std::fmt::Write;

        validate_no_newlines(&self.id, "action id")?;
        validate_no_newlines(&self.name, "action name")?;
        if self
            .id
            .is_empty()
        {
            return Err(AmiError::protocol_error("action id must not be empty"));
        }

        let mut result = String::new();
        let _ = write!(
            result,
            "{}: {}{}",
            AmiHeader::ActionId,
            self.id,
            LINE_TERMINATOR
        );
        let _ = write!(
            result,
            "{}: {}{}",
            AmiHeader::Action,
            self.name,
            LINE_TERMINATOR
        );

        for (key, value) in &self.keys {
            let Some(value) = value else {
                continue;
            };
            validate_key(key, "action key")?;
            validate_no_newlines(value, "action value")?;
            let _ = write!(result, "{}: {}{}", key, value, LINE_TERMINATOR);
        }

        for (key, value) in &self.variables {
            validate_key(key, "variable name")?;
            validate_no_newlines(value, "variable value")?;
            let _ = write!(result, "Variable: {}={}{}", key, value, LINE_TERMINATOR);
        }

        result.push_str(LINE_TERMINATOR);
        Ok(result)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: BTreeMap<&str, Option<&str>> = self
            .keys
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("secret") {
                    (k.as_str(), Some("[REDACTED]"))
                } else {
                    (k.as_str(), v.as_deref())
                }
            })
            .collect();
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("keys", &keys)
            .field("variables", &self.variables)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_exact() {
        let wire = Action::new("Status")
            .with_id("42")
            .key("Channel", "SIP/100-0001")
            .to_wire_format()
            .unwrap();
        assert_eq!(
            wire,
            "actionid: 42\r\naction: Status\r\nChannel: SIP/100-0001\r\n\r\n"
        );
    }

    #[test]
    fn test_null_keys_omitted() {
        let wire = Action::new("Originate")
            .with_id("1")
            .key_opt("Account", None::<String>)
            .key_opt("Async", Some(true))
            .to_wire_format()
            .unwrap();
        assert!(!wire.contains("Account"));
        assert!(wire.contains("Async: true\r\n"));
    }

    #[test]
    fn test_variables_after_keys() {
        let wire = Action::new("Originate")
            .with_id("1")
            .variable("foo", "bar")
            .key("Exten", 100)
            .to_wire_format()
            .unwrap();
        let exten = wire
            .find("Exten: 100")
            .unwrap();
        let var = wire
            .find("Variable: foo=bar\r\n")
            .unwrap();
        assert!(exten < var);
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_login_keys() {
        let login = Action::login("admin", "pw", false);
        assert_eq!(login.name(), "Login");
        assert_eq!(login.get_key("Username"), Some("admin"));
        assert_eq!(login.get_key("Secret"), Some("pw"));
        assert_eq!(login.get_key("Events"), Some("off"));
    }

    #[test]
    fn test_generated_ids_unique() {
        assert_ne!(Action::ping().id(), Action::ping().id());
    }

    #[test]
    fn test_rejects_newline_injection() {
        let err = Action::new("Command")
            .key("Command", "core show uptime\r\nAction: Logoff")
            .to_wire_format()
            .unwrap_err();
        assert!(matches!(err, AmiError::ProtocolError { .. }));

        assert!(Action::new("Ping\n")
            .to_wire_format()
            .is_err());
        assert!(Action::new("Setvar")
            .variable("a\nb", "c")
            .to_wire_format()
            .is_err());
    }

    #[test]
    fn test_rejects_colon_in_key() {
        assert!(Action::new("Ping")
            .key("Bad:Key", "x")
            .to_wire_format()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", Action::login("admin", "hunter2", true));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("admin"));
    }
}
