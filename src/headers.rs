//! Typed names for the reserved AMI keys and their well-known values.

define_wire_enum! {
    /// Keys the client interprets itself rather than passing through in the
    /// generic key map.
    ///
    /// Wire names are the case-folded form; incoming keys are lower-cased
    /// before lookup.
    pub enum AmiHeader: ParseAmiHeaderError("reserved header") {
        ActionId => "actionid",
        Action => "action",
        Event => "event",
        Response => "response",
        EventList => "eventlist",
        Variable => "variable",
        Message => "message",
    }
}

define_wire_enum! {
    /// Values seen in the `Response:` key.
    ///
    /// Parsing is lenient about case. Deciding whether a Response succeeded
    /// compares against [`ResponseStatus::Success`]'s exact literal instead.
    pub enum ResponseStatus: ParseResponseStatusError("response status") {
        Success => "Success",
        Error => "Error",
        Follows => "Follows",
        Goodbye => "Goodbye",
    }
}

define_wire_enum! {
    /// Values of the `EventList:` key.
    pub enum EventListMarker: ParseEventListError("eventlist marker") {
        /// On a Response: related events follow.
        Start => "start",
        /// On the last event of the list.
        Complete => "Complete",
        /// The switch aborted the list.
        Cancelled => "Cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_wire_name() {
        assert_eq!(AmiHeader::ActionId.to_string(), "actionid");
        assert_eq!(AmiHeader::EventList.to_string(), "eventlist");
        assert_eq!(ResponseStatus::Success.to_string(), "Success");
        assert_eq!(EventListMarker::Complete.as_str(), "Complete");
    }

    #[test]
    fn from_str_case_insensitive() {
        assert_eq!("ActionID".parse::<AmiHeader>(), Ok(AmiHeader::ActionId));
        assert_eq!("EVENTLIST".parse::<AmiHeader>(), Ok(AmiHeader::EventList));
        assert_eq!(
            "success".parse::<ResponseStatus>(),
            Ok(ResponseStatus::Success)
        );
        assert_eq!(
            "complete".parse::<EventListMarker>(),
            Ok(EventListMarker::Complete)
        );
    }

    #[test]
    fn from_str_unknown() {
        let err = "Channel".parse::<AmiHeader>();
        assert_eq!(
            err.unwrap_err()
                .to_string(),
            "unknown reserved header: Channel"
        );
        assert_eq!(
            "Maybe"
                .parse::<ResponseStatus>()
                .unwrap_err()
                .to_string(),
            "unknown response status: Maybe"
        );
    }

    #[test]
    fn all_lists_variants_in_order() {
        assert_eq!(
            EventListMarker::ALL,
            &[
                EventListMarker::Start,
                EventListMarker::Complete,
                EventListMarker::Cancelled
            ]
        );
        for header in AmiHeader::ALL {
            assert_eq!(
                header
                    .as_str()
                    .parse::<AmiHeader>(),
                Ok(*header)
            );
        }
    }
}
