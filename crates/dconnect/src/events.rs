use alloc::string::String;

use core::fmt;

use serde::Serialize;

use crate::api::ApiPath;
use crate::normalize;
use crate::response::ResultParameters;

/// The key of an event stream: a service, one of its profiles and the
/// position of the event API inside that profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct EventKey {
    /// Service identifier.
    pub service_id: String,
    /// Profile name.
    pub profile: String,
    /// Event API path.
    #[serde(flatten)]
    pub path: ApiPath,
}

impl EventKey {
    /// Creates an [`EventKey`].
    #[must_use]
    #[inline]
    pub fn new(service_id: &str, profile: &str, path: ApiPath) -> Self {
        Self {
            service_id: String::from(service_id),
            profile: normalize(profile),
            path,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.service_id, self.profile, self.path)
    }
}

/// An asynchronous event message delivered to a subscribed origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct EventMessage {
    /// The event stream which raised the message.
    #[serde(flatten)]
    pub key: EventKey,
    /// Event payload.
    pub payload: ResultParameters,
}

impl EventMessage {
    /// Creates an [`EventMessage`].
    #[must_use]
    #[inline]
    pub const fn new(key: EventKey, payload: ResultParameters) -> Self {
        Self { key, payload }
    }

    /// Returns the identifier of the service which raised the message.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.key.service_id
    }

    /// Returns the profile name.
    #[must_use]
    pub fn profile(&self) -> &str {
        &self.key.profile
    }

    /// Returns the event API path.
    #[must_use]
    pub const fn path(&self) -> &ApiPath {
        &self.key.path
    }
}

impl fmt::Display for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event: \"{}\"", self.key)?;
        for (name, value) in self.payload.iter() {
            writeln!(f, "  {name}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use crate::api::ApiPath;
    use crate::response::ResultParameters;

    use super::{EventKey, EventMessage};

    fn on_change() -> EventMessage {
        EventMessage::new(
            EventKey::new("hue.1", "Light", ApiPath::attribute("onChange")),
            ResultParameters::new().with("on", true),
        )
    }

    #[test]
    fn test_event_message() {
        let message = on_change();

        assert_eq!(message.service_id(), "hue.1");
        assert_eq!(message.profile(), "light");
        assert_eq!(message.path(), &ApiPath::attribute("onchange"));
        assert_eq!(
            message.to_string(),
            "Event: \"hue.1/light/onchange\"\n  on: true\n"
        );
    }

    #[cfg(feature = "deserialize")]
    #[test]
    fn test_event_message_serde() {
        use crate::{deserialize, serialize};

        let message = on_change();

        assert_eq!(
            serialize(&message),
            serde_json::json!({
                "serviceId": "hue.1",
                "profile": "light",
                "attribute": "onchange",
                "payload": { "on": true },
            })
        );
        assert_eq!(deserialize::<EventMessage>(serialize(&message)), message);
    }
}
