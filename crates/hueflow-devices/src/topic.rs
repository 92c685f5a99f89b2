/*!
 * Topic layout and routing.
 *
 * Every light attribute lives under
 * `<Namespace>/<BridgeName>/Device/<deviceId>/<attribute>`. Discovery
 * messages use the same path behind a `New/` prefix, commands append a
 * `Set` segment, and a pairing request ends in `<address>/Register`.
 */

/// Segment separating the bridge name from the device id
pub const DEVICE_SEGMENT: &str = "Device";

/// Segment under which bridge-level services (pairing) live
pub const SERVICE_SEGMENT: &str = "Service";

/// Prefix of discovery topics
pub const DISCOVERY_PREFIX: &str = "New";

/// Final segment of a command topic
pub const SET_VERB: &str = "Set";

/// Final segment of a pairing request
pub const REGISTER_VERB: &str = "Register";

/// Where an inbound message should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Apply the payload to an attribute of a device
    Command {
        /// Target device
        device_id: String,
        /// Target attribute
        attribute: String,
    },
    /// Start pairing with the bridge at `address`
    Register {
        /// Bridge network address
        address: String,
    },
    /// Not addressed to the bridge (including its own state echoes)
    Ignored,
}

/// Classify a topic by its trailing segments
pub fn route(topic: &str) -> Route {
    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        [.., address, verb] if *verb == REGISTER_VERB && !address.is_empty() => Route::Register {
            address: (*address).to_string(),
        },
        [.., device_id, attribute, verb]
            if *verb == SET_VERB && !device_id.is_empty() && !attribute.is_empty() =>
        {
            Route::Command {
                device_id: (*device_id).to_string(),
                attribute: (*attribute).to_string(),
            }
        }
        _ => Route::Ignored,
    }
}

/// Make a name safe to use as a single topic segment
///
/// Separators and wildcards are replaced with `_`.
pub fn sanitize_segment(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c => c,
        })
        .collect()
}

/// Topic prefix of one device
pub fn device_path(namespace: &str, bridge_name: &str, device_id: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        namespace,
        sanitize_segment(bridge_name),
        DEVICE_SEGMENT,
        sanitize_segment(device_id)
    )
}

/// Filter matching pairing requests for a namespace
pub fn register_filter(namespace: &str) -> String {
    format!("{}/{}/+/{}", namespace, SERVICE_SEGMENT, REGISTER_VERB)
}

/// Discovery topic for a state topic
pub fn discovery_topic(state_topic: &str) -> String {
    format!("{}/{}", DISCOVERY_PREFIX, state_topic)
}

/// Whether `topic` matches the subscription `filter`
///
/// Implements the MQTT wildcard rules: `+` matches one level, a trailing `#`
/// matches the parent level and everything below it.
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_command() {
        assert_eq!(
            route("Hue/Philips hue/Device/Kitchen/On/Set"),
            Route::Command {
                device_id: "Kitchen".to_string(),
                attribute: "On".to_string()
            }
        );
        assert_eq!(
            route("Kitchen/XY Color/Set"),
            Route::Command {
                device_id: "Kitchen".to_string(),
                attribute: "XY Color".to_string()
            }
        );
    }

    #[test]
    fn test_route_register() {
        assert_eq!(
            route("Hue/Service/192.168.1.20/Register"),
            Route::Register {
                address: "192.168.1.20".to_string()
            }
        );
        assert_eq!(route("Register"), Route::Ignored);
        assert_eq!(route("/Register"), Route::Ignored);
    }

    #[test]
    fn test_route_ignored() {
        assert_eq!(route("Hue/Philips hue/Device/Kitchen/On"), Route::Ignored);
        assert_eq!(route("On/Set"), Route::Ignored);
        assert_eq!(route("Set"), Route::Ignored);
        assert_eq!(route(""), Route::Ignored);
        assert_eq!(route("Hue/Device//On/Set"), Route::Ignored);
    }

    #[test]
    fn test_device_path() {
        assert_eq!(
            device_path("Hue", "Philips hue", "Desk/Lamp #2"),
            "Hue/Philips hue/Device/Desk_Lamp _2"
        );
        assert_eq!(register_filter("Hue"), "Hue/Service/+/Register");
        assert_eq!(discovery_topic("Hue/B/Device/L/On"), "New/Hue/B/Device/L/On");
    }

    #[test]
    fn test_matches_filter() {
        assert!(matches_filter("Hue/B/Device/L/#", "Hue/B/Device/L/On/Set"));
        assert!(matches_filter("Hue/B/Device/L/#", "Hue/B/Device/L"));
        assert!(!matches_filter("Hue/B/Device/L/#", "Hue/B/Device/Other/On"));
        assert!(matches_filter("Hue/Service/+/Register", "Hue/Service/10.0.0.2/Register"));
        assert!(!matches_filter("Hue/Service/+/Register", "Hue/Service/a/b/Register"));
        assert!(matches_filter("a/b", "a/b"));
        assert!(!matches_filter("a/b", "a/b/c"));
    }
}
