pub const TOPIC_STATE_PREFIX: &str = "zoning/state/";
pub const TOPIC_STATE_WILDCARD: &str = "zoning/state/+";

pub const TOPIC_CMD_PREFIX: &str = "zoning/cmnd/";

pub const TOPIC_CONTROLLER_STATE: &str = "zoning/controller/state";
pub const TOPIC_CONTROLLER_THERMOSTAT_PREFIX: &str = "zoning/controller/thermostat/";

pub fn state_entity_id(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_STATE_PREFIX)
        .filter(|entity_id| !entity_id.is_empty() && !entity_id.contains('/'))
}

pub fn command_topic(domain: &str, service: &str) -> String {
    format!("{TOPIC_CMD_PREFIX}{domain}/{service}")
}

pub fn thermostat_topic(entity_id: &str) -> String {
    format!("{TOPIC_CONTROLLER_THERMOSTAT_PREFIX}{entity_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_entity_from_state_topic() {
        assert_eq!(
            state_entity_id("zoning/state/sensor.hall_temperature"),
            Some("sensor.hall_temperature")
        );
        assert_eq!(state_entity_id("zoning/state/"), None);
        assert_eq!(state_entity_id("zoning/state/a/b"), None);
        assert_eq!(state_entity_id("zoning/cmnd/cover/open_cover"), None);
        assert_eq!(command_topic("cover", "open_cover"), "zoning/cmnd/cover/open_cover");
    }
}
