/// Which module a topic prefix is derived for (§6: "two prefixes per
/// module instance, derived from `{module_id, "evse_board_support"|
/// "ev_board_support"|"over_voltage_monitor"}`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    EvseBoardSupport,
    EvBoardSupport,
    OverVoltageMonitor,
}

impl ModuleKind {
    const fn segment(self) -> &'static str {
        match self {
            ModuleKind::EvseBoardSupport => "evse_board_support",
            ModuleKind::EvBoardSupport => "ev_board_support",
            ModuleKind::OverVoltageMonitor => "over_voltage_monitor",
        }
    }
}

/// Builds the `{prefix}` a module instance subscribes/publishes under.
/// The bridge subscribes to `${prefix}#` and publishes to
/// `${prefix}<operation_or_event>` (§6).
pub fn prefix(module_id: &str, kind: ModuleKind) -> String {
    format!("{module_id}/{}/", kind.segment())
}

/// `${prefix}#` subscription filter for inbound operations.
pub fn subscribe_filter(module_id: &str, kind: ModuleKind) -> String {
    format!("{}#", prefix(module_id, kind))
}

/// `${prefix}<name>` publish topic for an outbound event/telemetry name.
pub fn publish_topic(module_id: &str, kind: ModuleKind, name: &str) -> String {
    format!("{}{name}", prefix(module_id, kind))
}

/// The operation name is the topic suffix after `prefix`; `None` if
/// `topic` does not start with `prefix` at all (should not happen for
/// anything delivered under our own subscription, but callers should
/// not panic on a foreign retained message).
pub fn operation_name<'a>(topic: &'a str, module_id: &str, kind: ModuleKind) -> Option<&'a str> {
    topic.strip_prefix(prefix(module_id, kind).as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_prefix_and_strips_it_back_off() {
        let p = prefix("cb-07", ModuleKind::EvseBoardSupport);
        assert_eq!(p, "cb-07/evse_board_support/");
        assert_eq!(subscribe_filter("cb-07", ModuleKind::EvseBoardSupport), "cb-07/evse_board_support/#");
        let topic = publish_topic("cb-07", ModuleKind::EvseBoardSupport, "capabilities");
        assert_eq!(topic, "cb-07/evse_board_support/capabilities");
        assert_eq!(
            operation_name(&topic, "cb-07", ModuleKind::EvseBoardSupport),
            Some("capabilities")
        );
    }
}
