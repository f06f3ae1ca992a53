//! Static table of the device capabilities the gateway exposes.
//!
//! Plain records only; everything derived from them (schemas, mapping formulas, value kinds) lives
//! in [`crate::generator`].

/// Event id every capability publishes its state under.
pub const STATE_EVENT_ID: &str = "state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    /// Stable id; also the device type, event type and application interface name.
    pub id: &'static str,
    /// Human readable name, used as description of every derived resource.
    pub label: &'static str,
    /// Event id the state is published under.
    pub event_id: &'static str,
    /// Field of the event payload (`d.<field>`) carrying the value.
    pub event_property: &'static str,
    /// Value kind tag of the gateway item (`Number`, `Switch`, `Contact`, ...).
    pub item_type: &'static str,
    /// Name of the computed state property on the application interface.
    pub property: &'static str,
}

impl Capability {
    pub fn description(&self) -> &'static str {
        self.label
    }

    /// `<prefix>-<id>-<event id>`, e.g. `OH2-switch-state`.
    pub fn physical_interface_name(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.id, self.event_id)
    }
}

const fn state(
    id: &'static str,
    event_property: &'static str,
    item_type: &'static str,
    property: &'static str,
    label: &'static str,
) -> Capability {
    Capability {
        id,
        label,
        event_id: STATE_EVENT_ID,
        event_property,
        item_type,
        property,
    }
}

pub static CATALOG: &[Capability] = &[
    state("energyMeterWatt", "DecimalType", "Number", "energyWatt", "Energy Meter in Watts"),
    state("energyMeterKVAH", "DecimalType", "Number", "energyKVAH", "Energy Meter in KVAH"),
    state("energyMeterVolt", "DecimalType", "Number", "energyVolt", "Energy Meter in Volt"),
    state("energyMeterAmp", "DecimalType", "Number", "energyAmp", "Energy Meter in Amp"),
    state("energyMeter", "DecimalType", "Number", "energy", "Energy Meter"),
    state("alarm", "OnOffType", "Switch", "alarm", "Alarm"),
    state("batteryLevel", "PercentType", "Dimmer", "battery", "Battery level"),
    state("button", "OnOffType", "Switch", "button", "Button"),
    state("contactSensor", "OpenClosedType", "Contact", "contactSensor", "Contact Sensor"),
    state("lock", "DecimalType", "Number", "lock", "Lock"),
    state("notificationMessage", "StringType", "String", "notificationMessage", "Notification Message"),
    state("notificationState", "DecimalType", "Number", "notificationState", "Notification State"),
    state(
        "relativeHumidityMeasurement",
        "DecimalType",
        "Number",
        "humidity",
        "Relative Humidity Measurement",
    ),
    state("signalStrength", "DecimalType", "Number", "rssi", "Signal Strength"),
    state("switch", "OnOffType", "Switch", "switch", "Switch"),
    state("switchLevel", "PercentType", "Dimmer", "switchLevel", "Switch Level"),
    state(
        "thermostatHeatingSetpoint",
        "DecimalType",
        "Number",
        "setpoint",
        "Thermostat Heating Setpoint",
    ),
    state("thermostatMode", "DecimalType", "Number", "thermostatMode", "Thermostat Mode"),
    state(
        "thermostatOperatingState",
        "DecimalType",
        "Number",
        "thermostatOperatingState",
        "Thermostat Operating State",
    ),
    state("thermostatSetpoint", "DecimalType", "Number", "setpoint", "Thermostat Setpoint"),
    state("valve", "OpenClosedType", "Contact", "valve", "Valve"),
    state("relaySwitch", "OnOffType", "Switch", "switch", "Relay Switch"),
    state("sleepSensor", "OpenClosedType", "Contact", "sleeping", "Sleep Sensor"),
    state("tamperAlert", "OpenClosedType", "Contact", "tamper", "Tamper Alert"),
    state("temperature", "DecimalType", "Number", "temperature", "Temperature Measurement"),
    state(
        "floorTemperature",
        "DecimalType",
        "Number",
        "floorTemperature",
        "Floor temperature measurement",
    ),
    state("airTemperature", "DecimalType", "Number", "airTemperature", "Air temperature measurement"),
    state("outlet", "OnOffType", "Switch", "switch", "Outlet"),
];

pub fn find(id: &str) -> Option<&'static Capability> {
    CATALOG.iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn ids_are_unique() {
        let ids: BTreeSet<_> = CATALOG.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), CATALOG.len());
    }

    #[test]
    fn physical_interface_names_derive_from_id() {
        let switch = find("switch").expect("switch in catalog");
        assert_eq!(switch.physical_interface_name("OH2"), "OH2-switch-state");
        assert_eq!(switch.description(), "Switch");
        assert!(find("toaster").is_none());
    }

    #[test]
    fn properties_are_named_after_their_capability() {
        let mode = find("thermostatMode").expect("in catalog");
        assert_eq!(mode.property, "thermostatMode");
        let message = find("notificationMessage").expect("in catalog");
        assert_eq!((message.event_property, message.item_type), ("StringType", "String"));
        let state = find("notificationState").expect("in catalog");
        assert_eq!((state.event_property, state.item_type), ("DecimalType", "Number"));
    }
}
