//! Pure derivation of schema documents and property-mapping formulas from catalog entries.
//!
//! Nothing here performs I/O or logs. Output is a function of the input only: mappings are always
//! overwritten remotely, never diffed, so identical input must yield byte-identical documents.

use crate::catalog::Capability;
use crate::models::platform::{ApplicationInterfaceId, NotificationStrategy, PropertyMapping};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// State properties that get the temperature treatment regardless of the item type.
const TEMPERATURE_PROPERTIES: [&str; 3] = ["temperature", "floorTemperature", "airTemperature"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Raw value plus Fahrenheit conversion, low/high flags and running extremes.
    Temperature,
    Numeric,
    /// On/off and open/closed states, carried as strings.
    Binary,
    Text,
    Unsupported,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    Number,
    String,
    Boolean,
}

impl Primitive {
    pub fn as_str(self) -> &'static str {
        match self {
            Primitive::Number => "number",
            Primitive::String => "string",
            Primitive::Boolean => "boolean",
        }
    }
}

/// One computed state property of an application interface.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    /// Nested field under the capability property (`C`, `isLow`, ...), `None` for passthrough.
    pub field: Option<&'static str>,
    pub primitive: Primitive,
    pub default: Value,
    pub formula: String,
}

impl PropertySpec {
    /// Dotted property path used as key in the mapping document.
    pub fn path(&self, property: &str) -> String {
        match self.field {
            Some(f) => format!("{}.{}", property, f),
            None => property.to_string(),
        }
    }
}

pub fn value_kind(capability: &Capability) -> ValueKind {
    if TEMPERATURE_PROPERTIES.contains(&capability.property) {
        return ValueKind::Temperature;
    }
    match capability.item_type {
        "Number" | "Dimmer" => ValueKind::Numeric,
        "Switch" | "Contact" => ValueKind::Binary,
        "String" | "DateTime" | "Player" | "Rollershutter" | "HSBType" => ValueKind::Text,
        _ => ValueKind::Unsupported,
    }
}

pub fn is_supported(capability: &Capability) -> bool {
    value_kind(capability) != ValueKind::Unsupported
}

/// The state properties of a capability, or `None` when its value kind is unsupported.
pub fn derive_properties(capability: &Capability) -> Option<Vec<PropertySpec>> {
    let raw = format!("$event.d.{}", capability.event_property);
    let passthrough = |primitive: Primitive, default: Value| PropertySpec {
        field: None,
        primitive,
        default,
        formula: raw.clone(),
    };

    match value_kind(capability) {
        ValueKind::Temperature => {
            let lowest = format!("$state.{}.lowest", capability.property);
            let highest = format!("$state.{}.highest", capability.property);
            let field = |field, primitive, default: Value, formula: String| PropertySpec {
                field: Some(field),
                primitive,
                default,
                formula,
            };
            Some(vec![
                field("C", Primitive::Number, json!(0), raw.clone()),
                field("F", Primitive::Number, json!(0), format!("{} * 1.8 + 32", raw)),
                field("isLow", Primitive::Boolean, json!(false), format!("{} < {}", raw, lowest)),
                field("isHigh", Primitive::Boolean, json!(false), format!("{} > {}", raw, highest)),
                field(
                    "lowest",
                    Primitive::Number,
                    json!(100),
                    format!("({raw} < {lowest}) ? {raw} : {lowest}"),
                ),
                field(
                    "highest",
                    Primitive::Number,
                    json!(0),
                    format!("({raw} > {highest}) ? {raw} : {highest}"),
                ),
            ])
        }
        ValueKind::Numeric => Some(vec![passthrough(Primitive::Number, json!(0))]),
        ValueKind::Binary | ValueKind::Text => Some(vec![passthrough(Primitive::String, json!(""))]),
        ValueKind::Unsupported => None,
    }
}

fn object_schema(properties: Map<String, Value>) -> Value {
    let required: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn typed(primitive: Primitive, default: Option<&Value>) -> Value {
    let mut property = Map::new();
    property.insert("type".into(), Value::from(primitive.as_str()));
    if let Some(d) = default {
        property.insert("default".into(), d.clone());
    }
    Value::Object(property)
}

/// JSON schema of the application interface state for a capability.
pub fn derive_schema(capability: &Capability) -> Option<Value> {
    let specs = derive_properties(capability)?;
    let mut top = Map::new();
    let mut nested = Map::new();
    for spec in &specs {
        match spec.field {
            Some(f) => {
                nested.insert(f.to_string(), typed(spec.primitive, Some(&spec.default)));
            }
            None => {
                top.insert(capability.property.to_string(), typed(spec.primitive, Some(&spec.default)));
            }
        }
    }
    if !nested.is_empty() {
        top.insert(capability.property.to_string(), object_schema(nested));
    }
    Some(object_schema(top))
}

/// JSON schema of the raw state event a device publishes: `{"d": {<event property>: value}}`.
pub fn derive_event_schema(capability: &Capability) -> Option<Value> {
    let primitive = match value_kind(capability) {
        ValueKind::Temperature | ValueKind::Numeric => Primitive::Number,
        ValueKind::Binary | ValueKind::Text => Primitive::String,
        ValueKind::Unsupported => return None,
    };
    let mut payload = Map::new();
    payload.insert(capability.event_property.to_string(), typed(primitive, None));
    let mut top = Map::new();
    top.insert("d".into(), object_schema(payload));
    Some(object_schema(top))
}

/// Property mapping computing the interface state from the capability's state event.
pub fn derive_mapping(capability: &Capability, interface: &ApplicationInterfaceId) -> Option<PropertyMapping> {
    let specs = derive_properties(capability)?;
    let formulas: BTreeMap<String, String> = specs
        .into_iter()
        .map(|spec| (spec.path(capability.property), spec.formula))
        .collect();
    let mut property_mappings = BTreeMap::new();
    property_mappings.insert(capability.event_id.to_string(), formulas);
    Some(PropertyMapping {
        application_interface_id: interface.clone(),
        notification_strategy: NotificationStrategy::OnStateChange,
        property_mappings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CATALOG, find};

    fn ai() -> ApplicationInterfaceId {
        ApplicationInterfaceId("5846cd7c6522050001db0e12".into())
    }

    #[test]
    fn contact_sensor_is_a_string_passthrough() {
        let cap = find("contactSensor").expect("contactSensor in catalog");
        assert_eq!(value_kind(cap), ValueKind::Binary);

        let schema = derive_schema(cap).expect("supported");
        let properties = schema["properties"].as_object().expect("properties object");
        assert_eq!(properties.len(), 1);
        assert_eq!(properties["contactSensor"]["type"], "string");
        assert_eq!(schema["required"], json!(["contactSensor"]));

        let mapping = derive_mapping(cap, &ai()).expect("supported");
        assert_eq!(mapping.property_mappings["state"]["contactSensor"], "$event.d.OpenClosedType");
        assert_eq!(mapping.property_mappings["state"].len(), 1);
    }

    #[test]
    fn air_temperature_derives_six_entries() {
        let cap = find("airTemperature").expect("airTemperature in catalog");
        assert_eq!(value_kind(cap), ValueKind::Temperature);

        let mapping = derive_mapping(cap, &ai()).expect("supported");
        let formulas = &mapping.property_mappings["state"];
        let keys: Vec<&str> = formulas.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "airTemperature.C",
                "airTemperature.F",
                "airTemperature.highest",
                "airTemperature.isHigh",
                "airTemperature.isLow",
                "airTemperature.lowest",
            ]
        );
        for formula in formulas.values() {
            assert!(formula.contains("$event.d.DecimalType"), "{} lacks event input", formula);
        }
        assert_eq!(formulas["airTemperature.F"], "$event.d.DecimalType * 1.8 + 32");
        assert_eq!(
            formulas["airTemperature.highest"],
            "($event.d.DecimalType > $state.airTemperature.highest) ? $event.d.DecimalType : $state.airTemperature.highest"
        );
        assert!(formulas["airTemperature.isLow"].contains("$state.airTemperature.lowest"));

        let schema = derive_schema(cap).expect("supported");
        let nested = &schema["properties"]["airTemperature"];
        assert_eq!(nested["type"], "object");
        assert_eq!(nested["properties"]["isHigh"]["type"], "boolean");
        assert_eq!(nested["properties"]["lowest"]["default"], 100);
        assert_eq!(nested["required"].as_array().map(Vec::len), Some(6));
    }

    #[test]
    fn derivation_is_deterministic_for_every_entry() {
        for cap in CATALOG {
            let first = serde_json::to_string(&derive_schema(cap)).expect("serialize");
            let second = serde_json::to_string(&derive_schema(cap)).expect("serialize");
            assert_eq!(first, second, "schema of {}", cap.id);

            let first = serde_json::to_string(&derive_mapping(cap, &ai())).expect("serialize");
            let second = serde_json::to_string(&derive_mapping(cap, &ai())).expect("serialize");
            assert_eq!(first, second, "mapping of {}", cap.id);
        }
    }

    #[test]
    fn every_catalog_entry_is_supported() {
        assert!(CATALOG.iter().all(is_supported));
    }

    #[test]
    fn unknown_item_type_is_unsupported() {
        let image = Capability {
            id: "snapshot",
            label: "Camera snapshot",
            event_id: "state",
            event_property: "RawType",
            item_type: "Image",
            property: "snapshot",
        };
        assert_eq!(value_kind(&image), ValueKind::Unsupported);
        assert!(derive_schema(&image).is_none());
        assert!(derive_event_schema(&image).is_none());
        assert!(derive_mapping(&image, &ai()).is_none());
    }

    #[test]
    fn dimmer_is_numeric_and_event_schema_wraps_payload() {
        let cap = find("batteryLevel").expect("batteryLevel in catalog");
        let schema = derive_schema(cap).expect("supported");
        assert_eq!(schema["properties"]["battery"], json!({"type": "number", "default": 0}));

        let event = derive_event_schema(cap).expect("supported");
        assert_eq!(event["required"], json!(["d"]));
        assert_eq!(event["properties"]["d"]["properties"]["PercentType"]["type"], "number");
    }
}
