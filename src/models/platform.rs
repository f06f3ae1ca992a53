//! Resource models of the device-management metadata API (v0002).
//!
//! Scope: types only. Field names follow the service's camelCase JSON; unknown fields are ignored
//! so responses can grow without breaking decoding.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTypeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalInterfaceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationInterfaceId(pub String);

/// Device type ids are the device type names; the service uses them as primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceTypeId(pub String);

// =====================
// Resource kinds
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Schema,
    EventType,
    PhysicalInterface,
    ApplicationInterface,
    DeviceType,
}

impl ResourceKind {
    /// Collection path below the API root.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Schema => "/schemas",
            ResourceKind::EventType => "/event/types",
            ResourceKind::PhysicalInterface => "/physicalinterfaces",
            ResourceKind::ApplicationInterface => "/applicationinterfaces",
            ResourceKind::DeviceType => "/device/types",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Schema => "schema",
            ResourceKind::EventType => "event type",
            ResourceKind::PhysicalInterface => "physical interface",
            ResourceKind::ApplicationInterface => "application interface",
            ResourceKind::DeviceType => "device type",
        }
    }
}

/// A top-level resource that can be listed, fetched and deleted by id.
pub trait Resource: DeserializeOwned {
    const KIND: ResourceKind;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

// =====================
// Resources
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: SchemaId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventType {
    pub id: EventTypeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_id: SchemaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalInterface {
    pub id: PhysicalInterfaceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInterface {
    pub id: ApplicationInterfaceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_id: SchemaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Device,
    Gateway,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceType {
    pub id: DeviceTypeId,
    pub class_id: DeviceClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<DateTime<Utc>>,
}

impl Resource for Schema {
    const KIND: ResourceKind = ResourceKind::Schema;
    fn id(&self) -> &str {
        &self.id.0
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for EventType {
    const KIND: ResourceKind = ResourceKind::EventType;
    fn id(&self) -> &str {
        &self.id.0
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for PhysicalInterface {
    const KIND: ResourceKind = ResourceKind::PhysicalInterface;
    fn id(&self) -> &str {
        &self.id.0
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for ApplicationInterface {
    const KIND: ResourceKind = ResourceKind::ApplicationInterface;
    fn id(&self) -> &str {
        &self.id.0
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Resource for DeviceType {
    const KIND: ResourceKind = ResourceKind::DeviceType;
    fn id(&self) -> &str {
        &self.id.0
    }
    fn name(&self) -> &str {
        &self.id.0
    }
}

// =====================
// Create payloads
// =====================

/// Schema upload; sent as multipart form with the document as `schemaFile`.
#[derive(Debug, Clone, Copy)]
pub struct SchemaDraft<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub document: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_id: SchemaId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalInterfaceDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInterfaceDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_id: SchemaId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeDraft {
    pub id: DeviceTypeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub class_id: DeviceClass,
}

// =====================
// Relationships
// =====================

/// One event id of a physical interface mapped to an event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBinding {
    pub event_id: String,
    pub event_type_id: EventTypeId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationStrategy {
    OnStateChange,
    OnEveryEvent,
}

/// Property mapping of one application interface on one device type.
///
/// Serializes to exactly `{applicationInterfaceId, notificationStrategy, propertyMappings}`.
/// `propertyMappings` is keyed by event id, then by dotted property path, with formula values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMapping {
    pub application_interface_id: ApplicationInterfaceId,
    pub notification_strategy: NotificationStrategy,
    pub property_mappings: BTreeMap<String, BTreeMap<String, String>>,
}

/// Device type level configuration operations, sent as `PATCH /device/types/{id}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceTypeOperation {
    ValidateConfiguration,
    DeployConfiguration,
    ListDifferences,
    RemoveDeployedConfiguration,
}

impl DeviceTypeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceTypeOperation::ValidateConfiguration => "validate-configuration",
            DeviceTypeOperation::DeployConfiguration => "deploy-configuration",
            DeviceTypeOperation::ListDifferences => "list-differences",
            DeviceTypeOperation::RemoveDeployedConfiguration => "remove-deployed-configuration",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub failures: Vec<Value>,
}

// =====================
// Paging
// =====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub bookmark: Option<String>,
    pub name: Option<String>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        PageRequest {
            limit,
            bookmark: None,
            name: None,
        }
    }

    pub fn named(name: &str) -> Self {
        PageRequest {
            limit: DEFAULT_PAGE_SIZE,
            bookmark: None,
            name: Some(name.to_string()),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub total_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub meta: PageMeta,
    /// Cursor for the next page; absent on the last page.
    #[serde(default)]
    pub bookmark: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_listing_page() {
        let body = json!({
            "results": [
                {"id": "5a1f", "name": "api/switch", "schemaType": "json-schema",
                 "created": "2017-06-01T10:00:00Z", "refs": {"content": "/schemas/5a1f/content"}}
            ],
            "meta": {"total_rows": 1},
            "bookmark": "g1AAAA"
        });
        let page: Page<Schema> = serde_json::from_value(body).expect("page decodes");
        assert_eq!(page.meta.total_rows, 1);
        assert_eq!(page.bookmark.as_deref(), Some("g1AAAA"));
        assert_eq!(page.results[0].name(), "api/switch");
        assert!(page.results[0].created.is_some());
    }

    #[test]
    fn unknown_device_class_is_tolerated() {
        let dt: DeviceType =
            serde_json::from_value(json!({"id": "hub", "classId": "Bridge"})).expect("device type decodes");
        assert_eq!(dt.class_id, DeviceClass::Other);
        assert_eq!(dt.name(), "hub");
    }

    #[test]
    fn mapping_serializes_with_exact_field_names() {
        let mut props = BTreeMap::new();
        props.insert("switch".to_string(), "$event.d.OnOffType".to_string());
        let mut by_event = BTreeMap::new();
        by_event.insert("state".to_string(), props);
        let mapping = PropertyMapping {
            application_interface_id: ApplicationInterfaceId("ai-1".into()),
            notification_strategy: NotificationStrategy::OnStateChange,
            property_mappings: by_event,
        };
        assert_eq!(
            serde_json::to_value(&mapping).expect("serialize"),
            json!({
                "applicationInterfaceId": "ai-1",
                "notificationStrategy": "on-state-change",
                "propertyMappings": {"state": {"switch": "$event.d.OnOffType"}}
            })
        );
    }
}
