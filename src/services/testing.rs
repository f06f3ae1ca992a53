//! In-memory metadata service for reconciler tests.
//!
//! Enforces the referential constraints of the real service (a referenced resource cannot be
//! deleted) and journals every call so tests can assert on ordering.

use crate::error::{ApiError, ErrorKind};
use crate::models::platform::*;
use crate::remote::MetadataApi;
use serde::Serialize;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Once;

#[derive(Default)]
struct State {
    next_id: u64,
    /// Resources per kind, in creation order, stored in their wire form.
    resources: BTreeMap<ResourceKind, Vec<Value>>,
    schema_content: BTreeMap<String, Value>,
    bindings: BTreeMap<String, Vec<EventBinding>>,
    attached_interfaces: BTreeMap<String, Vec<String>>,
    attached_physical: BTreeMap<String, String>,
    mappings: BTreeMap<String, Vec<PropertyMapping>>,
    validation_failures: BTreeMap<String, Vec<Value>>,
    /// Injected failures: the next call whose journal entry starts with the prefix fails.
    faults: Vec<(String, ErrorKind)>,
    /// When set, deletes of the kind report success without removing anything.
    ineffective_deletes: Option<ResourceKind>,
    journal: Vec<String>,
}

impl State {
    fn items(&self, kind: ResourceKind) -> &[Value] {
        self.resources.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    fn position(&self, kind: ResourceKind, id: &str) -> Option<usize> {
        self.items(kind).iter().position(|v| v["id"] == id)
    }

    fn contains(&self, kind: ResourceKind, id: &str) -> bool {
        self.position(kind, id).is_some()
    }

    fn insert<T: Serialize>(&mut self, kind: ResourceKind, resource: &T) -> Result<(), ApiError> {
        let value = serde_json::to_value(resource).map_err(|e| ApiError::decode(e.to_string()))?;
        self.resources.entry(kind).or_default().push(value);
        Ok(())
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    /// Who still points at `id`, if anyone.
    fn referrer(&self, kind: ResourceKind, id: &str) -> Option<String> {
        let referencing = |k: ResourceKind, field: &str| {
            self.items(k)
                .iter()
                .find(|v| v[field] == id)
                .map(|v| format!("{} {}", k.label(), v["id"]))
        };
        match kind {
            ResourceKind::Schema => referencing(ResourceKind::EventType, "schemaId")
                .or_else(|| referencing(ResourceKind::ApplicationInterface, "schemaId")),
            ResourceKind::EventType => self
                .bindings
                .iter()
                .find(|(_, bs)| bs.iter().any(|b| b.event_type_id.0 == id))
                .map(|(pi, _)| format!("physical interface {}", pi)),
            ResourceKind::PhysicalInterface => {
                if self.bindings.get(id).is_some_and(|bs| !bs.is_empty()) {
                    Some("event bindings".to_string())
                } else {
                    self.attached_physical
                        .iter()
                        .find(|(_, pi)| pi.as_str() == id)
                        .map(|(dt, _)| format!("device type {}", dt))
                }
            }
            ResourceKind::ApplicationInterface => self
                .attached_interfaces
                .iter()
                .find(|(_, ais)| ais.iter().any(|a| a == id))
                .map(|(dt, _)| format!("device type {}", dt)),
            ResourceKind::DeviceType => self
                .mappings
                .get(id)
                .filter(|ms| !ms.is_empty())
                .map(|_| "property mappings".to_string()),
        }
    }
}

pub struct FakePlatform {
    state: RefCell<State>,
    /// Upper bound applied to every requested page size.
    max_page_size: usize,
}

fn not_found(what: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::NotFound, format!("{} does not exist", what.into()))
}

fn conflict(what: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::Conflict, what)
}

impl FakePlatform {
    pub fn new() -> Self {
        FakePlatform::with_max_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_max_page_size(max_page_size: usize) -> Self {
        FakePlatform {
            state: RefCell::new(State::default()),
            max_page_size: max_page_size.max(1),
        }
    }

    /// Journals the call and fails it if a matching fault was injected.
    fn record(&self, entry: String) -> Result<(), ApiError> {
        let mut st = self.state.borrow_mut();
        let fault = st.faults.iter().position(|(prefix, _)| entry.starts_with(prefix.as_str()));
        st.journal.push(entry);
        match fault {
            Some(i) => {
                let (prefix, kind) = st.faults.remove(i);
                Err(ApiError::new(kind, format!("injected failure for {}", prefix)))
            }
            None => Ok(()),
        }
    }

    pub fn fail_next(&self, call_prefix: &str, kind: ErrorKind) {
        self.state.borrow_mut().faults.push((call_prefix.to_string(), kind));
    }

    pub fn ignore_deletes_of(&self, kind: ResourceKind) {
        self.state.borrow_mut().ineffective_deletes = Some(kind);
    }

    pub fn set_validation_failures(&self, device_type: &str, failures: Vec<Value>) {
        self.state
            .borrow_mut()
            .validation_failures
            .insert(device_type.to_string(), failures);
    }

    pub fn seed_device_type(&self, id: &str, class_id: DeviceClass) {
        let dt = DeviceType {
            id: DeviceTypeId(id.to_string()),
            class_id,
            description: None,
            created_date_time: None,
        };
        let _ = self.state.borrow_mut().insert(ResourceKind::DeviceType, &dt);
    }

    pub fn journal(&self) -> Vec<String> {
        self.state.borrow().journal.clone()
    }

    /// Number of journal entries starting with `prefix`.
    pub fn calls(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .journal
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Index of the first journal entry starting with `prefix`.
    pub fn first_call(&self, prefix: &str) -> Option<usize> {
        self.state.borrow().journal.iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state.borrow().items(kind).len()
    }

    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        let field = if kind == ResourceKind::DeviceType { "id" } else { "name" };
        self.state
            .borrow()
            .items(kind)
            .iter()
            .filter_map(|v| v[field].as_str().map(str::to_string))
            .collect()
    }

    pub fn schema_content(&self, id: &SchemaId) -> Option<Value> {
        self.state.borrow().schema_content.get(&id.0).cloned()
    }

    pub fn stored_mapping(&self, device_type: &str, interface: &ApplicationInterfaceId) -> Option<PropertyMapping> {
        self.state
            .borrow()
            .mappings
            .get(device_type)
            .and_then(|ms| ms.iter().find(|m| &m.application_interface_id == interface).cloned())
    }

    pub fn bindings_of(&self, interface: &PhysicalInterfaceId) -> Vec<EventBinding> {
        self.state.borrow().bindings.get(&interface.0).cloned().unwrap_or_default()
    }

    pub fn attached_physical(&self, device_type: &str) -> Option<String> {
        self.state.borrow().attached_physical.get(device_type).cloned()
    }

    pub fn attached_interfaces(&self, device_type: &str) -> Vec<String> {
        self.state
            .borrow()
            .attached_interfaces
            .get(device_type)
            .cloned()
            .unwrap_or_default()
    }

    fn require(&self, kind: ResourceKind, id: &str) -> Result<(), ApiError> {
        if self.state.borrow().contains(kind, id) {
            Ok(())
        } else {
            Err(not_found(format!("{} {}", kind.label(), id)))
        }
    }

    fn create_named<T: Serialize>(&self, kind: ResourceKind, build: impl FnOnce(String) -> T) -> Result<T, ApiError> {
        let mut st = self.state.borrow_mut();
        let id = st.fresh_id(kind.label().split(' ').next().unwrap_or("res"));
        let resource = build(id);
        st.insert(kind, &resource)?;
        Ok(resource)
    }
}

impl MetadataApi for FakePlatform {
    fn list<R: Resource>(&self, request: &PageRequest) -> Result<Page<R>, ApiError> {
        self.record(format!("list {}", R::KIND.label()))?;
        let st = self.state.borrow();
        let name_field = if R::KIND == ResourceKind::DeviceType { "id" } else { "name" };
        let matching: Vec<&Value> = st
            .items(R::KIND)
            .iter()
            .filter(|v| request.name.as_deref().is_none_or(|n| v[name_field] == n))
            .collect();
        let offset = match request.bookmark.as_deref() {
            Some(b) => b
                .parse::<usize>()
                .map_err(|_| ApiError::new(ErrorKind::PermanentRequest, "invalid bookmark"))?,
            None => 0,
        };
        let limit = request.limit.clamp(1, self.max_page_size);
        let slice: Vec<&Value> = matching.iter().skip(offset).take(limit).copied().collect();
        let next = offset + slice.len();
        let bookmark = (next < matching.len()).then(|| next.to_string());
        let body = json!({
            "results": slice,
            "meta": {"total_rows": matching.len()},
            "bookmark": bookmark,
        });
        serde_json::from_value(body).map_err(|e| ApiError::decode(e.to_string()))
    }

    fn get<R: Resource>(&self, id: &str) -> Result<R, ApiError> {
        self.record(format!("get {} {}", R::KIND.label(), id))?;
        let st = self.state.borrow();
        let value = st
            .position(R::KIND, id)
            .map(|i| st.items(R::KIND)[i].clone())
            .ok_or_else(|| not_found(format!("{} {}", R::KIND.label(), id)))?;
        serde_json::from_value(value).map_err(|e| ApiError::decode(e.to_string()))
    }

    fn delete<R: Resource>(&self, id: &str) -> Result<(), ApiError> {
        self.record(format!("delete {} {}", R::KIND.label(), id))?;
        let mut st = self.state.borrow_mut();
        let index = st
            .position(R::KIND, id)
            .ok_or_else(|| not_found(format!("{} {}", R::KIND.label(), id)))?;
        if let Some(by) = st.referrer(R::KIND, id) {
            return Err(conflict(format!("{} {} is referenced by {}", R::KIND.label(), id, by)));
        }
        if st.ineffective_deletes == Some(R::KIND) {
            return Ok(());
        }
        if let Some(items) = st.resources.get_mut(&R::KIND) {
            items.remove(index);
        }
        match R::KIND {
            ResourceKind::Schema => {
                st.schema_content.remove(id);
            }
            ResourceKind::PhysicalInterface => {
                st.bindings.remove(id);
            }
            ResourceKind::DeviceType => {
                st.attached_interfaces.remove(id);
                st.attached_physical.remove(id);
                st.mappings.remove(id);
            }
            _ => {}
        }
        Ok(())
    }

    fn create_schema(&self, draft: SchemaDraft<'_>) -> Result<Schema, ApiError> {
        self.record(format!("create schema {}", draft.name))?;
        let schema = self.create_named(ResourceKind::Schema, |id| Schema {
            id: SchemaId(id),
            name: draft.name.to_string(),
            description: Some(draft.description.to_string()),
            schema_type: Some("json-schema".to_string()),
            created: None,
            updated: None,
        })?;
        self.state
            .borrow_mut()
            .schema_content
            .insert(schema.id.0.clone(), draft.document.clone());
        Ok(schema)
    }

    fn update_schema_content(&self, id: &SchemaId, document: &Value) -> Result<(), ApiError> {
        self.record(format!("update schema content {}", id.0))?;
        self.require(ResourceKind::Schema, &id.0)?;
        self.state
            .borrow_mut()
            .schema_content
            .insert(id.0.clone(), document.clone());
        Ok(())
    }

    fn create_event_type(&self, draft: &EventTypeDraft) -> Result<EventType, ApiError> {
        self.record(format!("create event type {}", draft.name))?;
        self.require(ResourceKind::Schema, &draft.schema_id.0)?;
        self.create_named(ResourceKind::EventType, |id| EventType {
            id: EventTypeId(id),
            name: draft.name.clone(),
            description: draft.description.clone(),
            schema_id: draft.schema_id.clone(),
            created: None,
        })
    }

    fn create_physical_interface(&self, draft: &PhysicalInterfaceDraft) -> Result<PhysicalInterface, ApiError> {
        self.record(format!("create physical interface {}", draft.name))?;
        self.create_named(ResourceKind::PhysicalInterface, |id| PhysicalInterface {
            id: PhysicalInterfaceId(id),
            name: draft.name.clone(),
            description: draft.description.clone(),
            created: None,
        })
    }

    fn create_application_interface(
        &self,
        draft: &ApplicationInterfaceDraft,
    ) -> Result<ApplicationInterface, ApiError> {
        self.record(format!("create application interface {}", draft.name))?;
        self.require(ResourceKind::Schema, &draft.schema_id.0)?;
        self.create_named(ResourceKind::ApplicationInterface, |id| ApplicationInterface {
            id: ApplicationInterfaceId(id),
            name: draft.name.clone(),
            description: draft.description.clone(),
            schema_id: draft.schema_id.clone(),
            created: None,
        })
    }

    fn create_device_type(&self, draft: &DeviceTypeDraft) -> Result<DeviceType, ApiError> {
        self.record(format!("create device type {}", draft.id.0))?;
        if self.state.borrow().contains(ResourceKind::DeviceType, &draft.id.0) {
            return Err(conflict(format!("device type {} already exists", draft.id.0)));
        }
        let dt = DeviceType {
            id: draft.id.clone(),
            class_id: draft.class_id,
            description: draft.description.clone(),
            created_date_time: None,
        };
        self.state.borrow_mut().insert(ResourceKind::DeviceType, &dt)?;
        Ok(dt)
    }

    fn event_bindings(&self, physical_interface: &PhysicalInterfaceId) -> Result<Vec<EventBinding>, ApiError> {
        self.record(format!("list bindings {}", physical_interface.0))?;
        self.require(ResourceKind::PhysicalInterface, &physical_interface.0)?;
        Ok(self.bindings_of(physical_interface))
    }

    fn bind_event(&self, physical_interface: &PhysicalInterfaceId, binding: &EventBinding) -> Result<(), ApiError> {
        self.record(format!("bind {} {}", physical_interface.0, binding.event_id))?;
        self.require(ResourceKind::PhysicalInterface, &physical_interface.0)?;
        self.require(ResourceKind::EventType, &binding.event_type_id.0)?;
        let mut st = self.state.borrow_mut();
        let bindings = st.bindings.entry(physical_interface.0.clone()).or_default();
        if bindings.iter().any(|b| b.event_id == binding.event_id) {
            return Err(conflict(format!("event {} is already bound", binding.event_id)));
        }
        bindings.push(binding.clone());
        Ok(())
    }

    fn unbind_event(&self, physical_interface: &PhysicalInterfaceId, event_id: &str) -> Result<(), ApiError> {
        self.record(format!("unbind {} {}", physical_interface.0, event_id))?;
        let mut st = self.state.borrow_mut();
        let bindings = st
            .bindings
            .get_mut(&physical_interface.0)
            .ok_or_else(|| not_found(format!("bindings of {}", physical_interface.0)))?;
        let before = bindings.len();
        bindings.retain(|b| b.event_id != event_id);
        if bindings.len() == before {
            return Err(not_found(format!("event {}", event_id)));
        }
        Ok(())
    }

    fn device_type_application_interfaces(
        &self,
        device_type: &DeviceTypeId,
    ) -> Result<Vec<ApplicationInterface>, ApiError> {
        self.record(format!("list attached interfaces {}", device_type.0))?;
        self.require(ResourceKind::DeviceType, &device_type.0)?;
        let st = self.state.borrow();
        let ids = st.attached_interfaces.get(&device_type.0).cloned().unwrap_or_default();
        ids.iter()
            .filter_map(|id| st.position(ResourceKind::ApplicationInterface, id))
            .map(|i| {
                serde_json::from_value(st.items(ResourceKind::ApplicationInterface)[i].clone())
                    .map_err(|e| ApiError::decode(e.to_string()))
            })
            .collect()
    }

    fn attach_application_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterface,
    ) -> Result<(), ApiError> {
        self.record(format!("attach interface {} {}", device_type.0, interface.id.0))?;
        self.require(ResourceKind::DeviceType, &device_type.0)?;
        self.require(ResourceKind::ApplicationInterface, &interface.id.0)?;
        let mut st = self.state.borrow_mut();
        let attached = st.attached_interfaces.entry(device_type.0.clone()).or_default();
        if attached.contains(&interface.id.0) {
            return Err(conflict(format!("{} already attached", interface.id.0)));
        }
        attached.push(interface.id.0.clone());
        Ok(())
    }

    fn detach_application_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterfaceId,
    ) -> Result<(), ApiError> {
        self.record(format!("detach interface {} {}", device_type.0, interface.0))?;
        let mut st = self.state.borrow_mut();
        let mapped = st
            .mappings
            .get(&device_type.0)
            .is_some_and(|ms| ms.iter().any(|m| &m.application_interface_id == interface));
        if mapped {
            return Err(conflict(format!("{} is still mapped on {}", interface.0, device_type.0)));
        }
        let attached = st
            .attached_interfaces
            .get_mut(&device_type.0)
            .ok_or_else(|| not_found(format!("interfaces of {}", device_type.0)))?;
        let before = attached.len();
        attached.retain(|a| a != &interface.0);
        if attached.len() == before {
            return Err(not_found(format!("application interface {}", interface.0)));
        }
        Ok(())
    }

    fn attach_physical_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &PhysicalInterfaceId,
    ) -> Result<(), ApiError> {
        self.record(format!("attach physical {} {}", device_type.0, interface.0))?;
        self.require(ResourceKind::DeviceType, &device_type.0)?;
        self.require(ResourceKind::PhysicalInterface, &interface.0)?;
        self.state
            .borrow_mut()
            .attached_physical
            .insert(device_type.0.clone(), interface.0.clone());
        Ok(())
    }

    fn detach_physical_interface(&self, device_type: &DeviceTypeId) -> Result<(), ApiError> {
        self.record(format!("detach physical {}", device_type.0))?;
        self.state
            .borrow_mut()
            .attached_physical
            .remove(&device_type.0)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("physical interface of {}", device_type.0)))
    }

    fn mappings(&self, device_type: &DeviceTypeId) -> Result<Vec<PropertyMapping>, ApiError> {
        self.record(format!("list mappings {}", device_type.0))?;
        self.require(ResourceKind::DeviceType, &device_type.0)?;
        Ok(self.state.borrow().mappings.get(&device_type.0).cloned().unwrap_or_default())
    }

    fn mapping(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterfaceId,
    ) -> Result<PropertyMapping, ApiError> {
        self.record(format!("get mapping {} {}", device_type.0, interface.0))?;
        self.stored_mapping(&device_type.0, interface)
            .ok_or_else(|| not_found(format!("mapping of {} on {}", interface.0, device_type.0)))
    }

    fn create_mapping(&self, device_type: &DeviceTypeId, mapping: &PropertyMapping) -> Result<(), ApiError> {
        let ai = &mapping.application_interface_id;
        self.record(format!("create mapping {} {}", device_type.0, ai.0))?;
        self.require(ResourceKind::DeviceType, &device_type.0)?;
        self.require(ResourceKind::ApplicationInterface, &ai.0)?;
        if self.stored_mapping(&device_type.0, ai).is_some() {
            return Err(conflict(format!("mapping of {} exists", ai.0)));
        }
        self.state
            .borrow_mut()
            .mappings
            .entry(device_type.0.clone())
            .or_default()
            .push(mapping.clone());
        Ok(())
    }

    fn update_mapping(&self, device_type: &DeviceTypeId, mapping: &PropertyMapping) -> Result<(), ApiError> {
        let ai = &mapping.application_interface_id;
        self.record(format!("update mapping {} {}", device_type.0, ai.0))?;
        let mut st = self.state.borrow_mut();
        let slot = st
            .mappings
            .get_mut(&device_type.0)
            .and_then(|ms| ms.iter_mut().find(|m| &m.application_interface_id == ai))
            .ok_or_else(|| not_found(format!("mapping of {} on {}", ai.0, device_type.0)))?;
        *slot = mapping.clone();
        Ok(())
    }

    fn delete_mapping(&self, device_type: &DeviceTypeId, interface: &ApplicationInterfaceId) -> Result<(), ApiError> {
        self.record(format!("delete mapping {} {}", device_type.0, interface.0))?;
        let mut st = self.state.borrow_mut();
        let mappings = st
            .mappings
            .get_mut(&device_type.0)
            .ok_or_else(|| not_found(format!("mappings of {}", device_type.0)))?;
        let before = mappings.len();
        mappings.retain(|m| &m.application_interface_id != interface);
        if mappings.len() == before {
            return Err(not_found(format!("mapping of {}", interface.0)));
        }
        Ok(())
    }

    fn device_type_operation(
        &self,
        device_type: &DeviceTypeId,
        operation: DeviceTypeOperation,
    ) -> Result<Value, ApiError> {
        self.record(format!("{} {}", operation.as_str(), device_type.0))?;
        self.require(ResourceKind::DeviceType, &device_type.0)?;
        let st = self.state.borrow();
        Ok(match operation {
            DeviceTypeOperation::ValidateConfiguration => json!({
                "failures": st.validation_failures.get(&device_type.0).cloned().unwrap_or_default()
            }),
            DeviceTypeOperation::ListDifferences => json!({
                "mappingsChanged": st.mappings.get(&device_type.0).map(Vec::len).unwrap_or(0)
            }),
            DeviceTypeOperation::DeployConfiguration | DeviceTypeOperation::RemoveDeployedConfiguration => {
                json!({"message": format!("{} accepted", operation.as_str())})
            }
        })
    }
}

// =====================
// Log capture
// =====================

thread_local! {
    static CAPTURED: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

/// Records log lines per test thread, so parallel tests never see each other's output.
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        CAPTURED.with(|c| c.borrow_mut().push((record.level(), record.args().to_string())));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Starts capturing log lines emitted on the current thread, dropping anything captured before.
pub fn capture_logs() {
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    CAPTURED.with(|c| c.borrow_mut().clear());
}

/// Captured lines at `level` or more severe.
pub fn captured_logs(level: Level) -> Vec<String> {
    CAPTURED.with(|c| {
        c.borrow()
            .iter()
            .filter(|(l, _)| *l <= level)
            .map(|(_, line)| line.clone())
            .collect()
    })
}
