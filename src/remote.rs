//! The seam between the reconcilers and the metadata service.
//!
//! [`crate::client::PlatformClient`] implements it over HTTPS; tests use an in-memory fake.
//! Implementations must not carry call-specific state: every identifier a call needs is an
//! argument.

use crate::error::ApiError;
use crate::models::platform::*;
use serde_json::Value;

pub trait MetadataApi {
    /// One bounded page of a resource kind, optionally filtered by exact name.
    fn list<R: Resource>(&self, request: &PageRequest) -> Result<Page<R>, ApiError>;

    fn get<R: Resource>(&self, id: &str) -> Result<R, ApiError>;

    fn delete<R: Resource>(&self, id: &str) -> Result<(), ApiError>;

    /// All resources of a kind named `name`, in service order. Callers take the first.
    fn find_by_name<R: Resource>(&self, name: &str) -> Result<Vec<R>, ApiError> {
        let page = self.list::<R>(&PageRequest::named(name))?;
        Ok(page.results.into_iter().filter(|r| r.name() == name).collect())
    }

    fn exists<R: Resource>(&self, name: &str) -> Result<bool, ApiError> {
        Ok(!self.find_by_name::<R>(name)?.is_empty())
    }

    /// Existence check by id; NotFound answers `false`, every other failure is returned.
    fn exists_by_id<R: Resource>(&self, id: &str) -> Result<bool, ApiError> {
        match self.get::<R>(id) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_schema(&self, draft: SchemaDraft<'_>) -> Result<Schema, ApiError>;
    fn update_schema_content(&self, id: &SchemaId, document: &Value) -> Result<(), ApiError>;
    fn create_event_type(&self, draft: &EventTypeDraft) -> Result<EventType, ApiError>;
    fn create_physical_interface(&self, draft: &PhysicalInterfaceDraft) -> Result<PhysicalInterface, ApiError>;
    fn create_application_interface(
        &self,
        draft: &ApplicationInterfaceDraft,
    ) -> Result<ApplicationInterface, ApiError>;
    fn create_device_type(&self, draft: &DeviceTypeDraft) -> Result<DeviceType, ApiError>;

    // Physical interface event bindings
    fn event_bindings(&self, physical_interface: &PhysicalInterfaceId) -> Result<Vec<EventBinding>, ApiError>;
    fn bind_event(&self, physical_interface: &PhysicalInterfaceId, binding: &EventBinding) -> Result<(), ApiError>;
    fn unbind_event(&self, physical_interface: &PhysicalInterfaceId, event_id: &str) -> Result<(), ApiError>;

    // Device type attachments
    fn device_type_application_interfaces(
        &self,
        device_type: &DeviceTypeId,
    ) -> Result<Vec<ApplicationInterface>, ApiError>;
    fn attach_application_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterface,
    ) -> Result<(), ApiError>;
    fn detach_application_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterfaceId,
    ) -> Result<(), ApiError>;
    fn attach_physical_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &PhysicalInterfaceId,
    ) -> Result<(), ApiError>;
    fn detach_physical_interface(&self, device_type: &DeviceTypeId) -> Result<(), ApiError>;

    // Property mappings
    fn mappings(&self, device_type: &DeviceTypeId) -> Result<Vec<PropertyMapping>, ApiError>;
    fn mapping(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterfaceId,
    ) -> Result<PropertyMapping, ApiError>;
    fn create_mapping(&self, device_type: &DeviceTypeId, mapping: &PropertyMapping) -> Result<(), ApiError>;
    fn update_mapping(&self, device_type: &DeviceTypeId, mapping: &PropertyMapping) -> Result<(), ApiError>;
    fn delete_mapping(&self, device_type: &DeviceTypeId, interface: &ApplicationInterfaceId) -> Result<(), ApiError>;

    /// Runs a configuration operation on a device type and returns the raw response document.
    fn device_type_operation(&self, device_type: &DeviceTypeId, operation: DeviceTypeOperation)
    -> Result<Value, ApiError>;
}
