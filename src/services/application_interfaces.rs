use crate::error::ReconcileError;
use crate::models::platform::{
    ApplicationInterface, ApplicationInterfaceDraft, ApplicationInterfaceId, DeviceTypeId, DeviceTypeOperation,
    PropertyMapping, SchemaId, ValidationReport,
};
use crate::remote::MetadataApi;
use crate::services::support::{Ensured, create_or_reuse, describe, drain};
use log::{debug, info, warn};
use serde_json::Value;

pub struct ApplicationInterfaceReconciler<'a, A: MetadataApi> {
    api: &'a A,
    page_size: usize,
}

impl<'a, A: MetadataApi> ApplicationInterfaceReconciler<'a, A> {
    pub fn new(api: &'a A, page_size: usize) -> Self {
        ApplicationInterfaceReconciler { api, page_size }
    }

    pub fn ensure(
        &self,
        name: &str,
        schema_id: &SchemaId,
        description: &str,
    ) -> Result<Ensured<ApplicationInterface>, ReconcileError> {
        let draft = ApplicationInterfaceDraft {
            name: name.to_string(),
            description: Some(description.to_string()),
            schema_id: schema_id.clone(),
        };
        create_or_reuse::<ApplicationInterface, A, _>(self.api, name, || self.api.create_application_interface(&draft))
    }

    /// Attaches the interface unless the device type already lists it. Returns whether it attached.
    pub fn attach_to_device_type(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterface,
    ) -> Result<bool, ReconcileError> {
        let resource = format!("device type {} application interface {}", device_type.0, interface.name);
        let attached = self
            .api
            .device_type_application_interfaces(device_type)
            .map_err(|e| ReconcileError::api(&resource, e))?;
        if attached.iter().any(|ai| ai.id == interface.id) {
            debug!("{} already attached", resource);
            return Ok(false);
        }
        self.api
            .attach_application_interface(device_type, interface)
            .map_err(|e| ReconcileError::api(resource, e))?;
        Ok(true)
    }

    /// Overwrites the device type's mapping for the interface, creating it when absent.
    pub fn upsert_mapping(
        &self,
        device_type: &DeviceTypeId,
        mapping: &PropertyMapping,
    ) -> Result<Ensured<ApplicationInterfaceId>, ReconcileError> {
        let ai = &mapping.application_interface_id;
        let resource = format!("device type {} mapping of {}", device_type.0, ai.0);
        match self.api.mapping(device_type, ai) {
            Ok(_) => {
                self.api
                    .update_mapping(device_type, mapping)
                    .map_err(|e| ReconcileError::api(&resource, e))?;
                Ok(Ensured::Updated(ai.clone()))
            }
            Err(e) if e.is_not_found() => {
                self.api
                    .create_mapping(device_type, mapping)
                    .map_err(|e| ReconcileError::api(&resource, e))?;
                Ok(Ensured::Created(ai.clone()))
            }
            Err(e) => Err(ReconcileError::api(resource, e)),
        }
    }

    /// Asks the service to validate the draft configuration of a device type.
    ///
    /// Advisory only: failures are logged and returned, and an error running the validation is
    /// logged and reported as no failures.
    pub fn validate_configuration(&self, device_type: &DeviceTypeId) -> Vec<Value> {
        let response = match self
            .api
            .device_type_operation(device_type, DeviceTypeOperation::ValidateConfiguration)
        {
            Ok(v) => v,
            Err(e) => {
                warn!("Validation of device type {} could not run: {}", device_type.0, e);
                return Vec::new();
            }
        };
        let report: ValidationReport = match serde_json::from_value(response) {
            Ok(r) => r,
            Err(e) => {
                warn!("Validation report of device type {} is unreadable: {}", device_type.0, e);
                return Vec::new();
            }
        };
        for failure in &report.failures {
            warn!("Device type {} failed validation: {}", device_type.0, failure);
        }
        report.failures
    }

    /// Deletes every application interface. Device types must have released them already.
    pub fn teardown(&self) -> Result<usize, ReconcileError> {
        let removed = drain::<ApplicationInterface, A, _>(self.api, self.page_size, |ai| {
            self.api
                .delete::<ApplicationInterface>(&ai.id.0)
                .map_err(|e| ReconcileError::api(describe::<ApplicationInterface>(&ai.name), e))?;
            info!("Application interface {} ({}) deleted", ai.name, ai.id.0);
            Ok(())
        })?;
        info!("Deleted {} application interface(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find;
    use crate::error::ErrorKind;
    use crate::generator::derive_mapping;
    use crate::models::platform::{DeviceClass, ResourceKind, SchemaDraft};
    use crate::services::testing::FakePlatform;
    use serde_json::json;

    fn setup(fake: &FakePlatform) -> (DeviceTypeId, ApplicationInterface) {
        fake.seed_device_type("contactSensor", DeviceClass::Device);
        let schema = fake
            .create_schema(SchemaDraft {
                name: "api/contactSensor",
                description: "Contact Sensor",
                document: &json!({}),
            })
            .expect("schema");
        let ai = ApplicationInterfaceReconciler::new(fake, 25)
            .ensure("contactSensor", &schema.id, "Contact Sensor")
            .expect("ensure")
            .into_inner();
        (DeviceTypeId("contactSensor".to_string()), ai)
    }

    #[test]
    fn attaches_only_once() {
        let fake = FakePlatform::new();
        let (dt, ai) = setup(&fake);
        let interfaces = ApplicationInterfaceReconciler::new(&fake, 25);
        assert!(interfaces.attach_to_device_type(&dt, &ai).expect("attach"));
        assert!(!interfaces.attach_to_device_type(&dt, &ai).expect("already attached"));
        assert_eq!(fake.attached_interfaces("contactSensor"), vec![ai.id.0.clone()]);
    }

    #[test]
    fn mapping_upsert_creates_then_updates() {
        let fake = FakePlatform::new();
        let (dt, ai) = setup(&fake);
        let interfaces = ApplicationInterfaceReconciler::new(&fake, 25);
        let cap = find("contactSensor").expect("in catalog");
        let mut mapping = derive_mapping(cap, &ai.id).expect("supported");

        let first = interfaces.upsert_mapping(&dt, &mapping).expect("create");
        assert!(first.was_created());

        mapping
            .property_mappings
            .entry("state".to_string())
            .or_default()
            .insert("contactSensor".to_string(), "$event.d.other".to_string());
        let second = interfaces.upsert_mapping(&dt, &mapping).expect("update");
        assert_eq!(second.verb(), "updated");
        assert_eq!(fake.stored_mapping("contactSensor", &ai.id), Some(mapping));
        assert_eq!(fake.calls("create mapping"), 1);
        assert_eq!(fake.calls("update mapping"), 1);
    }

    #[test]
    fn mapping_lookup_failure_is_not_swallowed() {
        let fake = FakePlatform::new();
        let (dt, ai) = setup(&fake);
        let interfaces = ApplicationInterfaceReconciler::new(&fake, 25);
        let mapping = derive_mapping(find("contactSensor").expect("in catalog"), &ai.id).expect("supported");
        fake.fail_next("get mapping", ErrorKind::Auth);

        let err = interfaces.upsert_mapping(&dt, &mapping).expect_err("auth failure");
        assert_eq!(err.kind(), Some(ErrorKind::Auth));
        assert_eq!(fake.calls("create mapping"), 0);
    }

    #[test]
    fn validation_is_advisory() {
        let fake = FakePlatform::new();
        let (dt, _) = setup(&fake);
        let interfaces = ApplicationInterfaceReconciler::new(&fake, 25);
        assert!(interfaces.validate_configuration(&dt).is_empty());

        fake.set_validation_failures("contactSensor", vec![json!({"message": "unmapped property"})]);
        assert_eq!(interfaces.validate_configuration(&dt).len(), 1);

        fake.fail_next("validate-configuration", ErrorKind::Unexpected);
        assert!(interfaces.validate_configuration(&dt).is_empty());
    }

    #[test]
    fn teardown_removes_released_interfaces() {
        let fake = FakePlatform::new();
        let (dt, ai) = setup(&fake);
        let interfaces = ApplicationInterfaceReconciler::new(&fake, 25);
        interfaces.attach_to_device_type(&dt, &ai).expect("attach");

        assert_eq!(
            interfaces.teardown().expect_err("still attached").kind(),
            Some(ErrorKind::Conflict)
        );
        fake.detach_application_interface(&dt, &ai.id).expect("detach");
        assert_eq!(interfaces.teardown().expect("teardown"), 1);
        assert_eq!(fake.count(ResourceKind::ApplicationInterface), 0);
    }
}
