use crate::error::{ApiError, ReconcileError};
use crate::models::platform::{DeviceClass, DeviceType, DeviceTypeDraft, DeviceTypeId, DeviceTypeOperation};
use crate::remote::MetadataApi;
use crate::services::support::{Ensured, collect_all};
use log::{debug, info};
use serde_json::Value;

pub struct DeviceTypeReconciler<'a, A: MetadataApi> {
    api: &'a A,
    page_size: usize,
}

/// Counts of a device type teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceTypeTeardown {
    pub deleted: usize,
    pub mappings_deleted: usize,
    /// Gateways and unknown classes, left in place.
    pub kept: usize,
}

impl<'a, A: MetadataApi> DeviceTypeReconciler<'a, A> {
    pub fn new(api: &'a A, page_size: usize) -> Self {
        DeviceTypeReconciler { api, page_size }
    }

    /// Device types are keyed by name, so existence is a direct lookup rather than a search.
    pub fn ensure(&self, name: &str, description: &str) -> Result<Ensured<DeviceTypeId>, ReconcileError> {
        let resource = format!("device type {}", name);
        if self
            .api
            .exists_by_id::<DeviceType>(name)
            .map_err(|e| ReconcileError::api(&resource, e))?
        {
            return Ok(Ensured::Reused(DeviceTypeId(name.to_string())));
        }
        let draft = DeviceTypeDraft {
            id: DeviceTypeId(name.to_string()),
            description: Some(description.to_string()),
            class_id: DeviceClass::Device,
        };
        match self.api.create_device_type(&draft) {
            Ok(created) => {
                debug!("Created device type {}", created.id.0);
                Ok(Ensured::Created(created.id))
            }
            Err(e) if e.is_conflict() => Ok(Ensured::Reused(draft.id)),
            Err(e) => Err(ReconcileError::api(resource, e)),
        }
    }

    pub fn operation(
        &self,
        device_type: &DeviceTypeId,
        operation: DeviceTypeOperation,
    ) -> Result<Value, ReconcileError> {
        self.api
            .device_type_operation(device_type, operation)
            .map_err(|e| ReconcileError::api(format!("device type {} {}", device_type.0, operation.as_str()), e))
    }

    /// Deletes every device type of class `Device` together with its mappings and attachments.
    pub fn teardown(&self) -> Result<DeviceTypeTeardown, ReconcileError> {
        let all = collect_all::<DeviceType, A>(self.api, self.page_size)
            .map_err(|e| ReconcileError::api("device type listing", e))?;
        let mut summary = DeviceTypeTeardown::default();
        for dt in &all {
            if dt.class_id != DeviceClass::Device {
                debug!("Keeping device type {} ({:?})", dt.id.0, dt.class_id);
                summary.kept += 1;
                continue;
            }
            summary.mappings_deleted += self.remove(&dt.id)?;
            summary.deleted += 1;
        }
        info!(
            "Deleted {} device type(s) and {} mapping(s); kept {} gateway(s)",
            summary.deleted, summary.mappings_deleted, summary.kept
        );
        Ok(summary)
    }

    /// Active configuration first, then mappings, then attachments, then the type. Returns the number
    /// of mappings removed.
    fn remove(&self, id: &DeviceTypeId) -> Result<usize, ReconcileError> {
        let resource = format!("device type {}", id.0);
        let wrap = |e: ApiError| ReconcileError::api(&resource, e);

        // NotFound and Conflict mean nothing is deployed
        match self
            .api
            .device_type_operation(id, DeviceTypeOperation::RemoveDeployedConfiguration)
        {
            Ok(_) => debug!("Removed deployed configuration of device type {}", id.0),
            Err(e) if e.is_not_found() || e.is_conflict() => {
                debug!("Device type {} has no deployed configuration: {}", id.0, e)
            }
            Err(e) => return Err(wrap(e)),
        }
        let mappings = self.api.mappings(id).map_err(wrap)?;
        for mapping in &mappings {
            self.api
                .delete_mapping(id, &mapping.application_interface_id)
                .map_err(wrap)?;
        }
        for ai in self.api.device_type_application_interfaces(id).map_err(wrap)? {
            self.api.detach_application_interface(id, &ai.id).map_err(wrap)?;
        }
        match self.api.detach_physical_interface(id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(wrap(e)),
        }
        self.api.delete::<DeviceType>(&id.0).map_err(wrap)?;
        info!("Device type {} deleted with {} mapping(s)", id.0, mappings.len());
        Ok(mappings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::platform::ResourceKind;
    use crate::services::testing::FakePlatform;

    #[test]
    fn ensure_switch_twice_creates_once() {
        let fake = FakePlatform::new();
        let types = DeviceTypeReconciler::new(&fake, 25);
        let first = types.ensure("switch", "Switch").expect("create");
        let second = types.ensure("switch", "Switch").expect("reuse");
        assert!(first.was_created());
        assert_eq!(second, Ensured::Reused(DeviceTypeId("switch".to_string())));
        assert_eq!(fake.calls("create device type"), 1);
        assert_eq!(fake.count(ResourceKind::DeviceType), 1);
    }

    #[test]
    fn ensure_propagates_auth_failures() {
        let fake = FakePlatform::new();
        fake.fail_next("get device type", ErrorKind::Auth);
        let err = DeviceTypeReconciler::new(&fake, 25)
            .ensure("valve", "Valve")
            .expect_err("auth");
        assert_eq!(err.kind(), Some(ErrorKind::Auth));
        assert_eq!(fake.calls("create device type"), 0);
    }

    #[test]
    fn teardown_keeps_gateways_across_pages() {
        let fake = FakePlatform::with_max_page_size(2);
        fake.seed_device_type("openhab-gateway", DeviceClass::Gateway);
        let types = DeviceTypeReconciler::new(&fake, 2);
        for name in ["switch", "valve", "lock"] {
            types.ensure(name, name).expect("ensure");
        }

        let summary = types.teardown().expect("teardown");
        assert_eq!(summary.deleted, 3);
        assert_eq!(summary.kept, 1);
        assert_eq!(fake.names(ResourceKind::DeviceType), vec!["openhab-gateway".to_string()]);
    }

    #[test]
    fn teardown_removes_the_deployed_configuration_first() {
        let fake = FakePlatform::new();
        let types = DeviceTypeReconciler::new(&fake, 25);
        types.ensure("valve", "Valve").expect("ensure");
        types.ensure("lock", "Lock").expect("ensure");
        fake.fail_next("remove-deployed-configuration lock", ErrorKind::NotFound);

        let summary = types.teardown().expect("teardown");
        assert_eq!(summary.deleted, 2);
        for id in ["valve", "lock"] {
            let removal = fake
                .first_call(&format!("remove-deployed-configuration {}", id))
                .expect("removal attempted");
            let delete = fake
                .first_call(&format!("delete device type {}", id))
                .expect("deleted");
            assert!(removal < delete, "{} deleted before its configuration was removed", id);
        }
    }

    #[test]
    fn teardown_aborts_when_configuration_removal_is_refused() {
        let fake = FakePlatform::new();
        let types = DeviceTypeReconciler::new(&fake, 25);
        types.ensure("valve", "Valve").expect("ensure");
        fake.fail_next("remove-deployed-configuration valve", ErrorKind::Auth);

        let err = types.teardown().expect_err("auth");
        assert_eq!(err.kind(), Some(ErrorKind::Auth));
        assert_eq!(fake.calls("delete device type"), 0);
        assert_eq!(fake.count(ResourceKind::DeviceType), 1);
    }

    #[test]
    fn teardown_aborts_on_conflict() {
        let fake = FakePlatform::new();
        let types = DeviceTypeReconciler::new(&fake, 25);
        types.ensure("alarm", "Alarm").expect("ensure");
        types.ensure("button", "Button").expect("ensure");
        fake.fail_next("delete device type alarm", ErrorKind::Conflict);

        let err = types.teardown().expect_err("conflict");
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert!(err.to_string().starts_with("device type alarm"));
        // nothing after the failing delete was attempted
        assert_eq!(fake.calls("delete device type button"), 0);
        assert_eq!(fake.count(ResourceKind::DeviceType), 2);
    }
}
