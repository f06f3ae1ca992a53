use crate::error::ReconcileError;
use crate::models::platform::{
    DeviceTypeId, EventBinding, EventTypeId, PhysicalInterface, PhysicalInterfaceDraft, PhysicalInterfaceId,
};
use crate::remote::MetadataApi;
use crate::services::support::{Ensured, create_or_reuse, describe, drain};
use log::{debug, info};

pub struct PhysicalInterfaceReconciler<'a, A: MetadataApi> {
    api: &'a A,
    page_size: usize,
}

impl<'a, A: MetadataApi> PhysicalInterfaceReconciler<'a, A> {
    pub fn new(api: &'a A, page_size: usize) -> Self {
        PhysicalInterfaceReconciler { api, page_size }
    }

    pub fn ensure(&self, name: &str, description: &str) -> Result<Ensured<PhysicalInterfaceId>, ReconcileError> {
        let draft = PhysicalInterfaceDraft {
            name: name.to_string(),
            description: Some(description.to_string()),
        };
        let ensured =
            create_or_reuse::<PhysicalInterface, A, _>(self.api, name, || self.api.create_physical_interface(&draft))?;
        Ok(ensured.map(|pi| pi.id))
    }

    /// Binds `event_id` to the event type, replacing whatever the event id was bound to before.
    pub fn bind_event(
        &self,
        interface: &PhysicalInterfaceId,
        event_id: &str,
        event_type: &EventTypeId,
    ) -> Result<(), ReconcileError> {
        let resource = format!("physical interface {} event {}", interface.0, event_id);
        let bound = self
            .api
            .event_bindings(interface)
            .map_err(|e| ReconcileError::api(&resource, e))?;
        if bound.iter().any(|b| b.event_id == event_id) {
            debug!("Unbinding previous mapping of event {} on {}", event_id, interface.0);
            self.api
                .unbind_event(interface, event_id)
                .map_err(|e| ReconcileError::api(&resource, e))?;
        }
        let binding = EventBinding {
            event_id: event_id.to_string(),
            event_type_id: event_type.clone(),
        };
        self.api
            .bind_event(interface, &binding)
            .map_err(|e| ReconcileError::api(resource, e))
    }

    pub fn attach_to_device_type(
        &self,
        device_type: &DeviceTypeId,
        interface: &PhysicalInterfaceId,
    ) -> Result<(), ReconcileError> {
        self.api
            .attach_physical_interface(device_type, interface)
            .map_err(|e| ReconcileError::api(format!("device type {} physical interface", device_type.0), e))
    }

    /// Unbinds every event of every physical interface, then deletes the interface.
    pub fn teardown(&self) -> Result<usize, ReconcileError> {
        let removed = drain::<PhysicalInterface, A, _>(self.api, self.page_size, |pi| {
            let resource = describe::<PhysicalInterface>(&pi.name);
            let bindings = self
                .api
                .event_bindings(&pi.id)
                .map_err(|e| ReconcileError::api(&resource, e))?;
            for binding in &bindings {
                self.api
                    .unbind_event(&pi.id, &binding.event_id)
                    .map_err(|e| ReconcileError::api(&resource, e))?;
            }
            self.api
                .delete::<PhysicalInterface>(&pi.id.0)
                .map_err(|e| ReconcileError::api(resource, e))?;
            info!(
                "Physical interface {} ({}) deleted after removing {} binding(s)",
                pi.name,
                pi.id.0,
                bindings.len()
            );
            Ok(())
        })?;
        info!("Deleted {} physical interface(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::platform::{EventTypeDraft, ResourceKind, SchemaDraft};
    use crate::services::testing::FakePlatform;
    use serde_json::json;

    fn event_type(fake: &FakePlatform, name: &str) -> EventTypeId {
        let schema = fake
            .create_schema(SchemaDraft {
                name,
                description: name,
                document: &json!({}),
            })
            .expect("schema");
        fake.create_event_type(&EventTypeDraft {
            name: name.to_string(),
            description: None,
            schema_id: schema.id,
        })
        .expect("event type")
        .id
    }

    #[test]
    fn rebinding_replaces_the_previous_event_type() {
        let fake = FakePlatform::new();
        let interfaces = PhysicalInterfaceReconciler::new(&fake, 25);
        let pi = interfaces.ensure("OH2-switch-state", "Switch").expect("ensure").into_inner();
        let old = event_type(&fake, "old");
        let new = event_type(&fake, "new");

        interfaces.bind_event(&pi, "state", &old).expect("bind");
        interfaces.bind_event(&pi, "state", &new).expect("rebind");

        let bindings = fake.bindings_of(&pi);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].event_type_id, new);
        assert_eq!(fake.calls("unbind"), 1);
    }

    #[test]
    fn teardown_unbinds_every_event_before_deleting() {
        let fake = FakePlatform::new();
        let interfaces = PhysicalInterfaceReconciler::new(&fake, 25);
        let pi = interfaces.ensure("OH2-thermostatMode-state", "Thermostat Mode").expect("ensure").into_inner();
        for event_id in ["state", "mode", "setpoint"] {
            let et = event_type(&fake, event_id);
            interfaces.bind_event(&pi, event_id, &et).expect("bind");
        }

        assert_eq!(interfaces.teardown().expect("teardown"), 1);

        let delete_at = fake.first_call("delete physical interface").expect("deleted");
        let journal = fake.journal();
        let unbinds: Vec<usize> = journal
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with("unbind"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(unbinds.len(), 3);
        assert!(unbinds.iter().all(|&i| i < delete_at));
        assert_eq!(fake.count(ResourceKind::PhysicalInterface), 0);
    }

    #[test]
    fn teardown_with_page_size_one_removes_all_three() {
        let fake = FakePlatform::with_max_page_size(1);
        let interfaces = PhysicalInterfaceReconciler::new(&fake, 1);
        for name in ["OH2-lock-state", "OH2-valve-state", "OH2-button-state"] {
            interfaces.ensure(name, name).expect("ensure");
        }
        assert_eq!(interfaces.teardown().expect("teardown"), 3);
        assert_eq!(fake.count(ResourceKind::PhysicalInterface), 0);
    }

    #[test]
    fn attach_replaces_device_type_interface() {
        let fake = FakePlatform::new();
        fake.seed_device_type("switch", crate::models::platform::DeviceClass::Device);
        let interfaces = PhysicalInterfaceReconciler::new(&fake, 25);
        let pi = interfaces.ensure("OH2-switch-state", "Switch").expect("ensure").into_inner();
        let dt = DeviceTypeId("switch".to_string());
        interfaces.attach_to_device_type(&dt, &pi).expect("attach");
        assert_eq!(fake.attached_physical("switch"), Some(pi.0));
    }
}
