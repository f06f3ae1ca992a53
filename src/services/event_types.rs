use crate::error::ReconcileError;
use crate::models::platform::{EventType, EventTypeDraft, EventTypeId, SchemaId};
use crate::remote::MetadataApi;
use crate::services::support::{Ensured, create_or_reuse, describe, drain};
use log::{info, warn};

pub struct EventTypeReconciler<'a, A: MetadataApi> {
    api: &'a A,
    page_size: usize,
}

impl<'a, A: MetadataApi> EventTypeReconciler<'a, A> {
    pub fn new(api: &'a A, page_size: usize) -> Self {
        EventTypeReconciler { api, page_size }
    }

    pub fn ensure(
        &self,
        name: &str,
        schema_id: &SchemaId,
        description: &str,
    ) -> Result<Ensured<EventTypeId>, ReconcileError> {
        let draft = EventTypeDraft {
            name: name.to_string(),
            description: Some(description.to_string()),
            schema_id: schema_id.clone(),
        };
        let ensured = create_or_reuse::<EventType, A, _>(self.api, name, || self.api.create_event_type(&draft))?;
        if let Ensured::Reused(existing) = &ensured
            && &existing.schema_id != schema_id
        {
            warn!(
                "Event type {} ({}) references schema {}, expected {}; leaving it as is",
                name, existing.id.0, existing.schema_id.0, schema_id.0
            );
        }
        Ok(ensured.map(|et| et.id))
    }

    pub fn delete(&self, id: &EventTypeId) -> Result<(), ReconcileError> {
        self.api
            .delete::<EventType>(&id.0)
            .map_err(|e| ReconcileError::api(format!("event type {}", id.0), e))
    }

    /// Deletes every event type; aborts on the first failure.
    pub fn teardown(&self) -> Result<usize, ReconcileError> {
        let removed = drain::<EventType, A, _>(self.api, self.page_size, |et| {
            self.api
                .delete::<EventType>(&et.id.0)
                .map_err(|e| ReconcileError::api(describe::<EventType>(&et.name), e))?;
            info!("Event type {} ({}) deleted", et.name, et.id.0);
            Ok(())
        })?;
        info!("Deleted {} event type(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::platform::{EventBinding, PhysicalInterfaceDraft, ResourceKind, SchemaDraft};
    use crate::services::testing::FakePlatform;
    use serde_json::json;

    fn schema(fake: &FakePlatform, name: &str) -> SchemaId {
        fake.create_schema(SchemaDraft {
            name,
            description: name,
            document: &json!({}),
        })
        .expect("schema")
        .id
    }

    #[test]
    fn ensure_is_idempotent() {
        let fake = FakePlatform::new();
        let schema_id = schema(&fake, "evt/switch");
        let events = EventTypeReconciler::new(&fake, 25);

        let first = events.ensure("switch", &schema_id, "Switch").expect("create");
        let second = events.ensure("switch", &schema_id, "Switch").expect("reuse");
        assert!(first.was_created());
        assert_eq!(second, Ensured::Reused(first.value().clone()));
        assert_eq!(fake.calls("create event type"), 1);
    }

    #[test]
    fn teardown_aborts_on_bound_event_type() {
        let fake = FakePlatform::new();
        let schema_id = schema(&fake, "evt/alarm");
        let events = EventTypeReconciler::new(&fake, 25);
        let et = events.ensure("alarm", &schema_id, "Alarm").expect("create").into_inner();
        let pi = fake
            .create_physical_interface(&PhysicalInterfaceDraft {
                name: "OH2-alarm-state".to_string(),
                description: None,
            })
            .expect("pi");
        fake.bind_event(
            &pi.id,
            &EventBinding {
                event_id: "state".to_string(),
                event_type_id: et.clone(),
            },
        )
        .expect("bind");

        let err = events.teardown().expect_err("bound event type");
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert_eq!(fake.count(ResourceKind::EventType), 1);

        fake.unbind_event(&pi.id, "state").expect("unbind");
        events.delete(&et).expect("delete");
        assert_eq!(fake.count(ResourceKind::EventType), 0);
    }
}
