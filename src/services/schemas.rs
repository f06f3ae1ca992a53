use crate::error::ReconcileError;
use crate::models::platform::{Schema, SchemaDraft, SchemaId};
use crate::remote::MetadataApi;
use crate::services::support::{Ensured, describe, drain, first_match};
use log::{debug, info};
use serde_json::Value;

pub struct SchemaReconciler<'a, A: MetadataApi> {
    api: &'a A,
    page_size: usize,
}

impl<'a, A: MetadataApi> SchemaReconciler<'a, A> {
    pub fn new(api: &'a A, page_size: usize) -> Self {
        SchemaReconciler { api, page_size }
    }

    /// Uploads `document` under `name`, or overwrites the content of the existing schema.
    pub fn ensure(&self, name: &str, document: &Value, description: &str) -> Result<Ensured<SchemaId>, ReconcileError> {
        let resource = describe::<Schema>(name);
        if let Some(existing) =
            first_match::<Schema, A>(self.api, name).map_err(|e| ReconcileError::api(&resource, e))?
        {
            self.api
                .update_schema_content(&existing.id, document)
                .map_err(|e| ReconcileError::api(&resource, e))?;
            debug!("Schema {} ({}) content updated", name, existing.id.0);
            return Ok(Ensured::Updated(existing.id));
        }

        let draft = SchemaDraft {
            name,
            description,
            document,
        };
        match self.api.create_schema(draft) {
            Ok(schema) => {
                debug!("Schema {} created ({})", name, schema.id.0);
                Ok(Ensured::Created(schema.id))
            }
            Err(e) if e.is_conflict() => {
                let existing = first_match::<Schema, A>(self.api, name)
                    .map_err(|le| ReconcileError::api(&resource, le))?
                    .ok_or_else(|| ReconcileError::api(&resource, e))?;
                Ok(Ensured::Reused(existing.id))
            }
            Err(e) => Err(ReconcileError::api(resource, e)),
        }
    }

    /// Deletes every schema. Interfaces and event types must be gone already.
    pub fn teardown(&self) -> Result<usize, ReconcileError> {
        let removed = drain::<Schema, A, _>(self.api, self.page_size, |schema| {
            self.api
                .delete::<Schema>(&schema.id.0)
                .map_err(|e| ReconcileError::api(describe::<Schema>(&schema.name), e))?;
            info!("Schema {} ({}) deleted", schema.name, schema.id.0);
            Ok(())
        })?;
        info!("Deleted {} schema(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::platform::{EventTypeDraft, ResourceKind};
    use crate::services::testing::FakePlatform;
    use serde_json::json;

    #[test]
    fn creates_then_updates_content_in_place() {
        let fake = FakePlatform::new();
        let schemas = SchemaReconciler::new(&fake, 25);

        let first = schemas
            .ensure("api/switch", &json!({"v": 1}), "Switch")
            .expect("create");
        let second = schemas
            .ensure("api/switch", &json!({"v": 2}), "Switch")
            .expect("update");

        assert!(first.was_created());
        assert_eq!(second, Ensured::Updated(first.value().clone()));
        assert_eq!(fake.count(ResourceKind::Schema), 1);
        assert_eq!(fake.schema_content(first.value()), Some(json!({"v": 2})));
    }

    #[test]
    fn teardown_refuses_schemas_still_referenced() {
        let fake = FakePlatform::new();
        let schemas = SchemaReconciler::new(&fake, 25);
        let id = schemas.ensure("evt/valve", &json!({}), "Valve").expect("create").into_inner();
        fake.create_event_type(&EventTypeDraft {
            name: "valve".to_string(),
            description: None,
            schema_id: id,
        })
        .expect("event type");

        let err = schemas.teardown().expect_err("referenced schema");
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert!(err.to_string().starts_with("schema evt/valve"));
        assert_eq!(fake.count(ResourceKind::Schema), 1);
    }

    #[test]
    fn teardown_drains_all_pages() {
        let fake = FakePlatform::with_max_page_size(2);
        let schemas = SchemaReconciler::new(&fake, 2);
        for name in ["evt/a", "evt/b", "api/a", "api/b", "api/c"] {
            schemas.ensure(name, &json!({}), name).expect("create");
        }
        assert_eq!(schemas.teardown().expect("teardown"), 5);
        assert_eq!(fake.count(ResourceKind::Schema), 0);
    }
}
