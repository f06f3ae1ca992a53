//! Sequences the reconcilers into the create, deploy, teardown and differences workflows.
//!
//! Every workflow walks the catalog in order and stops at the first abort-class error; whatever was
//! done before that point stays done, and a rerun picks up from there.

use crate::catalog::Capability;
use crate::documents::{SchemaDocuments, SchemaNamespace};
use crate::error::{ErrorKind, ReconcileError};
use crate::generator;
use crate::models::platform::{DeviceTypeId, DeviceTypeOperation, EventTypeId};
use crate::remote::MetadataApi;
use crate::services::application_interfaces::ApplicationInterfaceReconciler;
use crate::services::device_types::DeviceTypeReconciler;
use crate::services::event_types::EventTypeReconciler;
use crate::services::physical_interfaces::PhysicalInterfaceReconciler;
use crate::services::schemas::SchemaReconciler;
use crate::services::support::Ensured;
use core::fmt;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Workflow {
    Create,
    Deploy,
    Teardown,
    Differences,
    /// Writes the generated schema documents locally; no remote calls.
    Export,
}

impl Workflow {
    pub fn as_str(self) -> &'static str {
        match self {
            Workflow::Create => "create",
            Workflow::Deploy => "deploy",
            Workflow::Teardown => "teardown",
            Workflow::Differences => "diff",
            Workflow::Export => "export",
        }
    }

    pub fn needs_remote(self) -> bool {
        self != Workflow::Export
    }
}

impl FromStr for Workflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Workflow::Create),
            "deploy" => Ok(Workflow::Deploy),
            "teardown" => Ok(Workflow::Teardown),
            "diff" | "differences" => Ok(Workflow::Differences),
            "export" => Ok(Workflow::Export),
            other => Err(format!(
                "unknown workflow `{}` (expected create, deploy, teardown, diff or export)",
                other
            )),
        }
    }
}

impl Display for Workflow {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub reused: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Capabilities with an unsupported value kind.
    pub skipped: usize,
    pub validation_failures: usize,
    /// Device types whose configuration was deployed.
    pub deployed: usize,
    /// Device types whose draft/active differences were listed.
    pub compared: usize,
}

impl RunSummary {
    /// Counts the outcome and reports it, e.g. `Event type valve created`.
    fn record<T>(&mut self, resource: &str, outcome: &Ensured<T>) {
        info!("{} {}", resource, outcome.verb());
        match outcome {
            Ensured::Created(_) => self.created += 1,
            Ensured::Reused(_) => self.reused += 1,
            Ensured::Updated(_) => self.updated += 1,
        }
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} reused={} updated={} deleted={} skipped={} validation_failures={} deployed={} compared={}",
            self.created,
            self.reused,
            self.updated,
            self.deleted,
            self.skipped,
            self.validation_failures,
            self.deployed,
            self.compared
        )
    }
}

pub struct Orchestrator<'a, A: MetadataApi> {
    api: &'a A,
    catalog: &'a [Capability],
    documents: &'a SchemaDocuments,
    page_size: usize,
    interface_prefix: &'a str,
}

impl<'a, A: MetadataApi> Orchestrator<'a, A> {
    pub fn new(
        api: &'a A,
        catalog: &'a [Capability],
        documents: &'a SchemaDocuments,
        page_size: usize,
        interface_prefix: &'a str,
    ) -> Self {
        Orchestrator {
            api,
            catalog,
            documents,
            page_size,
            interface_prefix,
        }
    }

    pub fn run(&self, workflow: Workflow) -> Result<RunSummary, ReconcileError> {
        match workflow {
            Workflow::Create => self.create(),
            Workflow::Deploy => self.deploy(),
            Workflow::Teardown => self.teardown(),
            Workflow::Differences => self.differences(),
            Workflow::Export => Ok(RunSummary::default()),
        }
    }

    /// Catalog entries the generator can handle; the rest are logged and counted as skipped.
    fn supported(&self, summary: &mut RunSummary) -> Vec<&'a Capability> {
        let mut out = Vec::with_capacity(self.catalog.len());
        for cap in self.catalog {
            if generator::is_supported(cap) {
                out.push(cap);
            } else {
                warn!(
                    "Skipping capability {}: unsupported item type {}",
                    cap.id, cap.item_type
                );
                summary.skipped += 1;
            }
        }
        out
    }

    fn document(
        &self,
        namespace: SchemaNamespace,
        cap: &Capability,
    ) -> Result<&'a serde_json::Value, ReconcileError> {
        self.documents
            .get(namespace, cap.id)
            .ok_or_else(|| ReconcileError::MissingDependency {
                resource: format!("schema {}", namespace.schema_name(cap.id)),
                dependency: "local schema document".to_string(),
            })
    }

    pub fn create(&self) -> Result<RunSummary, ReconcileError> {
        let mut summary = RunSummary::default();
        let caps = self.supported(&mut summary);
        let schemas = SchemaReconciler::new(self.api, self.page_size);
        let device_types = DeviceTypeReconciler::new(self.api, self.page_size);
        let event_types = EventTypeReconciler::new(self.api, self.page_size);
        let physical = PhysicalInterfaceReconciler::new(self.api, self.page_size);
        let application = ApplicationInterfaceReconciler::new(self.api, self.page_size);

        info!("Create: device types for {} capability(ies)", caps.len());
        for cap in &caps {
            let outcome = device_types.ensure(cap.id, cap.description())?;
            summary.record(&format!("Device type {}", cap.id), &outcome);
        }

        info!("Create: event types");
        let mut event_type_ids: BTreeMap<&str, EventTypeId> = BTreeMap::new();
        for cap in &caps {
            let name = SchemaNamespace::Event.schema_name(cap.id);
            let schema = schemas.ensure(&name, self.document(SchemaNamespace::Event, cap)?, cap.description())?;
            summary.record(&format!("Schema {}", name), &schema);
            let outcome = event_types.ensure(cap.id, schema.value(), cap.description())?;
            summary.record(&format!("Event type {}", cap.id), &outcome);
            event_type_ids.insert(cap.id, outcome.into_inner());
        }

        info!("Create: physical interfaces");
        for cap in &caps {
            let name = cap.physical_interface_name(self.interface_prefix);
            let outcome = physical.ensure(&name, cap.description())?;
            summary.record(&format!("Physical interface {}", name), &outcome);
            let event_type = event_type_ids.get(cap.id).ok_or_else(|| ReconcileError::MissingDependency {
                resource: format!("physical interface {}", name),
                dependency: format!("event type {}", cap.id),
            })?;
            physical.bind_event(outcome.value(), cap.event_id, event_type)?;
            physical.attach_to_device_type(&DeviceTypeId(cap.id.to_string()), outcome.value())?;
            debug!("Physical interface {} bound to {} and attached to device type {}", name, cap.event_id, cap.id);
        }

        info!("Create: application interfaces and mappings");
        for cap in &caps {
            let device_type = DeviceTypeId(cap.id.to_string());
            let name = SchemaNamespace::Interface.schema_name(cap.id);
            let schema = schemas.ensure(&name, self.document(SchemaNamespace::Interface, cap)?, cap.description())?;
            summary.record(&format!("Schema {}", name), &schema);
            let interface = application.ensure(cap.id, schema.value(), cap.description())?;
            summary.record(&format!("Application interface {}", cap.id), &interface);
            application.attach_to_device_type(&device_type, interface.value())?;

            let mapping =
                generator::derive_mapping(cap, &interface.value().id).ok_or_else(|| ReconcileError::MissingDependency {
                    resource: format!("device type {} mapping", cap.id),
                    dependency: "supported value kind".to_string(),
                })?;
            let outcome = application.upsert_mapping(&device_type, &mapping)?;
            summary.record(&format!("Mapping of device type {}", cap.id), &outcome);
            summary.validation_failures += application.validate_configuration(&device_type).len();
        }

        info!("Create finished: {}", summary);
        Ok(summary)
    }

    pub fn deploy(&self) -> Result<RunSummary, ReconcileError> {
        let mut summary = RunSummary::default();
        let device_types = DeviceTypeReconciler::new(self.api, self.page_size);
        for cap in self.supported(&mut summary) {
            let response =
                device_types.operation(&DeviceTypeId(cap.id.to_string()), DeviceTypeOperation::DeployConfiguration)?;
            info!("Deployed device type {}: {}", cap.id, response);
            summary.deployed += 1;
        }
        info!("Deploy finished: {}", summary);
        Ok(summary)
    }

    /// Logs the draft/active differences per device type. Device types that do not exist are skipped.
    pub fn differences(&self) -> Result<RunSummary, ReconcileError> {
        let mut summary = RunSummary::default();
        let device_types = DeviceTypeReconciler::new(self.api, self.page_size);
        for cap in self.supported(&mut summary) {
            let id = DeviceTypeId(cap.id.to_string());
            match device_types.operation(&id, DeviceTypeOperation::ListDifferences) {
                Ok(diff) => {
                    info!("Differences for device type {}: {}", cap.id, diff);
                    summary.compared += 1;
                }
                Err(e) if e.kind() == Some(ErrorKind::NotFound) => {
                    warn!("Device type {} does not exist; no differences to list", cap.id);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        info!("Differences finished: {}", summary);
        Ok(summary)
    }

    /// Removes everything of every kind, dependents first. Gateway device types stay.
    pub fn teardown(&self) -> Result<RunSummary, ReconcileError> {
        let mut summary = RunSummary::default();

        info!("Teardown: device types");
        let device_types = DeviceTypeReconciler::new(self.api, self.page_size).teardown()?;
        summary.deleted += device_types.deleted + device_types.mappings_deleted;

        info!("Teardown: physical interfaces");
        summary.deleted += PhysicalInterfaceReconciler::new(self.api, self.page_size).teardown()?;

        info!("Teardown: event types");
        summary.deleted += EventTypeReconciler::new(self.api, self.page_size).teardown()?;

        info!("Teardown: application interfaces");
        summary.deleted += ApplicationInterfaceReconciler::new(self.api, self.page_size).teardown()?;

        info!("Teardown: schemas");
        summary.deleted += SchemaReconciler::new(self.api, self.page_size).teardown()?;

        info!("Teardown finished: {}", summary);
        Ok(summary)
    }
}
