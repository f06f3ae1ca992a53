//! Local schema documents, keyed by namespace and capability id.
//!
//! Documents are resolved once per run. Event payload schemas may be overridden by files under
//! `<dir>/evt/<id>.json`; interface schemas are always generated so they can never drift from the
//! mapping formulas that target them.

use crate::catalog::Capability;
use crate::error::ReconcileError;
use crate::generator;
use log::{debug, info};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaNamespace {
    /// Raw device event payloads.
    Event,
    /// Computed application interface state.
    Interface,
}

impl SchemaNamespace {
    pub fn prefix(self) -> &'static str {
        match self {
            SchemaNamespace::Event => "evt",
            SchemaNamespace::Interface => "api",
        }
    }

    /// Remote schema name, e.g. `evt/switch`.
    pub fn schema_name(self, capability_id: &str) -> String {
        format!("{}/{}", self.prefix(), capability_id)
    }

    fn file(self, dir: &Path, capability_id: &str) -> PathBuf {
        dir.join(self.prefix()).join(format!("{}.json", capability_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaDocuments {
    documents: BTreeMap<(SchemaNamespace, &'static str), Value>,
    overridden: usize,
}

impl SchemaDocuments {
    /// Derives documents for every supported capability without touching the filesystem.
    pub fn generated(catalog: &[Capability]) -> Self {
        let mut docs = SchemaDocuments::default();
        for cap in catalog {
            if let Some(doc) = generator::derive_event_schema(cap) {
                docs.documents.insert((SchemaNamespace::Event, cap.id), doc);
            }
            if let Some(doc) = generator::derive_schema(cap) {
                docs.documents.insert((SchemaNamespace::Interface, cap.id), doc);
            }
        }
        docs
    }

    /// Generated documents with event schemas replaced by the files found under `dir`.
    ///
    /// A missing file or directory falls back to the generated document; an unreadable or invalid
    /// file is an error.
    pub fn load(dir: &Path, catalog: &[Capability]) -> Result<Self, ReconcileError> {
        let mut docs = SchemaDocuments::generated(catalog);
        for cap in catalog.iter().filter(|c| generator::is_supported(c)) {
            let path = SchemaNamespace::Event.file(dir, cap.id);
            let raw = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ReconcileError::Document {
                        path,
                        message: e.to_string(),
                    });
                }
            };
            let doc: Value = serde_json::from_str(&raw).map_err(|e| ReconcileError::Document {
                path: path.clone(),
                message: e.to_string(),
            })?;
            if !doc.is_object() {
                return Err(ReconcileError::Document {
                    path,
                    message: "schema document must be a JSON object".to_string(),
                });
            }
            debug!("Using event schema for {} from {}", cap.id, path.display());
            docs.documents.insert((SchemaNamespace::Event, cap.id), doc);
            docs.overridden += 1;
        }
        info!(
            "Schema documents ready ({} total, {} event schema(s) from {})",
            docs.documents.len(),
            docs.overridden,
            dir.display()
        );
        Ok(docs)
    }

    pub fn get(&self, namespace: SchemaNamespace, capability_id: &'static str) -> Option<&Value> {
        self.documents.get(&(namespace, capability_id))
    }

    /// Number of event schemas that came from files rather than the generator.
    pub fn overridden(&self) -> usize {
        self.overridden
    }

    /// Writes every document as pretty JSON to `<dir>/<namespace>/<id>.json`. Returns the count.
    pub fn write_all(&self, dir: &Path) -> Result<usize, ReconcileError> {
        for ns in [SchemaNamespace::Event, SchemaNamespace::Interface] {
            let sub = dir.join(ns.prefix());
            fs::create_dir_all(&sub).map_err(|e| ReconcileError::Document {
                path: sub.clone(),
                message: e.to_string(),
            })?;
        }
        for ((ns, id), doc) in &self.documents {
            let path = ns.file(dir, id);
            let mut text = serde_json::to_string_pretty(doc).map_err(|e| ReconcileError::Document {
                path: path.clone(),
                message: e.to_string(),
            })?;
            text.push('\n');
            fs::write(&path, text).map_err(|e| ReconcileError::Document {
                path: path.clone(),
                message: e.to_string(),
            })?;
            debug!("Wrote {}", path.display());
        }
        Ok(self.documents.len())
    }
}
