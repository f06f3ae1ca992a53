//! Error taxonomy shared by the platform client and the reconcilers.
//!
//! HTTP status codes are mapped into [`ErrorKind`] exactly once, in [`ErrorKind::classify`], at the
//! client boundary. Everything above the client reasons about the kind, never about the status.

use crate::models::platform::ResourceKind;
use core::fmt;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The resource is absent. Often the expected answer of an existence check.
    NotFound,
    /// Already exists on create, or still referenced by dependents on delete.
    Conflict,
    /// Malformed request; repeating it cannot succeed.
    PermanentRequest,
    /// Credentials missing, invalid or lacking permission.
    Auth,
    /// Server errors, transport failures, undecodable responses.
    Unexpected,
}

impl ErrorKind {
    pub fn classify(status: u16) -> ErrorKind {
        match status {
            400 | 422 => ErrorKind::PermanentRequest,
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            _ => ErrorKind::Unexpected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PermanentRequest => "invalid request",
            ErrorKind::Auth => "not authorized",
            ErrorKind::Unexpected => "unexpected error",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    /// HTTP status when the service answered at all.
    pub status: Option<u16>,
    pub message: String,
    /// Structured error body returned by the service, if it was JSON.
    pub payload: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ApiError {
            kind,
            status: None,
            message: message.into(),
            payload: None,
        }
    }

    /// Builds the error for a non-success response. The body is kept as payload when it parses as
    /// JSON, and its `message` field (if any) becomes the error message.
    pub fn from_status(status: u16, body: &str) -> Self {
        let payload = serde_json::from_str::<Value>(body).ok();
        let message = payload
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    String::from("<no body>")
                } else {
                    trimmed.to_string()
                }
            });
        ApiError {
            kind: ErrorKind::classify(status),
            status: Some(status),
            message,
            payload,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ApiError::new(ErrorKind::Unexpected, format!("transport error: {}", message.into()))
    }

    pub fn decode(message: impl Into<String>) -> Self {
        ApiError::new(ErrorKind::Unexpected, format!("undecodable response: {}", message.into()))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (http {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl Error for ApiError {}

/// Failure of a reconciliation step, tagged with the resource being worked on.
#[derive(Debug)]
pub enum ReconcileError {
    Api { resource: String, source: ApiError },
    /// A resource that must exist before this step could not be found.
    MissingDependency { resource: String, dependency: String },
    /// A local schema document could not be read, parsed or written.
    Document { path: PathBuf, message: String },
    /// A drain pass listed exactly the items of the previous pass.
    StalledListing { kind: ResourceKind, remaining: usize },
}

impl ReconcileError {
    pub fn api(resource: impl Into<String>, source: ApiError) -> Self {
        ReconcileError::Api {
            resource: resource.into(),
            source,
        }
    }

    /// Kind of the underlying remote failure, if this error came from the service.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ReconcileError::Api { source, .. } => Some(source.kind),
            _ => None,
        }
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Api { resource, source } => write!(f, "{}: {}", resource, source),
            ReconcileError::MissingDependency { resource, dependency } => {
                write!(f, "{}: required {} does not exist", resource, dependency)
            }
            ReconcileError::Document { path, message } => {
                write!(f, "schema document {}: {}", path.display(), message)
            }
            ReconcileError::StalledListing { kind, remaining } => write!(
                f,
                "{} listing did not shrink after deleting {} item(s); refusing to loop",
                kind.label(),
                remaining
            ),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReconcileError::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}
