//! Blocking HTTP client for the device-management metadata API (v0002).
//!
//! - Blocking client using `ureq` (no async).
//! - Uses the resource models in `crate::models::platform`.
//! - Covers only the metadata endpoints the reconcilers need: schemas, event types, physical and
//!   application interfaces, device types, their relationships and configuration operations.
//!
//! Authentication
//! - HTTP Basic with the organization's API key and token on every request.
//!
//! Non-success statuses are turned into [`ApiError`] here and nowhere else.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::Method;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{ApiError, ErrorKind};
use crate::models::platform::*;
use crate::remote::MetadataApi;

const API_ROOT: &str = "/api/v0002";
const USER_AGENT: &str = concat!("gateway-factory/", env!("CARGO_PKG_VERSION"));

/// HTTP verbs the client issues.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Operation {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Operation {
    fn method(self) -> Method {
        match self {
            Operation::Get => Method::GET,
            Operation::Post => Method::POST,
            Operation::Put => Method::PUT,
            Operation::Patch => Method::PATCH,
            Operation::Delete => Method::DELETE,
        }
    }
}

enum Payload {
    Empty,
    Json(Vec<u8>),
    Multipart(Multipart),
}

impl Payload {
    fn json<T: Serialize + ?Sized>(value: &T) -> Result<Payload, ApiError> {
        serde_json::to_vec(value)
            .map(Payload::Json)
            .map_err(|e| ApiError::new(ErrorKind::PermanentRequest, format!("cannot encode request body: {}", e)))
    }
}

/// `multipart/form-data` body for schema uploads.
struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    fn new() -> Self {
        Multipart {
            boundary: format!("gateway-factory-{:016x}", rand::random::<u64>()),
            body: Vec::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.part_header(name, None);
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn file(mut self, name: &str, filename: &str, content: &[u8]) -> Self {
        self.part_header(name, Some(filename));
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn part_header(&mut self, name: &str, filename: Option<&str>) {
        let disposition = match filename {
            Some(f) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n",
                name, f
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
        };
        self.body.extend_from_slice(format!("--{}\r\n{}\r\n", self.boundary, disposition).as_bytes());
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (format!("multipart/form-data; boundary={}", self.boundary), self.body)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| ApiError::decode(format!("{} at `{}`", e.inner(), e.path())))
}

fn schema_upload(name: Option<&str>, description: Option<&str>, document: &Value) -> Result<Multipart, ApiError> {
    let content = serde_json::to_vec_pretty(document)
        .map_err(|e| ApiError::new(ErrorKind::PermanentRequest, format!("cannot encode schema document: {}", e)))?;
    let mut form = Multipart::new();
    if let Some(n) = name {
        form = form.text("name", n);
    }
    if let Some(d) = description {
        form = form.text("description", d);
    }
    let filename = format!("{}.json", name.map(|n| n.replace('/', "-")).unwrap_or_else(|| "schema".into()));
    Ok(form.file("schemaFile", &filename, &content))
}

pub struct PlatformClient {
    agent: ureq::Agent,
    base_url: String,
    authorization: String,
}

impl PlatformClient {
    pub fn new(
        org_id: &str,
        domain: &str,
        api_key: &str,
        api_token: &str,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        if org_id.trim().is_empty() {
            return Err(ApiError::new(ErrorKind::PermanentRequest, "organization id is empty"));
        }
        if api_key.trim().is_empty() || api_token.trim().is_empty() {
            return Err(ApiError::new(ErrorKind::Auth, "API key or token is empty"));
        }

        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let credentials = STANDARD.encode(format!("{}:{}", api_key.trim(), api_token.trim()));
        Ok(PlatformClient {
            agent,
            base_url: format!("https://{}.{}{}", org_id.trim(), domain.trim(), API_ROOT),
            authorization: format!("Basic {}", credentials),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn prepare<B>(&self, builder: ureq::RequestBuilder<B>, query: &[(&str, String)]) -> ureq::RequestBuilder<B> {
        let mut builder = builder
            .header("Accept", "application/json")
            .header("Authorization", &self.authorization)
            .header("User-Agent", USER_AGENT);
        for (k, v) in query {
            builder = builder.query(*k, v);
        }
        builder
    }

    /// Issues one request and returns the body of a 2xx response.
    fn send(
        &self,
        operation: Operation,
        path: &str,
        query: &[(&str, String)],
        payload: Payload,
    ) -> Result<String, ApiError> {
        let url = self.url(path);
        debug!("{} {}", operation.method(), url);

        let (content_type, body) = match payload {
            Payload::Empty => (None, None),
            Payload::Json(bytes) => (Some("application/json".to_string()), Some(bytes)),
            Payload::Multipart(form) => {
                let (ct, bytes) = form.finish();
                (Some(ct), Some(bytes))
            }
        };

        let result = match operation {
            Operation::Get => self.prepare(self.agent.get(url.as_str()), query).call(),
            Operation::Delete => self.prepare(self.agent.delete(url.as_str()), query).call(),
            Operation::Post | Operation::Put | Operation::Patch => {
                let builder = match operation {
                    Operation::Post => self.agent.post(url.as_str()),
                    Operation::Put => self.agent.put(url.as_str()),
                    _ => self.agent.patch(url.as_str()),
                };
                let builder = self.prepare(builder, query);
                match (content_type, body) {
                    (Some(ct), Some(bytes)) => builder.header("Content-Type", &ct).send(&bytes[..]),
                    _ => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|e| ApiError::transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::transport(e.to_string()))?;
        if status.is_success() {
            Ok(text)
        } else {
            debug!("{} {} -> {}: {}", operation.method(), url, status.as_u16(), text);
            Err(ApiError::from_status(status.as_u16(), &text))
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let body = self.send(Operation::Get, path, query, Payload::Empty)?;
        decode(&body)
    }

    fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        operation: Operation,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let text = self.send(operation, path, &[], Payload::json(body)?)?;
        decode(&text)
    }

    /// Like [`Self::send_json`] for endpoints whose response body is irrelevant or empty.
    fn send_json_discard<B: Serialize + ?Sized>(
        &self,
        operation: Operation,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        self.send(operation, path, &[], Payload::json(body)?).map(|_| ())
    }

    fn item_path(kind: ResourceKind, id: &str) -> String {
        format!("{}/{}", kind.collection(), id)
    }
}

impl MetadataApi for PlatformClient {
    fn list<R: Resource>(&self, request: &PageRequest) -> Result<Page<R>, ApiError> {
        let mut query = vec![("_limit", request.limit.to_string())];
        if let Some(b) = &request.bookmark {
            query.push(("_bookmark", b.clone()));
        }
        if let Some(n) = &request.name {
            query.push(("name", n.clone()));
        }
        self.get_json(R::KIND.collection(), &query)
    }

    fn get<R: Resource>(&self, id: &str) -> Result<R, ApiError> {
        self.get_json(&Self::item_path(R::KIND, id), &[])
    }

    fn delete<R: Resource>(&self, id: &str) -> Result<(), ApiError> {
        self.send(Operation::Delete, &Self::item_path(R::KIND, id), &[], Payload::Empty)
            .map(|_| ())
    }

    fn create_schema(&self, draft: SchemaDraft<'_>) -> Result<Schema, ApiError> {
        let form = schema_upload(Some(draft.name), Some(draft.description), draft.document)?;
        let body = self.send(
            Operation::Post,
            ResourceKind::Schema.collection(),
            &[],
            Payload::Multipart(form),
        )?;
        decode(&body)
    }

    fn update_schema_content(&self, id: &SchemaId, document: &Value) -> Result<(), ApiError> {
        let form = schema_upload(None, None, document)?;
        let path = format!("{}/content", Self::item_path(ResourceKind::Schema, &id.0));
        self.send(Operation::Put, &path, &[], Payload::Multipart(form)).map(|_| ())
    }

    fn create_event_type(&self, draft: &EventTypeDraft) -> Result<EventType, ApiError> {
        self.send_json(Operation::Post, ResourceKind::EventType.collection(), draft)
    }

    fn create_physical_interface(&self, draft: &PhysicalInterfaceDraft) -> Result<PhysicalInterface, ApiError> {
        self.send_json(Operation::Post, ResourceKind::PhysicalInterface.collection(), draft)
    }

    fn create_application_interface(
        &self,
        draft: &ApplicationInterfaceDraft,
    ) -> Result<ApplicationInterface, ApiError> {
        self.send_json(Operation::Post, ResourceKind::ApplicationInterface.collection(), draft)
    }

    fn create_device_type(&self, draft: &DeviceTypeDraft) -> Result<DeviceType, ApiError> {
        self.send_json(Operation::Post, ResourceKind::DeviceType.collection(), draft)
    }

    fn event_bindings(&self, physical_interface: &PhysicalInterfaceId) -> Result<Vec<EventBinding>, ApiError> {
        self.get_json(&format!("/physicalinterfaces/{}/events", physical_interface.0), &[])
    }

    fn bind_event(&self, physical_interface: &PhysicalInterfaceId, binding: &EventBinding) -> Result<(), ApiError> {
        self.send_json_discard(
            Operation::Post,
            &format!("/physicalinterfaces/{}/events", physical_interface.0),
            binding,
        )
    }

    fn unbind_event(&self, physical_interface: &PhysicalInterfaceId, event_id: &str) -> Result<(), ApiError> {
        let path = format!("/physicalinterfaces/{}/events/{}", physical_interface.0, event_id);
        self.send(Operation::Delete, &path, &[], Payload::Empty).map(|_| ())
    }

    fn device_type_application_interfaces(
        &self,
        device_type: &DeviceTypeId,
    ) -> Result<Vec<ApplicationInterface>, ApiError> {
        self.get_json(&format!("/device/types/{}/applicationinterfaces", device_type.0), &[])
    }

    fn attach_application_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterface,
    ) -> Result<(), ApiError> {
        self.send_json_discard(
            Operation::Post,
            &format!("/device/types/{}/applicationinterfaces", device_type.0),
            interface,
        )
    }

    fn detach_application_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterfaceId,
    ) -> Result<(), ApiError> {
        let path = format!("/device/types/{}/applicationinterfaces/{}", device_type.0, interface.0);
        self.send(Operation::Delete, &path, &[], Payload::Empty).map(|_| ())
    }

    fn attach_physical_interface(
        &self,
        device_type: &DeviceTypeId,
        interface: &PhysicalInterfaceId,
    ) -> Result<(), ApiError> {
        self.send_json_discard(
            Operation::Put,
            &format!("/device/types/{}/physicalinterface", device_type.0),
            &json!({ "id": interface.0 }),
        )
    }

    fn detach_physical_interface(&self, device_type: &DeviceTypeId) -> Result<(), ApiError> {
        let path = format!("/device/types/{}/physicalinterface", device_type.0);
        self.send(Operation::Delete, &path, &[], Payload::Empty).map(|_| ())
    }

    fn mappings(&self, device_type: &DeviceTypeId) -> Result<Vec<PropertyMapping>, ApiError> {
        self.get_json(&format!("/device/types/{}/mappings", device_type.0), &[])
    }

    fn mapping(
        &self,
        device_type: &DeviceTypeId,
        interface: &ApplicationInterfaceId,
    ) -> Result<PropertyMapping, ApiError> {
        self.get_json(&format!("/device/types/{}/mappings/{}", device_type.0, interface.0), &[])
    }

    fn create_mapping(&self, device_type: &DeviceTypeId, mapping: &PropertyMapping) -> Result<(), ApiError> {
        self.send_json_discard(Operation::Post, &format!("/device/types/{}/mappings", device_type.0), mapping)
    }

    fn update_mapping(&self, device_type: &DeviceTypeId, mapping: &PropertyMapping) -> Result<(), ApiError> {
        let path = format!(
            "/device/types/{}/mappings/{}",
            device_type.0, mapping.application_interface_id.0
        );
        self.send_json_discard(Operation::Put, &path, mapping)
    }

    fn delete_mapping(&self, device_type: &DeviceTypeId, interface: &ApplicationInterfaceId) -> Result<(), ApiError> {
        let path = format!("/device/types/{}/mappings/{}", device_type.0, interface.0);
        self.send(Operation::Delete, &path, &[], Payload::Empty).map(|_| ())
    }

    fn device_type_operation(
        &self,
        device_type: &DeviceTypeId,
        operation: DeviceTypeOperation,
    ) -> Result<Value, ApiError> {
        let text = self.send(
            Operation::Patch,
            &Self::item_path(ResourceKind::DeviceType, &device_type.0),
            &[],
            Payload::json(&json!({ "operation": operation.as_str() }))?,
        )?;
        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            decode(&text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_org_scoped_base_url_and_basic_auth() {
        let client = PlatformClient::new(
            " abc123 ",
            "internetofthings.ibmcloud.com",
            "a-abc123-key",
            "secret",
            Duration::from_secs(5),
        )
        .expect("client builds");
        assert_eq!(
            client.url("/schemas"),
            "https://abc123.internetofthings.ibmcloud.com/api/v0002/schemas"
        );
        assert_eq!(
            client.url("device/types"),
            "https://abc123.internetofthings.ibmcloud.com/api/v0002/device/types"
        );
        assert_eq!(client.authorization, format!("Basic {}", STANDARD.encode("a-abc123-key:secret")));
    }

    #[test]
    fn rejects_missing_credentials() {
        let err = PlatformClient::new("org", "example.com", "key", "  ", Duration::from_secs(5))
            .err()
            .expect("empty token rejected");
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[test]
    fn multipart_body_carries_fields_and_file() {
        let document = json!({"type": "object"});
        let form = schema_upload(Some("api/switch"), Some("Switch"), &document).expect("form builds");
        let boundary = form.boundary.clone();
        let (content_type, body) = form.finish();
        let text = String::from_utf8(body).expect("utf8 body");

        assert_eq!(content_type, format!("multipart/form-data; boundary={}", boundary));
        assert!(text.contains("name=\"name\"\r\n\r\napi/switch\r\n"));
        assert!(text.contains("name=\"description\"\r\n\r\nSwitch\r\n"));
        assert!(text.contains("name=\"schemaFile\"; filename=\"api-switch.json\""));
        assert!(text.contains("\"type\": \"object\""));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn decode_reports_failing_path() {
        let err = decode::<Page<EventType>>(r#"{"results":[{"id":"e1","name":"switch"}]}"#)
            .err()
            .expect("missing schemaId rejected");
        assert_eq!(err.kind, ErrorKind::Unexpected);
        assert!(err.message.contains("results[0]"), "message was {}", err.message);
    }

    #[test]
    fn decodes_device_type_page_fixture() {
        let json = std::fs::read_to_string("tests/data/device-types-page.json").expect("fixture present");
        let page: Page<DeviceType> = decode(&json).expect("page decodes");
        assert_eq!(page.results.len(), 3);
        assert_eq!(page.meta.total_rows, 31);
        assert!(page.bookmark.is_some());
        assert_eq!(page.results[0].class_id, DeviceClass::Gateway);
        assert_eq!(page.results[1].id, DeviceTypeId("switch".into()));
        assert!(page.results[2].description.is_none());
    }

    #[test]
    fn operations_map_to_http_methods() {
        assert_eq!(Operation::Patch.method(), Method::PATCH);
        assert_eq!(Operation::Delete.method(), Method::DELETE);
    }
}
