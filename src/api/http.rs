//! HTTP transport for the device WebAPI and the app backend proxy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::config::{self, Config, ExecutionContext};
use crate::print::PrintSettings;

/// `license_category` sent with every verify request
pub const LICENSE_CATEGORY: u8 = 1;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server error {status}: {body}")]
    Server { status: StatusCode, body: String },
    #[error("Invalid response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Application id is not resolved yet")]
    MissingAppId,
}

impl ApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Request(e) if e.is_timeout())
    }

    /// Structured rejection carried by a non-2xx response body, if any.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            ApiError::Server { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

/// Body of a request the backend refused to carry out
#[derive(Debug, Clone, Deserialize)]
pub struct Rejection {
    pub error_code: i64,
    #[serde(default)]
    pub error_details: Option<RejectionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectionDetails {
    #[serde(default)]
    pub error_type: Option<String>,
}

/// Which service a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The local device WebAPI
    Device,
    /// The application's own backend, reached through a proxy path
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppContextInfo {
    pub app_id: String,
    pub app_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Capability {
    pub serial_no: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LicenseStatus {
    #[serde(default)]
    pub is_valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub err_msg: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UsbStatus {
    #[serde(default)]
    pub is_inserted: bool,
}

#[derive(Debug, Deserialize)]
struct StorageList {
    #[serde(default)]
    storage_path_list: Vec<String>,
}

/// Event classes that can be subscribed to on the device event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTopic {
    Usb,
    DeviceStatus,
    Jobs,
}

impl EventTopic {
    pub fn path(self) -> &'static str {
        match self {
            EventTopic::Usb => "/subscription/eventstream/externaldevice/usb",
            EventTopic::DeviceStatus => "/subscription/eventstream/mfpdevice/status",
            EventTopic::Jobs => "/subscription/eventstream/jobs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    Files,
    Directories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyDirection {
    #[serde(rename = "apptousb")]
    AppToUsb,
    #[serde(rename = "usbtoapp")]
    UsbToApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyRequest {
    pub from_path: String,
    pub to_path: String,
    pub operation_type: CopyDirection,
}

/// Storage areas whose file lists can be queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    App,
    Usb,
}

/// Device and backend operations used by the application.
pub trait DeviceApi: Clone + Send + Sync + 'static {
    /// Bind the application id used for backend routes. Only the first call has an effect.
    fn bind_app_id(&self, app_id: &str) -> bool;

    fn app_context(&self) -> impl Future<Output = Result<AppContextInfo, ApiError>> + Send;

    fn capability(&self) -> impl Future<Output = Result<Capability, ApiError>> + Send;

    fn license_status(&self) -> impl Future<Output = Result<LicenseStatus, ApiError>> + Send;

    fn verify_license(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<VerifyResponse, ApiError>> + Send;

    fn remove_license(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn subscribe_events(
        &self,
        topic: EventTopic,
        event_names: Vec<String>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn usb_status(&self) -> impl Future<Output = Result<UsbStatus, ApiError>> + Send;

    fn copy_usb(
        &self,
        kind: CopyKind,
        request: CopyRequest,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn start_print_job(
        &self,
        settings: PrintSettings,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn list_files(&self, storage: Storage)
        -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;
}

/// Authenticated JSON client for the device API and backend proxy
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    config: Arc<Config>,
    app_id: Arc<OnceCell<String>>,
}

impl ApiClient {
    pub fn new(config: Arc<Config>) -> Self {
        let app_id = Arc::new(OnceCell::new());
        if let Some(ref id) = config.app_id {
            let _ = app_id.set(id.clone());
        }

        Self {
            client: reqwest::Client::new(),
            config,
            app_id,
        }
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.get().map(String::as_str)
    }

    /// Resolve the base URL for a target in the configured execution context
    pub fn base_url(&self, target: Target) -> Result<String, ApiError> {
        match (self.config.execution_context, target) {
            (ExecutionContext::Embedded, Target::Device) => {
                Ok(self.config.device_api_base.trim_end_matches('/').to_string())
            }
            // The console proxies every call, device calls included
            (ExecutionContext::Administrative, _) | (ExecutionContext::Embedded, Target::Backend) => {
                let app_id = self.app_id().ok_or(ApiError::MissingAppId)?;
                Ok(self.config.backend_base(app_id))
            }
        }
    }

    /// Issue a request and parse the JSON response.
    ///
    /// `GET` and `DELETE` payloads are sent as query parameters, everything
    /// else as a JSON body. An empty response body yields `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        target: Target,
        path: &str,
        payload: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, ApiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url(target)?, path))?;
        let body_method = !matches!(method, Method::GET | Method::DELETE);

        if let (false, Some(Value::Object(map))) = (body_method, payload) {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in map {
                match value {
                    Value::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }

        log::info!("Request URL: {}, Method: {}", url, method);

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let mut builder = self.client.request(method, url).timeout(timeout);

        if let Some(ref token) = self.config.access_token {
            builder = builder.header(config::ACCESS_TOKEN_HEADER, token);
        }
        if let (true, Some(payload)) = (body_method, payload) {
            log::debug!("Request data: {}", payload);
            builder = builder.json(payload);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = ApiError::from(e);
                if err.is_timeout() {
                    log::error!("Request timed out after {:?}", timeout);
                }
                return Err(err);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::error!("{} {}", status, body);
            return Err(ApiError::Server { status, body });
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(&bytes)?;
        log::debug!("Response data: {}", value);
        Ok(value)
    }

    pub async fn get(&self, target: Target, path: &str, queries: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::GET, target, path, queries, None).await
    }

    pub async fn post(&self, target: Target, path: &str, payload: &Value) -> Result<Value, ApiError> {
        self.request(Method::POST, target, path, Some(payload), None).await
    }

    pub async fn put(&self, target: Target, path: &str, payload: &Value) -> Result<Value, ApiError> {
        self.request(Method::PUT, target, path, Some(payload), None).await
    }

    pub async fn patch(&self, target: Target, path: &str, payload: &Value) -> Result<Value, ApiError> {
        self.request(Method::PATCH, target, path, Some(payload), None).await
    }

    pub async fn delete(&self, target: Target, path: &str, queries: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::DELETE, target, path, queries, None).await
    }

    async fn get_as<T: DeserializeOwned>(&self, target: Target, path: &str) -> Result<T, ApiError> {
        let value = self.get(target, path, None).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl DeviceApi for ApiClient {
    fn bind_app_id(&self, app_id: &str) -> bool {
        let bound = self.app_id.set(app_id.to_string()).is_ok();
        if !bound && self.app_id() != Some(app_id) {
            log::warn!(
                "Application id already bound to {:?}, ignoring {}",
                self.app_id(),
                app_id
            );
        }
        bound
    }

    async fn app_context(&self) -> Result<AppContextInfo, ApiError> {
        self.get_as(Target::Device, "/app/context/self").await
    }

    async fn capability(&self) -> Result<Capability, ApiError> {
        self.get_as(Target::Device, "/mfpdevice/capability").await
    }

    async fn license_status(&self) -> Result<LicenseStatus, ApiError> {
        self.get_as(Target::Backend, "/app/license/status").await
    }

    async fn verify_license(&self, code: &str) -> Result<VerifyResponse, ApiError> {
        let payload = json!({
            "license_category": LICENSE_CATEGORY,
            "license_code": code,
        });
        let value = self.post(Target::Backend, "/app/license/verify", &payload).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn remove_license(&self) -> Result<(), ApiError> {
        self.delete(Target::Backend, "/app/license/remove", None).await?;
        Ok(())
    }

    async fn subscribe_events(&self, topic: EventTopic, event_names: Vec<String>) -> Result<(), ApiError> {
        let payload = json!({ "event_names": event_names });
        self.post(Target::Device, topic.path(), &payload).await?;
        Ok(())
    }

    async fn usb_status(&self) -> Result<UsbStatus, ApiError> {
        self.get_as(Target::Device, "/externaldevice/usb").await
    }

    async fn copy_usb(&self, kind: CopyKind, request: CopyRequest) -> Result<(), ApiError> {
        let path = match kind {
            CopyKind::Files => "/externaldevice/usb/files/actions/copy",
            CopyKind::Directories => "/externaldevice/usb/directories/actions/copy",
        };
        self.post(Target::Device, path, &serde_json::to_value(&request)?).await?;
        Ok(())
    }

    async fn start_print_job(&self, settings: PrintSettings) -> Result<(), ApiError> {
        self.post(Target::Backend, "/print/jobs", &serde_json::to_value(&settings)?)
            .await?;
        Ok(())
    }

    async fn list_files(&self, storage: Storage) -> Result<Vec<String>, ApiError> {
        let path = match storage {
            Storage::App => "/app/storage/self/files",
            Storage::Usb => "/externaldevice/usb/files",
        };
        let queries = json!({ "is_recursive": false });
        let value = self.get(Target::Device, path, Some(&queries)).await?;
        let list: StorageList = serde_json::from_value(value)?;
        Ok(list.storage_path_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    fn client(context: ExecutionContext, app_id: Option<&str>) -> ApiClient {
        ApiClient::new(Arc::new(Config {
            execution_context: context,
            device_api_base: "http://device:50187/v1.0".into(),
            app_origin: "http://app.local".into(),
            app_id: app_id.map(String::from),
            ..Config::default()
        }))
    }

    #[test]
    fn test_embedded_routing() {
        let api = client(ExecutionContext::Embedded, None);
        assert_eq!(api.base_url(Target::Device).unwrap(), "http://device:50187/v1.0");
        assert!(matches!(
            api.base_url(Target::Backend),
            Err(ApiError::MissingAppId)
        ));

        assert!(api.bind_app_id("app-1"));
        assert_eq!(api.base_url(Target::Backend).unwrap(), "http://app.local/server/app-1");
    }

    #[test]
    fn test_administrative_routes_everything_through_proxy() {
        let api = client(ExecutionContext::Administrative, Some("app-2"));
        assert_eq!(
            api.base_url(Target::Device).unwrap(),
            "http://app.local/aplpx/server/app-2"
        );
        assert_eq!(
            api.base_url(Target::Backend).unwrap(),
            "http://app.local/aplpx/server/app-2"
        );
    }

    #[test]
    fn test_app_id_binds_once() {
        let api = client(ExecutionContext::Embedded, None);
        assert!(api.bind_app_id("first"));
        assert!(!api.bind_app_id("second"));
        assert_eq!(api.app_id(), Some("first"));

        // Clones share the binding
        let clone = api.clone();
        assert_eq!(clone.app_id(), Some("first"));
    }

    #[test]
    fn test_rejection_parsing() {
        let err = ApiError::Server {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error_code":3,"error_details":{"error_type":"Quota Empty Error"}}"#.into(),
        };
        let rejection = err.rejection().unwrap();
        assert_eq!(rejection.error_code, 3);
        assert_eq!(
            rejection.error_details.unwrap().error_type.as_deref(),
            Some("Quota Empty Error")
        );

        let err = ApiError::Server {
            status: StatusCode::BAD_GATEWAY,
            body: "<html>bad gateway</html>".into(),
        };
        assert!(err.rejection().is_none());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_copy_request_wire_format() {
        let request = CopyRequest {
            from_path: "zxk.csv".into(),
            to_path: "documents".into(),
            operation_type: CopyDirection::UsbToApp,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "from_path": "zxk.csv",
                "to_path": "documents",
                "operation_type": "usbtoapp",
            })
        );
    }

    /// Read one request: headers plus a `Content-Length` body
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let line = line.to_ascii_lowercase();
                        line.strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8(buf).unwrap()
    }

    fn respond(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    /// Serve a single canned response. Yields the raw request it answered.
    async fn serve_once(response: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(request);
        });

        (origin, rx)
    }

    fn local_client(origin: &str, token: Option<&str>) -> ApiClient {
        let mut api = ApiClient::new(Arc::new(Config {
            execution_context: ExecutionContext::Embedded,
            device_api_base: format!("{}/v1.0", origin),
            app_origin: origin.to_string(),
            access_token: token.map(String::from),
            app_id: Some("app-1".into()),
            ..Config::default()
        }));
        api.client = reqwest::Client::builder().no_proxy().build().unwrap();
        api
    }

    fn request_line(request: &str) -> &str {
        request.lines().next().unwrap_or_default()
    }

    fn request_body(request: &str) -> &str {
        request.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_verify_sends_token_and_json_body() {
        let (origin, request) =
            serve_once(respond("200 OK", r#"{"is_valid":false,"err_msg":"已过期"}"#)).await;
        let api = local_client(&origin, Some("tok-1"));

        let resp = api.verify_license("1234567").await.unwrap();
        assert!(!resp.is_valid);
        assert_eq!(resp.err_msg.as_deref(), Some("已过期"));

        let request = request.await.unwrap();
        assert_eq!(
            request_line(&request),
            "POST /server/app-1/app/license/verify HTTP/1.1"
        );
        let headers = request.to_ascii_lowercase();
        assert!(headers.contains("x-webapi-accesstoken: tok-1"));
        assert!(headers.contains("content-type: application/json"));

        let body: Value = serde_json::from_str(request_body(&request)).unwrap();
        assert_eq!(
            body,
            json!({ "license_category": 1, "license_code": "1234567" })
        );
    }

    #[tokio::test]
    async fn test_get_sends_query_pairs() {
        let (origin, request) = serve_once(respond(
            "200 OK",
            r#"{"storage_path_list":["zxk.csv"]}"#,
        ))
        .await;
        let api = local_client(&origin, None);

        let files = api.list_files(Storage::Usb).await.unwrap();
        assert_eq!(files, vec!["zxk.csv".to_string()]);

        let request = request.await.unwrap();
        assert_eq!(
            request_line(&request),
            "GET /v1.0/externaldevice/usb/files?is_recursive=false HTTP/1.1"
        );
        assert!(request_body(&request).is_empty());
        assert!(!request.to_ascii_lowercase().contains("x-webapi-accesstoken"));
    }

    #[tokio::test]
    async fn test_delete_with_empty_response_is_null() {
        let (origin, request) = serve_once(respond("200 OK", "")).await;
        let api = local_client(&origin, Some("tok-1"));

        let value = api
            .delete(Target::Backend, "/app/license/remove", Some(&json!({ "force": "yes" })))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);

        let request = request.await.unwrap();
        assert_eq!(
            request_line(&request),
            "DELETE /server/app-1/app/license/remove?force=yes HTTP/1.1"
        );
        assert!(request_body(&request).is_empty());
    }

    #[tokio::test]
    async fn test_put_and_patch_send_json_body() {
        for method in [Method::PUT, Method::PATCH] {
            let (origin, request) = serve_once(respond("200 OK", r#"{"ok":true}"#)).await;
            let api = local_client(&origin, None);

            let payload = json!({ "font_size": 130 });
            let value = api
                .request(method.clone(), Target::Backend, "/settings", Some(&payload), None)
                .await
                .unwrap();
            assert_eq!(value, json!({ "ok": true }));

            let request = request.await.unwrap();
            assert_eq!(
                request_line(&request),
                format!("{} /server/app-1/settings HTTP/1.1", method)
            );
            let body: Value = serde_json::from_str(request_body(&request)).unwrap();
            assert_eq!(body, payload);
        }
    }

    #[tokio::test]
    async fn test_non_success_status_keeps_body() {
        let body = r#"{"error_code":3,"error_details":{"error_type":"Storage Full Error"}}"#;
        let (origin, _request) = serve_once(respond("400 Bad Request", body)).await;
        let api = local_client(&origin, None);

        let err = api
            .start_print_job(PrintSettings::new(130, Default::default()))
            .await
            .unwrap_err();
        match &err {
            ApiError::Server { status, body: text } => {
                assert_eq!(*status, StatusCode::BAD_REQUEST);
                assert_eq!(text, body);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(err.rejection().map(|r| r.error_code), Some(3));
    }

    #[tokio::test]
    async fn test_timeout_override() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut socket).await;
            // Hold the connection open without answering
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let api = local_client(&origin, None);
        let err = api
            .request(
                Method::GET,
                Target::Device,
                "/externaldevice/usb",
                None,
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_verify_response_defaults() {
        let resp: VerifyResponse = serde_json::from_str(r#"{"is_valid":false}"#).unwrap();
        assert!(!resp.is_valid);
        assert!(resp.err_msg.is_none());

        let status: LicenseStatus = serde_json::from_str("{}").unwrap();
        assert!(!status.is_valid);
    }
}
