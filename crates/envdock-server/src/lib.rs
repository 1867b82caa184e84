//! HTTP front end for envdock.
//!
//! Routes every request to an [`EnvService`] operation and renders the result
//! as JSON. Each route is served both bare (`/envs`) and under `/api`
//! (`/api/envs`). Errors are `{"detail": "..."}` with the status taken from
//! [`CoreError::status_code`].
//!
//! The [`TestServer`] helper starts a server backed by the in-memory mock on
//! a random port for integration testing.

pub mod multipart;

use envdock_core::{CoreError, EnvService, ServiceConfig, Upload};
use envdock_runtime::MockBackend;
use envdock_schema::{ManifestFormat, PackageFilter};
use multipart::{Form, MultipartError};
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info};

/// Upper bound on a request body; manifests are small text files.
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Envs,
    Import,
    Env(String),
    Clone(String),
    Export(String),
    Size(String),
    Packages(String),
    PackagesFile(String),
    Package(String, String),
}

impl Route {
    /// Match a request path (without query string). A leading `/api` is
    /// optional; segments are percent-decoded before matching.
    pub fn parse(path: &str) -> Option<Self> {
        let path = match path.strip_prefix("/api") {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        };
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        let route = match segments.as_slice() {
            ["health"] => Self::Health,
            ["envs"] => Self::Envs,
            ["envs", "import"] => Self::Import,
            ["envs", name] => Self::Env((*name).to_owned()),
            ["envs", name, "clone"] => Self::Clone((*name).to_owned()),
            ["envs", name, "export"] => Self::Export((*name).to_owned()),
            ["envs", name, "size"] => Self::Size((*name).to_owned()),
            ["envs", name, "packages"] => Self::Packages((*name).to_owned()),
            ["envs", name, "packages", "file"] => Self::PackagesFile((*name).to_owned()),
            ["envs", name, "packages", package] => {
                Self::Package((*name).to_owned(), (*package).to_owned())
            }
            _ => return None,
        };
        Some(route)
    }
}

/// An error response: status plus the `detail` text.
#[derive(Debug)]
struct ApiError {
    status: u16,
    detail: String,
}

impl ApiError {
    fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self::new(e.status_code(), e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(400, e.to_string())
    }
}

type ApiResult = Result<(u16, Value), ApiError>;

fn ok(body: Value) -> ApiResult {
    Ok((200, body))
}

fn message(text: String) -> ApiResult {
    ok(json!({ "message": text }))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::new(500, format!("serialization failed: {e}")))
}

#[derive(Deserialize)]
struct CreateBody {
    name: String,
    #[serde(default)]
    python_version: Option<String>,
}

#[derive(Deserialize)]
struct CloneBody {
    new_name: String,
}

#[derive(Deserialize)]
struct InstallBody {
    package: String,
}

fn header_value(req: &Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_owned())
}

fn read_body(req: &mut Request) -> Result<Vec<u8>, ApiError> {
    let mut body = Vec::new();
    req.as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| ApiError::new(400, format!("failed to read request body: {e}")))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(ApiError::new(413, "request body too large"));
    }
    Ok(body)
}

fn json_body<T: DeserializeOwned>(req: &mut Request) -> Result<T, ApiError> {
    let body = read_body(req)?;
    serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(400, format!("invalid request body: {e}")))
}

fn form_body(req: &mut Request) -> Result<Form, ApiError> {
    let content_type = header_value(req, "Content-Type").unwrap_or_default();
    let body = read_body(req)?;
    Ok(Form::parse(&content_type, &body)?)
}

fn upload_from(form: &Form) -> Result<Upload, ApiError> {
    let part = form.file("file")?;
    Ok(Upload::new(
        part.file_name.clone().unwrap_or_default(),
        part.data.clone(),
    ))
}

fn show_all(query: &str) -> bool {
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .any(|(k, v)| k == "all" && matches!(v, "true" | "1"))
}

fn import_env(service: &EnvService, req: &mut Request) -> ApiResult {
    let form = form_body(req)?;
    let upload = upload_from(&form)?;
    let name = form.text("name");
    let python = form.text("python_version");

    let outcome = service.import(&upload, name.as_deref(), python.as_deref())?;
    match (outcome.format, outcome.name) {
        (ManifestFormat::Flat, Some(name)) => {
            message(format!("Environment '{name}' created and requirements installed."))
        }
        (ManifestFormat::Structured, Some(name)) => {
            message(format!("Environment '{name}' imported successfully from YAML."))
        }
        _ => message("Environment imported successfully from YAML.".to_owned()),
    }
}

fn install_file(service: &EnvService, env: &str, req: &mut Request) -> ApiResult {
    let form = form_body(req)?;
    let upload = upload_from(&form)?;
    let report = service.install_from_file(env, &upload)?;
    ok(json!({
        "message": format!(
            "Installed {} packages from '{}' ({} conda, {} pip).",
            report.total(),
            upload.file_name,
            report.conda_count,
            report.pip_count
        ),
        "conda_count": report.conda_count,
        "pip_count": report.pip_count,
        "total": report.total(),
    }))
}

fn dispatch(
    service: &EnvService,
    req: &mut Request,
    method: &Method,
    route: Route,
    query: &str,
) -> ApiResult {
    match (method, route) {
        (Method::Get, Route::Health) => ok(json!({ "status": "ok" })),

        (Method::Get, Route::Envs) => ok(to_value(&service.list()?)?),
        (Method::Post, Route::Envs) => {
            let body: CreateBody = json_body(req)?;
            service.create(&body.name, body.python_version.as_deref())?;
            message(format!("Environment '{}' created successfully.", body.name))
        }

        (Method::Post, Route::Import) => import_env(service, req),
        // An environment may be called "import".
        (Method::Delete, Route::Import) => {
            service.delete("import")?;
            message("Environment 'import' deleted successfully.".to_owned())
        }
        (Method::Delete, Route::Env(name)) => {
            service.delete(&name)?;
            message(format!("Environment '{name}' deleted successfully."))
        }

        (Method::Post, Route::Clone(name)) => {
            let body: CloneBody = json_body(req)?;
            service.clone_env(&name, &body.new_name)?;
            message(format!(
                "Environment '{name}' cloned to '{}' successfully.",
                body.new_name
            ))
        }
        (Method::Get, Route::Export(name)) => ok(json!({ "yaml": service.export(&name)? })),
        (Method::Get, Route::Size(name)) => ok(json!({ "size": service.size(&name)? })),

        (Method::Get, Route::Packages(name)) => {
            let filter = if show_all(query) {
                PackageFilter::All
            } else {
                PackageFilter::User
            };
            ok(to_value(&service.list_packages(&name, filter)?)?)
        }
        (Method::Post, Route::Packages(name)) => {
            let body: InstallBody = json_body(req)?;
            service.install(&name, &body.package)?;
            message(format!("Package '{}' installed successfully.", body.package))
        }
        (Method::Post, Route::PackagesFile(name)) => install_file(service, &name, req),
        // A package may be called "file".
        (Method::Delete, Route::PackagesFile(name)) => uninstall(service, &name, "file"),
        (Method::Delete, Route::Package(name, package)) => uninstall(service, &name, &package),

        _ => Err(ApiError::new(405, "method not allowed")),
    }
}

fn uninstall(service: &EnvService, env: &str, package: &str) -> ApiResult {
    let removed = service.uninstall(env, package)?;
    ok(json!({
        "message": format!(
            "Package '{package}' uninstalled successfully ({}).",
            removed.installer
        ),
        "installer": removed.installer,
    }))
}

fn with_cors<R: Read>(response: Response<R>, origin: Option<&str>) -> Response<R> {
    match origin.and_then(|o| Header::from_bytes("Access-Control-Allow-Origin", o).ok()) {
        Some(header) => response.with_header(header),
        None => response,
    }
}

fn respond_json(req: Request, status: u16, body: &Value, origin: Option<&str>) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let response = Response::from_string(body.to_string())
        .with_status_code(StatusCode(status))
        .with_header(header);
    let _ = req.respond(with_cors(response, origin));
}

fn respond_preflight(req: Request, origin: Option<&str>) {
    let methods = Header::from_bytes("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .expect("valid header");
    let headers =
        Header::from_bytes("Access-Control-Allow-Headers", "Content-Type").expect("valid header");
    let response = Response::empty(204).with_header(methods).with_header(headers);
    let _ = req.respond(with_cors(response, origin));
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(service: &EnvService, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let origin = service.config().cors_origin.clone();
    debug!("{method} {url}");

    if method == Method::Options {
        respond_preflight(req, origin.as_deref());
        return;
    }

    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    let result = match Route::parse(path) {
        Some(route) => dispatch(service, &mut req, &method, route, query),
        None => Err(ApiError::new(404, "not found")),
    };

    match result {
        Ok((status, body)) => respond_json(req, status, &body, origin.as_deref()),
        Err(e) => {
            if e.status >= 500 {
                error!("{method} {url}: {}", e.detail);
            } else {
                debug!("{method} {url}: {} {}", e.status, e.detail);
            }
            respond_json(req, e.status, &json!({ "detail": e.detail }), origin.as_deref());
        }
    }
}

/// Bind the listening socket.
pub fn bind(addr: &str) -> Result<Server, ServerError> {
    Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })
}

/// Serve requests one at a time until the server is unblocked.
pub fn run_server(service: &EnvService, server: &Server) {
    for request in server.incoming_requests() {
        handle_request(service, request);
    }
    info!("server loop stopped");
}

/// A test helper that starts an envdock server on a random port in a
/// background thread, backed by the in-memory mock.
///
/// Drop the `TestServer` to stop the server (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub backend: Arc<MockBackend>,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    /// Start on `127.0.0.1:0` with a mock whose base environment lives at `root`.
    pub fn start(root: &Path) -> Self {
        Self::start_with(root, ServiceConfig::default())
    }

    pub fn start_with(root: &Path, config: ServiceConfig) -> Self {
        let backend = Arc::new(MockBackend::with_root(root));
        let service = Arc::new(EnvService::new(Box::new(Arc::clone(&backend)), config));

        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || run_server(&service, &srv));

        Self {
            url,
            port,
            backend,
            server,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_routes_with_and_without_prefix() {
        assert_eq!(Route::parse("/envs"), Some(Route::Envs));
        assert_eq!(Route::parse("/api/envs/"), Some(Route::Envs));
        assert_eq!(Route::parse("/api/health"), Some(Route::Health));
        assert_eq!(Route::parse("/envs/import"), Some(Route::Import));
        assert_eq!(
            Route::parse("/api/envs/dev/clone"),
            Some(Route::Clone("dev".to_owned()))
        );
        assert_eq!(
            Route::parse("/envs/dev/packages/file"),
            Some(Route::PackagesFile("dev".to_owned()))
        );
        assert_eq!(
            Route::parse("/envs/dev/packages/numpy"),
            Some(Route::Package("dev".to_owned(), "numpy".to_owned()))
        );
    }

    #[test]
    fn parse_route_decodes_segments() {
        assert_eq!(
            Route::parse("/api/envs/my%20env/size"),
            Some(Route::Size("my env".to_owned()))
        );
        assert_eq!(
            Route::parse("/envs/dev/packages/ruamel.yaml%2Eclib"),
            Some(Route::Package("dev".to_owned(), "ruamel.yaml.clib".to_owned()))
        );
    }

    #[test]
    fn parse_route_unknown() {
        assert_eq!(Route::parse("/"), None);
        assert_eq!(Route::parse("/apienvs"), None);
        assert_eq!(Route::parse("/envs/dev/unknown"), None);
        assert_eq!(Route::parse("/envs/dev/packages/a/b"), None);
    }

    #[test]
    fn show_all_query() {
        assert!(show_all("all=true"));
        assert!(show_all("x=1&all=1"));
        assert!(!show_all(""));
        assert!(!show_all("all=false"));
    }

    #[test]
    fn core_errors_keep_status() {
        let e: ApiError = CoreError::NameCollision("dev".to_owned()).into();
        assert_eq!(e.status, 400);
        assert!(e.detail.contains("already exists"));

        let e: ApiError = CoreError::NotFound("dev".to_owned()).into();
        assert_eq!(e.status, 404);
    }
}
