//! HTTP dashboard and JSON API.
//!
//! One accept thread serves connections sequentially. Handlers share
//! `AppState`; all record writes go through its store mutex.

pub mod dashboard;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::{AppState, FarmerProfile, Language};
use crate::behavior::HINT_DISCLAIMER;
use crate::identity::AnimalId;
use dashboard::{Dashboard, View, AI_DISCLAIMER};

const MAX_HEADER_BYTES: usize = 8192;
/// Largest accepted request body (image uploads).
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    addr: String,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, state: Arc<AppState>) -> Self {
        Self {
            addr: addr.into(),
            state,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &state, shutdown_thread) {
                log::error!("api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: &AppState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, state) {
                    log::warn!("api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &AppState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return Response::error(403, "forbidden").write_to(&mut stream);
    }

    let response = match read_request(&mut stream) {
        Ok(request) => {
            log::debug!("{} {}", request.method, request.path);
            route(&request, state)
        }
        Err(RequestError::TooLarge) => Response::error(413, "request body too large"),
        Err(RequestError::Malformed(err)) => {
            log::warn!("malformed request from {}: {}", peer, err);
            Response::error(400, &err.to_string())
        }
    };
    response.write_to(&mut stream)
}

// -------------------- Routing --------------------

#[derive(Deserialize)]
struct RenameBody {
    display_name: String,
}

#[derive(Deserialize)]
struct PathBody {
    path: String,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    detector_backend: Option<&'a str>,
    detector_backends: Vec<String>,
    storage_backend: crate::records::StorageBackend,
    records_path: String,
    sample_every: u32,
    camera_enabled: bool,
    camera_active: bool,
    camera_device: &'a str,
    disclaimer: &'a str,
    hint_disclaimer: &'a str,
}

fn route(request: &HttpRequest, state: &AppState) -> Response {
    let method = request.method.as_str();
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let result = match (segments.as_slice(), method) {
        ([], "GET") => dashboard(request, state),
        (["health"], "GET") => Ok(Response::json(200, &json!({"status": "ok"}))),
        (["animals"], "GET") => list_animals(state),
        (["animals", id, "rename"], "POST") => rename_animal(request, state, id),
        (["animals", id], "DELETE") => delete_animal(state, id),
        (["detect", "image"], "POST") => detect_image(request, state),
        (["detect", "video"], "POST") => detect_video(request, state),
        (["behavior"], "POST") => behavior(request, state),
        (["vet"], "GET") => vet(state),
        (["profile"], "GET") => state
            .profile()
            .map(|profile| Response::json(200, &profile))
            .map_err(ApiError::internal),
        (["profile"], "PUT") => update_profile(request, state),
        (["status"], "GET") => status(state),
        (
            []
            | ["health" | "animals" | "behavior" | "vet" | "profile" | "status"]
            | ["animals", _]
            | ["animals", _, "rename"]
            | ["detect", "image" | "video"],
            _,
        ) => Err(ApiError::new(405, "method not allowed")),
        _ => Err(ApiError::new(404, "not found")),
    };
    result.unwrap_or_else(|err| {
        if err.status >= 500 {
            log::error!("{} {}: {}", request.method, request.path, err.message);
        }
        Response::error(err.status, &err.message)
    })
}

type Handled = std::result::Result<Response, ApiError>;

fn dashboard(request: &HttpRequest, state: &AppState) -> Handled {
    let records = state
        .with_store(|store| store.list())
        .map_err(ApiError::internal)?;
    let profile = state.profile().map_err(ApiError::internal)?;
    let vet_link = crate::vet::vet_map_link(&profile.location);
    let html = Dashboard {
        records: &records,
        profile: &profile,
        language: request
            .query("lang")
            .map(Language::from_code)
            .unwrap_or_default(),
        view: View::from_query(request.query("view")),
        vet_link: &vet_link,
    }
    .render();
    Ok(Response::new(200, "text/html; charset=utf-8", html.into_bytes()))
}

fn list_animals(state: &AppState) -> Handled {
    let records = state
        .with_store(|store| store.list())
        .map_err(ApiError::internal)?;
    Ok(Response::json(200, &records))
}

fn rename_animal(request: &HttpRequest, state: &AppState, raw_id: &str) -> Handled {
    let id = parse_id(raw_id)?;
    let body: RenameBody = request.json()?;
    if body.display_name.trim().is_empty() {
        return Err(ApiError::new(400, "display_name must not be empty"));
    }
    let found = state
        .with_store(|store| store.rename(&id, &body.display_name))
        .map_err(ApiError::internal)?;
    if !found {
        return Err(ApiError::new(404, &format!("animal {} not found", id)));
    }
    let record = state
        .with_store(|store| store.get(&id))
        .map_err(ApiError::internal)?;
    Ok(Response::json(200, &record))
}

fn delete_animal(state: &AppState, raw_id: &str) -> Handled {
    let id = parse_id(raw_id)?;
    let found = state
        .with_store(|store| store.delete(&id))
        .map_err(ApiError::internal)?;
    if !found {
        return Err(ApiError::new(404, &format!("animal {} not found", id)));
    }
    Ok(Response::json(200, &json!({"deleted": id})))
}

fn detect_image(request: &HttpRequest, state: &AppState) -> Handled {
    if request.body.is_empty() {
        return Err(ApiError::new(400, "request body must contain an image"));
    }
    let sightings = state
        .record_image(&request.body)
        .map_err(ApiError::bad_request)?;
    Ok(Response::json(200, &sightings))
}

fn detect_video(request: &HttpRequest, state: &AppState) -> Handled {
    let body: PathBody = request.json()?;
    let summary = state
        .record_video_file(&body.path)
        .map_err(ApiError::bad_request)?;
    Ok(Response::json(200, &summary))
}

fn behavior(request: &HttpRequest, state: &AppState) -> Handled {
    let body: PathBody = request.json()?;
    let report = state
        .analyze_video_file(&body.path)
        .map_err(ApiError::bad_request)?;
    Ok(Response::json(200, &report))
}

fn vet(state: &AppState) -> Handled {
    let animals = state
        .with_store(|store| store.needs_vet())
        .map_err(ApiError::internal)?;
    let vet_link = state.vet_link().map_err(ApiError::internal)?;
    Ok(Response::json(
        200,
        &json!({"animals": animals, "vet_link": vet_link}),
    ))
}

fn update_profile(request: &HttpRequest, state: &AppState) -> Handled {
    let profile: FarmerProfile = request.json()?;
    let saved = state.set_profile(profile).map_err(ApiError::internal)?;
    Ok(Response::json(200, &saved))
}

fn status(state: &AppState) -> Handled {
    let config = state.config();
    let body = StatusBody {
        detector_backend: state.detector().default_name(),
        detector_backends: state.detector().list(),
        storage_backend: config.storage_backend,
        records_path: config.records_path.display().to_string(),
        sample_every: state.recorder().sample_every(),
        camera_enabled: config.camera.enabled,
        camera_active: state.camera_active(),
        camera_device: &config.camera.device,
        disclaimer: AI_DISCLAIMER,
        hint_disclaimer: HINT_DISCLAIMER,
    };
    Ok(Response::json(200, &body))
}

fn parse_id(raw: &str) -> std::result::Result<AnimalId, ApiError> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| ApiError::new(400, "animal id is not valid UTF-8"))?;
    AnimalId::validate(&decoded).map_err(ApiError::bad_request)
}

// -------------------- Errors and responses --------------------

#[derive(Debug)]
struct ApiError {
    status: u16,
    message: String,
}

impl ApiError {
    fn new(status: u16, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }

    fn bad_request(err: anyhow::Error) -> Self {
        Self::new(400, &format!("{:#}", err))
    }

    fn internal(err: anyhow::Error) -> Self {
        Self::new(500, &format!("{:#}", err))
    }
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, "application/json", body),
            Err(err) => Self::error(500, &format!("serialize response: {}", err)),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = json!({ "error": message }).to_string().into_bytes();
        Self::new(status, "application/json", body)
    }

    fn write_to(&self, stream: &mut TcpStream) -> Result<()> {
        let status_line = match self.status {
            200 => "HTTP/1.1 200 OK",
            400 => "HTTP/1.1 400 Bad Request",
            403 => "HTTP/1.1 403 Forbidden",
            404 => "HTTP/1.1 404 Not Found",
            405 => "HTTP/1.1 405 Method Not Allowed",
            413 => "HTTP/1.1 413 Payload Too Large",
            _ => "HTTP/1.1 500 Internal Server Error",
        };
        let header = format!(
            "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
            status_line = status_line,
            content_type = self.content_type,
            len = self.body.len()
        );
        stream.write_all(header.as_bytes())?;
        stream.write_all(&self.body)?;
        stream.flush()?;
        Ok(())
    }
}

// -------------------- Request parsing --------------------

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    fn json<T: for<'de> Deserialize<'de>>(&self) -> std::result::Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::new(400, &format!("invalid JSON body: {}", e)))
    }
}

enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Malformed(err.into())
    }
}

fn read_request(stream: &mut TcpStream) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(anyhow!("connection closed mid-request")));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let malformed = |msg: &str| RequestError::Malformed(anyhow!("{}", msg));
    let request_line = lines.next().ok_or_else(|| malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| malformed("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| malformed("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| malformed("invalid Content-Length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data[header_end..].to_vec();
    body.truncate(content_length);
    if body.len() < content_length {
        let mut rest = vec![0u8; content_length - body.len()];
        stream.read_exact(&mut rest)?;
        body.extend_from_slice(&rest);
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
        query,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let k = urlencoding::decode(&k.replace('+', " ")).ok()?.into_owned();
            let v = urlencoding::decode(&v.replace('+', " ")).ok()?.into_owned();
            (!k.is_empty()).then_some((k, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_are_decoded() {
        let query = parse_query("view=table&lang=hi&name=Gir+Cow&x=%2Fy&flag");
        assert_eq!(query.get("view").map(String::as_str), Some("table"));
        assert_eq!(query.get("lang").map(String::as_str), Some("hi"));
        assert_eq!(query.get("name").map(String::as_str), Some("Gir Cow"));
        assert_eq!(query.get("x").map(String::as_str), Some("/y"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn ids_in_paths_are_percent_decoded_and_validated() {
        assert_eq!(
            parse_id("TEDDY%20BEAR_0123abcd").unwrap().as_str(),
            "TEDDY BEAR_0123abcd"
        );
        assert_eq!(parse_id("..%2Fetc").unwrap_err().status, 400);
    }
}
