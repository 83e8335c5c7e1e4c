use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;

use herd_monitor::api::{ApiHandle, ApiServer};
use herd_monitor::detect::{BackendRegistry, BoundingBox, Detection, StubBackend};
use herd_monitor::records::{AttendancePolicy, InMemoryRecordStore};
use herd_monitor::{AppState, HerdConfig};

const SHEEP: usize = 18;
const COW: usize = 19;

fn start() -> ApiHandle {
    let mut detector = BackendRegistry::new();
    detector.register(StubBackend::repeating(vec![
        Detection::from_class(COW, 0.9, BoundingBox::new(0.0, 0.0, 16.0, 16.0)).unwrap(),
        Detection::from_class(SHEEP, 0.3, BoundingBox::new(16.0, 0.0, 32.0, 16.0)).unwrap(),
    ]));
    let state = AppState::new(
        HerdConfig::default(),
        Box::new(InMemoryRecordStore::new(AttendancePolicy::FirstSightingOnly)),
        detector,
    );
    ApiServer::new("127.0.0.1:0", Arc::new(state))
        .spawn()
        .expect("spawn api")
}

fn request(addr: SocketAddr, method: &str, path: &str, body: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    let head = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");
    read_response(&mut stream)
}

fn read_response(stream: &mut TcpStream) -> (u16, String) {
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    let text = String::from_utf8(raw).expect("utf-8 response");
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

fn json(body: &str) -> Value {
    serde_json::from_str(body).expect("json body")
}

fn png_upload() -> Vec<u8> {
    let image = RgbImage::from_fn(48, 32, |x, y| Rgb([(x * 5) as u8, (y * 7) as u8, 90]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[test]
fn image_upload_flows_into_records_and_dashboard() {
    let api = start();
    let addr = api.addr;

    let (status, body) = request(addr, "GET", "/health", b"");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "ok");

    let (status, body) = request(addr, "GET", "/", b"");
    assert_eq!(status, 200);
    assert!(body.contains("No animals recorded yet."));

    let (status, body) = request(addr, "POST", "/detect/image", &png_upload());
    assert_eq!(status, 200, "{body}");
    let sightings = json(&body);
    assert_eq!(sightings["detections"], 2);
    assert_eq!(sightings["sightings"][0]["status"], "recorded");
    assert_eq!(sightings["sightings"][0]["outcome"], "inserted");

    let (status, body) = request(addr, "GET", "/animals", b"");
    assert_eq!(status, 200);
    let animals = json(&body);
    let animals = animals.as_array().expect("array");
    assert_eq!(animals.len(), 2);
    assert_eq!(animals[0]["animal_type"], "Cow");
    assert_eq!(animals[0]["attendance"], 1);
    assert_eq!(animals[0]["health_status"], "Healthy");
    assert_eq!(animals[1]["health_status"], "Needs Vet Support");
    let cow_id = animals[0]["animal_id"].as_str().expect("id").to_string();
    assert!(cow_id.starts_with("COW_"));

    // Same upload again refreshes instead of inserting.
    let (_, body) = request(addr, "POST", "/detect/image", &png_upload());
    assert_eq!(json(&body)["sightings"][0]["outcome"], "updated");

    let (status, body) = request(addr, "GET", "/vet", b"");
    assert_eq!(status, 200);
    let vet = json(&body);
    assert_eq!(vet["animals"].as_array().map(Vec::len), Some(1));
    assert!(vet["vet_link"]
        .as_str()
        .unwrap()
        .starts_with("https://www.google.com/maps/search/"));

    let rename_path = format!("/animals/{cow_id}/rename");
    let (status, _) = request(addr, "POST", &rename_path, br#"{"display_name": "  "}"#);
    assert_eq!(status, 400);
    let (status, body) = request(addr, "POST", &rename_path, br#"{"display_name": "Gauri"}"#);
    assert_eq!(status, 200);
    assert_eq!(json(&body)["display_name"], "Gauri");

    let (status, body) = request(addr, "GET", "/?view=table&lang=hi", b"");
    assert_eq!(status, 200);
    assert!(body.contains("<table>"));
    assert!(body.contains("Gauri"));
    assert!(body.contains("lang=\"hi\""));

    let delete_path = format!("/animals/{cow_id}");
    assert_eq!(request(addr, "DELETE", &delete_path, b"").0, 200);
    assert_eq!(request(addr, "DELETE", &delete_path, b"").0, 404);
    let (_, body) = request(addr, "GET", "/animals", b"");
    assert_eq!(json(&body).as_array().map(Vec::len), Some(1));

    api.stop().expect("stop api");
}

#[test]
fn errors_map_to_status_codes() {
    let api = start();
    let addr = api.addr;

    assert_eq!(request(addr, "GET", "/nowhere", b"").0, 404);
    assert_eq!(request(addr, "PUT", "/animals", b"").0, 405);
    assert_eq!(request(addr, "GET", "/detect/image", b"").0, 405);
    assert_eq!(request(addr, "POST", "/detect/image", b"").0, 400);

    let (status, body) = request(addr, "POST", "/detect/image", b"definitely not a jpeg");
    assert_eq!(status, 400);
    assert!(json(&body)["error"].as_str().is_some());

    assert_eq!(request(addr, "DELETE", "/animals/not-an-id", b"").0, 400);
    assert_eq!(request(addr, "POST", "/behavior", b"{not json").0, 400);
    assert_eq!(
        request(addr, "POST", "/detect/video", br#"{"path": "/missing/pen.mp4"}"#).0,
        400
    );
    assert_eq!(
        request(addr, "POST", "/detect/video", br#"{"path": "rtsp://camera/1"}"#).0,
        400
    );

    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .write_all(b"POST /detect/image HTTP/1.1\r\nContent-Length: 999999999\r\n\r\n")
        .expect("write");
    assert_eq!(read_response(&mut stream).0, 413);

    api.stop().expect("stop api");
}

#[test]
fn profile_status_and_video_endpoints() {
    let api = start();
    let addr = api.addr;

    let (status, body) = request(addr, "GET", "/profile", b"");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["location"], "Not Set");

    let (status, body) = request(
        addr,
        "PUT",
        "/profile",
        br#"{"name": "Asha", "farm": "Green Acres", "location": "Nashik"}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(json(&body)["location"], "Nashik");
    let (_, body) = request(addr, "GET", "/vet", b"");
    assert!(json(&body)["vet_link"].as_str().unwrap().ends_with("Nashik"));

    let (status, body) = request(addr, "GET", "/status", b"");
    assert_eq!(status, 200);
    let panel = json(&body);
    assert_eq!(panel["detector_backend"], "stub");
    assert_eq!(panel["camera_active"], false);
    assert_eq!(panel["sample_every"], 10);
    assert!(panel["disclaimer"].as_str().unwrap().contains("not a veterinary diagnosis"));

    let (status, body) = request(addr, "POST", "/detect/video", br#"{"path": "stub://pen"}"#);
    assert_eq!(status, 200, "{body}");
    let summary = json(&body);
    assert_eq!(summary["frames_read"], 120);
    assert_eq!(summary["frames_processed"], 12);

    let (status, body) = request(addr, "POST", "/behavior", br#"{"path": "stub://pen"}"#);
    assert_eq!(status, 200, "{body}");
    let report = json(&body);
    assert_eq!(report["category"], "normal");
    assert_eq!(report["frames_sampled"], 12);
    assert!(report["stopped_early"].is_null());
    assert_eq!(report["vet_referral"], false);
    assert!(report["disclaimer"].as_str().is_some());

    api.stop().expect("stop api");
}
