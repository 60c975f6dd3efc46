//! Rutas HTTP sobre el motor con dobles, ficheros de ajustes reales y sled temporal.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use camwatch::application::ports::{DetectionSink, DetectionStore};
use common::{build_test_app, record, save_photo};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn json_of(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Estado y frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reports_error_and_reconnect_flag() {
    let t = build_test_app();
    let (status, body) = send(&t.app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let v = json_of(&body);
    assert_eq!(v["error"], Value::Null);
    assert_eq!(v["reconnect_requested"], false);

    let (status, _) = send(&t.app, Method::POST, "/api/reconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&t.app, Method::GET, "/api/status", None).await;
    assert_eq!(json_of(&body)["reconnect_requested"], true);
}

#[tokio::test]
async fn frame_is_404_until_first_cycle() {
    let t = build_test_app();
    let (status, _) = send(&t.app, Method::GET, "/api/frame", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let engine = t.h.engine.clone();
    tokio::task::spawn_blocking(move || engine.drive_cycle()).await.unwrap();

    for uri in ["/api/frame", "/api/frame?kind=raw", "/api/frame?kind=boxed"] {
        let (status, body) = send(&t.app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(body.starts_with(&[0xFF, 0xD8]));
    }
}

#[tokio::test]
async fn pipeline_subscribers_receive_each_published_frame() {
    let t = build_test_app();
    let mut rx = t.pipeline.subscribe();

    let engine = t.h.engine.clone();
    tokio::task::spawn_blocking(move || engine.drive_cycle()).await.unwrap();

    let (meta, jpeg) = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("sin frame publicado")
        .unwrap();
    assert_eq!((meta.width, meta.height), (common::FRAME_W, common::FRAME_H));
    assert!(jpeg.starts_with(&[0xFF, 0xD8]));
}

// ---------------------------------------------------------------------------
// Ajustes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn settings_can_be_read_per_receiver() {
    let t = build_test_app();
    let (status, body) = send(&t.app, Method::GET, "/settings/model", None).await;
    assert_eq!(status, StatusCode::OK);
    let v = json_of(&body);
    assert_eq!(v["receiver"], "model");
    let threshold = v["settings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["key"] == "threshold")
        .unwrap();
    assert_eq!(threshold["value"], "0.5");

    let (status, _) = send(&t.app, Method::GET, "/settings/telegram", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn settings_update_writes_known_keys_and_rejects_unknown() {
    let t = build_test_app();
    let ok = json!({ "receiver": "model", "settings": [{ "key": "threshold", "value": "0.65" }] });
    let (status, _) = send(&t.app, Method::POST, "/settings", Some(ok)).await;
    assert_eq!(status, StatusCode::OK);

    let on_disk: Value = serde_json::from_slice(&std::fs::read(&t.model_settings).unwrap()).unwrap();
    assert_eq!(on_disk["threshold"], "0.65");

    let bad = json!({ "receiver": "model", "settings": [{ "key": "colour", "value": "red" }] });
    let (status, body) = send(&t.app, Method::POST, "/settings", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_of(&body)["error"].as_str().unwrap().contains("colour"));
}

// ---------------------------------------------------------------------------
// Objetos guardados
// ---------------------------------------------------------------------------

#[tokio::test]
async fn object_lookup_returns_photo_record_and_container() {
    let t = build_test_app();
    let (status, _) = send(&t.app, Method::GET, "/object/cup", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let shelf = t.store.register_container("shelf", Some("B2".into()), None).unwrap();
    let mut r = record("cup", Some(save_photo(&t)));
    r.container_reference = Some(shelf.id);
    t.store.enqueue(r).unwrap();
    t.store.flush().unwrap();

    let (status, body) = send(&t.app, Method::GET, "/object/cup", None).await;
    assert_eq!(status, StatusCode::OK);
    let v = json_of(&body);
    assert_eq!(v["photo"]["width"], 40);
    assert_eq!(v["photo"]["height"], 30);
    assert!(!v["photo"]["image"].as_str().unwrap().is_empty());
    assert_eq!(v["record"]["label"], "cup");
    assert_eq!(v["container"]["name"], "shelf");
}

#[tokio::test]
async fn objects_uses_latest_timestamp_photo() {
    let t = build_test_app();
    let (status, _) = send(&t.app, Method::GET, "/objects", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let photo = save_photo(&t);
    let mut a = record("cup", Some(photo.clone()));
    let mut b = record("person", Some(photo));
    b.detection_time = a.detection_time;
    a.bounding_box = [0.0, 0.0, 10.0, 10.0];
    t.store.enqueue(a).unwrap();
    t.store.enqueue(b).unwrap();
    t.store.flush().unwrap();

    let (status, body) = send(&t.app, Method::GET, "/objects", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["width"], 40);
}
