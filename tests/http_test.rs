use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt;

use dropspot::config::Config;
use dropspot::db;
use dropspot::drops::{DropRepository, DropWrite};
use dropspot::error::TransportError;
use dropspot::moderation::{canonical_path_key, DrainOutcome, ModerationStore, SqliteModerationStore};
use dropspot::notify::{DeliveryResult, PushPayload, PushTransport};
use dropspot::routes;
use dropspot::state::AppState;

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<(Vec<String>, PushPayload)>>,
}

#[async_trait]
impl PushTransport for RecordingPush {
    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<Vec<DeliveryResult>, TransportError> {
        self.sent
            .lock()
            .await
            .push((tokens.to_vec(), payload.clone()));
        Ok(vec![DeliveryResult::Delivered; tokens.len()])
    }
}

struct TestApp {
    state: AppState,
    push: Arc<RecordingPush>,
    _tmp: TempDir,
}

impl TestApp {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let pool = db::create_pool(&tmp.path().join("test.db")).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let push = Arc::new(RecordingPush::default());
        let state = AppState::new(pool, Config::default(), push.clone());
        Self {
            state,
            push,
            _tmp: tmp,
        }
    }

    fn router(&self) -> Router {
        routes::router().with_state(self.state.clone())
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

fn photo_drop(id: &str, path: &str) -> Value {
    json!({
        "id": id,
        "lat": 37.0,
        "lng": -122.0,
        "createdBy": "creator",
        "contentType": "PHOTO",
        "mediaStoragePath": path,
    })
}

fn finalize(path: &str, verdict: Option<Value>) -> Value {
    let mut body = json!({
        "objectPath": path,
        "contentType": "image/jpeg",
        "bucket": "drops-bucket",
    });
    if let Some(verdict) = verdict {
        body["verdict"] = verdict;
    }
    body
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_verdict_before_drop_is_queued_then_drained() {
    let app = TestApp::new();
    let path = "drops/creator/photo.jpg";

    let (status, body) = app
        .post("/events/storage-finalized", finalize(path, Some(json!({"adult": "VERY_LIKELY"}))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "queued");

    // Drop write arrives second and drains the queue
    let drop = photo_drop("d1", path);
    app.state.drops.put(&serde_json::from_value(drop.clone()).unwrap())
        .await
        .unwrap();
    let write = json!({ "before": null, "after": drop });
    let (status, body) = app.post("/events/drop-written", write).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["moderation"], "merged");

    let stored = app.state.drops.get("d1").await.unwrap().unwrap();
    assert!(stored.moderation.unwrap().is_flagged());

    let store = SqliteModerationStore::new(app.state.db.clone());
    assert_eq!(store.pending(&canonical_path_key(path)).await.unwrap(), None);
}

#[tokio::test]
async fn test_drop_before_verdict_merges_directly() {
    let app = TestApp::new();
    let path = "drops/creator/photo.jpg";

    let drop = photo_drop("d1", path);
    let write: DropWrite =
        serde_json::from_value(json!({ "before": null, "after": drop.clone() })).unwrap();
    app.state.drops.put(&serde_json::from_value(drop).unwrap()).await.unwrap();
    let report = app.state.handle_drop_write(&write).await;
    assert_eq!(report.moderation, Some(DrainOutcome::NoEntry));

    let (status, body) = app
        .post("/events/storage-finalized", finalize(path, Some(json!({"racy": "LIKELY"}))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "merged");
    assert_eq!(body["mergedDrops"], 1);

    let stored = app.state.drops.get("d1").await.unwrap().unwrap();
    let verdict = stored.moderation.unwrap();
    assert!(verdict.is_flagged());
}

#[tokio::test]
async fn test_non_image_and_foreign_prefix_are_ignored() {
    let app = TestApp::new();

    let mut body = finalize("drops/creator/clip.mp4", None);
    body["contentType"] = json!("video/mp4");
    let (_, response) = app.post("/events/storage-finalized", body).await;
    assert_eq!(response["outcome"], "ignored");

    let (_, response) = app
        .post("/events/storage-finalized", finalize("avatars/u1.jpg", None))
        .await;
    assert_eq!(response["outcome"], "ignored");
}

#[tokio::test]
async fn test_missing_verdict_parks_sentinel() {
    let app = TestApp::new();
    let path = "drops/creator/blank.png";

    let (_, body) = app.post("/events/storage-finalized", finalize(path, None)).await;
    assert_eq!(body["outcome"], "queued");

    let store = SqliteModerationStore::new(app.state.db.clone());
    assert_eq!(
        store.pending(&canonical_path_key(path)).await.unwrap(),
        Some(None)
    );
}

#[tokio::test]
async fn test_put_drop_validates_coordinates() {
    let app = TestApp::new();
    let mut drop = photo_drop("d1", "drops/x.jpg");
    drop["lat"] = json!(91.0);

    let (status, body) = app.post("/drops", drop).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_put_drop_normalizes_group_code() {
    let app = TestApp::new();
    let mut drop = photo_drop("d1", "drops/x.jpg");
    drop["groupCode"] = json!("  team-a ");

    let (status, body) = app.post("/drops", drop).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["groupCode"], "TEAM-A");
}

#[tokio::test]
async fn test_collect_notifies_creator() {
    let app = TestApp::new();
    app.state.drops.put(&serde_json::from_value(photo_drop("d1", "drops/x.jpg")).unwrap())
        .await
        .unwrap();

    let (status, _) = app
        .post("/users/creator/tokens", json!({ "token": "creator-phone" }))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .post("/drops/d1/collect", json!({ "userId": "finder" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collectedBy"]["finder"], true);

    // The route hands the write to a background task
    tokio::time::timeout(Duration::from_secs(2), async {
        while app.push.sent.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("collector fanout never sent");

    // A repeat collect is not a new collector
    let (status, _) = app
        .post("/drops/d1/collect", json!({ "userId": "finder" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = app.push.sent.lock().await;
    assert_eq!(sent.len(), 1);
    let (tokens, payload) = &sent[0];
    assert_eq!(tokens, &vec!["creator-phone".to_string()]);
    assert_eq!(payload.body, "Someone picked up your drop");
}

#[tokio::test]
async fn test_edit_after_merge_keeps_verdict() {
    let app = TestApp::new();
    let path = "drops/creator/photo.jpg";

    let (status, _) = app.post("/drops", photo_drop("d1", path)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .post("/events/storage-finalized", finalize(path, Some(json!({"adult": "VERY_LIKELY"}))))
        .await;
    assert_eq!(body["outcome"], "merged");

    // The client edits its stale copy and tries to clear the verdict on the way
    let mut edited = photo_drop("d1", path);
    edited["text"] = json!("new caption");
    edited["moderation"] = json!({ "adult": "VERY_UNLIKELY" });
    edited["collectedBy"] = json!({ "someone": true });
    let (status, body) = app.post("/drops", edited).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "new caption");
    assert_eq!(body["moderation"]["adult"], "VERY_LIKELY");
    assert!(body["collectedBy"].get("someone").is_none());

    let stored = app.state.drops.get("d1").await.unwrap().unwrap();
    assert!(stored.moderation.unwrap().is_flagged());
    assert!(stored.collected_by.is_empty());
}

#[tokio::test]
async fn test_new_drop_cannot_carry_server_state() {
    let app = TestApp::new();

    let mut drop = photo_drop("d1", "drops/creator/photo.jpg");
    drop["moderation"] = json!({ "adult": "VERY_UNLIKELY" });
    drop["collectedBy"] = json!({ "u1": true });
    drop["likedBy"] = json!({ "u1": true, "u2": true });
    drop["likeCount"] = json!(2);

    let (status, body) = app.post("/drops", drop).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["moderation"].is_null());
    assert_eq!(body["likeCount"], 0);

    let stored = app.state.drops.get("d1").await.unwrap().unwrap();
    assert!(stored.moderation.is_none());
    assert!(stored.collected_by.is_empty());
    assert!(stored.liked_by.is_empty());
}

#[tokio::test]
async fn test_put_drop_assigns_missing_id() {
    let app = TestApp::new();
    let mut drop = photo_drop("", "drops/x.jpg");
    drop.as_object_mut().unwrap().remove("id");

    let (status, body) = app.post("/drops", drop).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap();
    assert!(!id.is_empty());
    assert!(app.state.drops.get(id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_collect_unknown_drop_is_404() {
    let app = TestApp::new();
    let (status, body) = app
        .post("/drops/missing/collect", json!({ "userId": "finder" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_like_toggle_keeps_count_consistent() {
    let app = TestApp::new();
    app.state.drops.put(&serde_json::from_value(photo_drop("d1", "drops/x.jpg")).unwrap())
        .await
        .unwrap();

    let (_, body) = app
        .post("/drops/d1/like", json!({ "userId": "u1", "liked": true }))
        .await;
    assert_eq!(body["likeCount"], 1);

    // Liking twice is not a second like
    let (_, body) = app
        .post("/drops/d1/like", json!({ "userId": "u1", "liked": true }))
        .await;
    assert_eq!(body["likeCount"], 1);

    let (_, body) = app
        .post("/drops/d1/like", json!({ "userId": "u1", "liked": false }))
        .await;
    assert_eq!(body["likeCount"], 0);
}

#[tokio::test]
async fn test_username_claim_over_http() {
    let app = TestApp::new();

    let (status, body) = app
        .post("/usernames/claim", json!({ "userId": "u1", "username": "Alice" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    let (status, body) = app
        .post("/usernames/claim", json!({ "userId": "u2", "username": "alice" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ALREADY_EXISTS");

    let (status, body) = app
        .post("/usernames/claim", json!({ "userId": "u2", "username": "a!" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "TOO_SHORT");

    let (status, body) = app
        .post(
            "/usernames/claim",
            json!({ "userId": "u2", "username": "alice", "allowTransferFrom": "u1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
}
