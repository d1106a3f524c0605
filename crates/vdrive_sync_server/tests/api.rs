use axum::{
    Extension, Router,
    body::Body,
    http::{Request, StatusCode},
};
use rusqlite::Connection;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;
use vdrive_sync_server::{
    auth::{AuthExtractor, SessionAuthority, SqliteSessionAuthority},
    channel::ChannelRegistry,
    db::{Repo, init_database},
    handlers::{ApiState, api_routes},
};

struct TestApp {
    app: Router,
    repo: Repo,
    token: String,
}

fn setup_with_limit(max_batch_operations: usize) -> TestApp {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    init_database(&conn).expect("init db");
    let repo = Repo::new(conn).expect("repo");

    let player_id = repo.create_player("Player One").expect("create player");
    let token = repo
        .create_session(&player_id, chrono::Utc::now() + chrono::Duration::days(1))
        .expect("create token");

    let authority: Arc<dyn SessionAuthority> = Arc::new(SqliteSessionAuthority::new(repo.clone()));
    let api_state = ApiState {
        repo: repo.clone(),
        registry: Arc::new(ChannelRegistry::new()),
        max_batch_operations,
    };

    let app = Router::new()
        .nest("/api", api_routes(api_state))
        .layer(Extension(AuthExtractor::new(authority)));

    TestApp { app, repo, token }
}

fn setup() -> TestApp {
    setup_with_limit(500)
}

impl TestApp {
    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request_as(Some(&self.token), method, uri, body).await
    }

    async fn request_as(
        &self,
        token: Option<&str>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn requests_without_a_session_are_rejected() {
    let t = setup();

    let (status, body) = t.request_as(None, "GET", "/api/files", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authentication");

    let (status, _) = t
        .request_as(Some("not-a-session"), "GET", "/api/files", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_is_public() {
    let t = setup();
    let (status, body) = t.request_as(None, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["open_connections"], 0);
}

#[tokio::test]
async fn file_crud_round_trip() {
    let t = setup();

    let (status, entry) = t
        .request(
            "PUT",
            "/api/file",
            Some(json!({"path": "c:/docs/note.txt", "content": "hello"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["path"], "C:\\docs\\note.txt");
    assert_eq!(entry["type"], "file");
    assert_eq!(entry["size"], 5);
    assert_eq!(entry["updated_by"], "http");

    let (status, fetched) = t
        .request("GET", "/api/file?path=C:/docs/note.txt", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["content"], "hello");
    assert_eq!(fetched["content_hash"], entry["content_hash"]);

    let (status, listed) = t.request("GET", "/api/files", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["entries"].as_array().map(Vec::len), Some(1));

    let (status, deleted) = t
        .request("DELETE", "/api/file?path=C:/docs/note.txt", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);

    let (status, body) = t
        .request("GET", "/api/file?path=C:/docs/note.txt", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn invalid_paths_are_validation_errors() {
    let t = setup();

    let (status, body) = t
        .request("PUT", "/api/file", Some(json!({"path": "docs/note.txt"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, _) = t.request("GET", "/api/file", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .request("PUT", "/api/file", Some(json!({"content": "no path"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn directories_refuse_removal_while_populated() {
    let t = setup();

    let (status, made) = t
        .request("POST", "/api/dirs", Some(json!({"path": "C:/GAMES"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(made["created"], true);

    let (_, again) = t
        .request("POST", "/api/dirs", Some(json!({"path": "C:/GAMES"})))
        .await;
    assert_eq!(again["created"], false);

    t.request(
        "PUT",
        "/api/file",
        Some(json!({"path": "C:/GAMES/SAVE.DAT", "content": "lvl 3"})),
    )
    .await;

    let (status, body) = t.request("DELETE", "/api/dirs?path=C:/GAMES", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "state");

    t.request("DELETE", "/api/file?path=C:/GAMES/SAVE.DAT", None)
        .await;
    let (status, _) = t.request("DELETE", "/api/dirs?path=C:/GAMES", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn overwrites_are_listed_and_restorable() {
    let t = setup();
    for content in ["one", "two", "three"] {
        let (status, _) = t
            .request(
                "PUT",
                "/api/file",
                Some(json!({"path": "C:/NOTE.TXT", "content": content})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, list) = t.request("GET", "/api/versions?path=C:/NOTE.TXT", None).await;
    assert_eq!(status, StatusCode::OK);
    let versions = list["versions"].as_array().expect("versions");
    assert_eq!(versions.len(), 2);
    assert!(list["current"]["content_hash"].is_string());

    let oldest = versions
        .iter()
        .find(|v| v["content"] == "one")
        .expect("first write is retained");
    let (status, restored) = t
        .request(
            "POST",
            "/api/versions/restore",
            Some(json!({"path": "C:/NOTE.TXT", "version": oldest["version_number"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["content"], "one");

    let (status, body) = t
        .request(
            "POST",
            "/api/versions/restore",
            Some(json!({"path": "C:/NOTE.TXT", "version": 5})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn batch_reports_per_item_results() {
    let t = setup();
    let (status, result) = t
        .request(
            "POST",
            "/api/batch",
            Some(json!({"operations": [
                {"op": "mkdir", "path": "C:/DOCS"},
                {"op": "create", "path": "C:/DOCS/A.TXT", "content": "a"},
                {"op": "delete", "path": "C:/DOCS/MISSING.TXT"},
                {"op": "explode", "path": "C:/DOCS"},
                {"op": "update", "path": "C:/DOCS/A.TXT", "content": "b"}
            ]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["succeeded"], 3);
    assert_eq!(result["failed"], 2);
    assert_eq!(result["results"][2]["error"]["code"], "not_found");
    assert_eq!(result["results"][3]["success"], false);

    let entry = t
        .repo
        .list_entries(&player_of(&t))
        .expect("list")
        .into_iter()
        .find(|e| e.path == "C:\\DOCS\\A.TXT")
        .expect("batch create persisted");
    assert_eq!(entry.content.as_deref(), Some("b"));
}

#[tokio::test]
async fn oversized_batches_are_rejected() {
    let t = setup_with_limit(2);
    let ops: Vec<Value> = (0..3)
        .map(|i| json!({"op": "mkdir", "path": format!("C:/D{}", i)}))
        .collect();
    let (status, body) = t
        .request("POST", "/api/batch", Some(json!({"operations": ops})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (_, listed) = t.request("GET", "/api/files", None).await;
    assert_eq!(listed["entries"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn sync_cursor_returns_only_newer_entries() {
    let t = setup();
    t.request(
        "PUT",
        "/api/file",
        Some(json!({"path": "C:/A.TXT", "content": "a"})),
    )
    .await;

    let (status, full) = t.request("GET", "/api/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(full["full"], true);
    assert_eq!(full["entries"].as_array().map(Vec::len), Some(1));
    let cursor = full["server_time"].as_i64().expect("cursor");

    t.request(
        "PUT",
        "/api/file",
        Some(json!({"path": "C:/B.TXT", "content": "b"})),
    )
    .await;

    let (_, delta) = t
        .request("GET", &format!("/api/sync?since={}", cursor), None)
        .await;
    assert_eq!(delta["full"], false);
    let entries = delta["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["path"], "C:\\B.TXT");
}

#[tokio::test]
async fn replace_and_patch_the_whole_tree() {
    let t = setup();
    let (status, body) = t
        .request(
            "PUT",
            "/api/files",
            Some(json!({"entries": [
                {"path": "C:\\"},
                {"path": "C:/DOCS", "type": "dir"},
                {"path": "C:/DOCS/A.TXT", "content": "a"}
            ]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replaced"], 2);

    let (status, body) = t
        .request(
            "PATCH",
            "/api/files",
            Some(json!({
                "C:/DOCS/A.TXT": null,
                "C:/DOCS/B.TXT": {"content": "b"},
                "C:/NOPE.TXT": null
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);
    assert_eq!(body["deleted"], 1);

    let (_, listed) = t.request("GET", "/api/files", None).await;
    let paths: Vec<&str> = listed["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .filter_map(|e| e["path"].as_str())
        .collect();
    assert_eq!(paths, vec!["C:\\DOCS", "C:\\DOCS\\B.TXT"]);
}

#[tokio::test]
async fn scenes_fall_back_to_default_and_merge_deltas() {
    let t = setup();

    let (status, missing) = t.request("GET", "/api/scenes/master", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(missing["document"], Value::Null);

    let (status, _) = t
        .request(
            "PUT",
            "/api/scenes/master/default",
            Some(json!({"elements": {"clock": {"x": 1, "y": 1}}, "hidden": []})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, fallback) = t.request("GET", "/api/scenes/master", None).await;
    assert_eq!(fallback["is_default"], true);
    assert_eq!(fallback["document"]["elements"]["clock"]["x"], 1);

    let (status, saved) = t
        .request(
            "PUT",
            "/api/scenes/master",
            Some(json!({"is_delta": true, "elements": {"clock": {"x": 5}}, "hidden": ["clock"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["document"]["elements"]["clock"], json!({"x": 5, "y": 1}));
    assert!(saved["document"].get("is_delta").is_none());

    let (_, own) = t.request("GET", "/api/scenes/master", None).await;
    assert_eq!(own["is_default"], false);
    assert_eq!(own["document"]["hidden"], json!(["clock"]));

    let (_, list) = t.request("GET", "/api/scenes", None).await;
    assert_eq!(list["scenes"][0]["config_name"], "master");

    let (_, reset) = t.request("DELETE", "/api/scenes/master", None).await;
    assert_eq!(reset["reset"], true);
    let (_, after) = t.request("GET", "/api/scenes/master", None).await;
    assert_eq!(after["is_default"], true);
}

#[tokio::test]
async fn scene_documents_must_be_objects() {
    let t = setup();
    let (status, body) = t
        .request("PUT", "/api/scenes/master", Some(json!([1, 2, 3])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

fn player_of(t: &TestApp) -> String {
    t.repo
        .resolve_session(&t.token)
        .expect("lookup")
        .expect("live session")
        .id
}
