//! Drives the axum [`Router`] end to end with `tower::ServiceExt::oneshot`,
//! exercising the wire protocol surface without binding a real socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use http_body_util::BodyExt as _;
use scriptura_core::session::LoginThrottle;
use scriptura_core::store::ChapterStore;
use scriptura_core::sync::decode;
use scriptura_core::sync::encode;
use scriptura_core::sync::Fields;
use scriptura_server::app;
use scriptura_server::app::AppState;
use scriptura_server::config::Config;
use scriptura_server::convert::PassthroughConverter;
use scriptura_server::db::Database;
use scriptura_testutils::RecordingNotifier;
use tower::ServiceExt as _;

fn test_state(tmp: &std::path::Path) -> Arc<AppState> {
    let store = scriptura_core::store::FsChapterStore::open(tmp).unwrap();
    store.create_bible("KJV").unwrap();
    store
        .store_chapter("KJV", 40, 1, "\\c 1\n\\v 1 In the beginning.\n")
        .unwrap();
    let db = Database::open(std::path::Path::new(":memory:")).unwrap();
    db.create_account(
        "alice",
        scriptura_core::session::Role::Translator,
        &bcrypt::hash("hunter2", bcrypt::DEFAULT_COST).unwrap(),
        "alice@example.invalid",
    )
    .unwrap();

    let mut config = Config::default();
    config.installation_mode = scriptura_server::config::ConfigInstallationMode::Open;
    config.require_secure_transport = false;

    Arc::new(AppState {
        store: Arc::new(store),
        db: Arc::new(db),
        notifier: Arc::new(RecordingNotifier::default()),
        converter: PassthroughConverter,
        login_throttle: LoginThrottle::new(0),
        config,
    })
}

async fn post_wire(router: axum::Router, path: &str, fields: &Fields) -> (StatusCode, Fields) {
    let body = encode(fields);
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "text/plain")
        .body(Body::from(body))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, decode(&String::from_utf8_lossy(&bytes)))
}

#[tokio::test]
async fn get_chapter_over_http_returns_stored_text() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state);

    let mut fields = Fields::new();
    fields.insert("ac".to_string(), "B8".to_string());
    fields.insert("bi".to_string(), "KJV".to_string());
    fields.insert("bk".to_string(), "40".to_string());
    fields.insert("ch".to_string(), "1".to_string());

    let (status, response) = post_wire(router, "/sync", &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.get("us").unwrap(), "\\c 1\n\\v 1 In the beginning.");
}

#[tokio::test]
async fn save_over_http_commits_and_reports_saved() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state.clone());

    let mut fields = Fields::new();
    fields.insert("un".to_string(), "alice".to_string());
    fields.insert("ro".to_string(), "translator".to_string());
    fields.insert("bi".to_string(), "KJV".to_string());
    fields.insert("bk".to_string(), "40".to_string());
    fields.insert("ch".to_string(), "1".to_string());
    let html = "\\c 1\n\\v 1 In the beginning, revised.\n".to_string();
    fields.insert("ck".to_string(), scriptura_core::checksum::hash(&html));
    fields.insert("ht".to_string(), html);

    let (status, response) = post_wire(router, "/save", &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.get("st").unwrap(), "saved");
    assert_eq!(
        state.store.get_chapter("KJV", 40, 1).unwrap(),
        "\\c 1\n\\v 1 In the beginning, revised."
    );
}

#[tokio::test]
async fn save_with_mismatched_checksum_is_conflict() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state.clone());

    let mut fields = Fields::new();
    fields.insert("un".to_string(), "alice".to_string());
    fields.insert("ro".to_string(), "translator".to_string());
    fields.insert("bi".to_string(), "KJV".to_string());
    fields.insert("bk".to_string(), "40".to_string());
    fields.insert("ch".to_string(), "1".to_string());
    fields.insert("ht".to_string(), "\\c 1\n\\v 1 In the beginning, revised.\n".to_string());
    fields.insert("ck".to_string(), "not-the-real-checksum".to_string());

    let (status, _) = post_wire(router, "/save", &fields).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        state.store.get_chapter("KJV", 40, 1).unwrap(),
        "\\c 1\n\\v 1 In the beginning."
    );
}

#[tokio::test]
async fn save_without_session_fields_is_unauthorized() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state);

    let mut fields = Fields::new();
    fields.insert("bi".to_string(), "KJV".to_string());
    fields.insert("bk".to_string(), "40".to_string());
    fields.insert("ch".to_string(), "1".to_string());
    fields.insert("ht".to_string(), "\\c 1\n\\v 1 x\n".to_string());
    fields.insert("ck".to_string(), "x".to_string());

    let (status, _) = post_wire(router, "/save", &fields).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_correct_password_returns_session_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state);

    let mut fields = Fields::new();
    fields.insert("un".to_string(), "alice".to_string());
    fields.insert("pw".to_string(), "hunter2".to_string());

    let (status, response) = post_wire(router, "/login", &fields).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.get("un").unwrap(), "alice");
    assert_eq!(response.get("ro").unwrap(), "translator");
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state);

    let mut fields = Fields::new();
    fields.insert("un".to_string(), "alice".to_string());
    fields.insert("pw".to_string(), "wrong".to_string());

    let (status, _) = post_wire(router, "/login", &fields).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_sync_action_is_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let router = app::router(state);

    let mut fields = Fields::new();
    fields.insert("ac".to_string(), "ZZ".to_string());
    let (status, _) = post_wire(router, "/sync", &fields).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn plaintext_sync_request_is_upgrade_required_when_secure_transport_is_mandated() {
    let tmp = tempfile::tempdir().unwrap();
    let store = scriptura_core::store::FsChapterStore::open(tmp.path()).unwrap();
    store.create_bible("KJV").unwrap();
    let db = Database::open(std::path::Path::new(":memory:")).unwrap();
    let mut config = Config::default();
    config.installation_mode = scriptura_server::config::ConfigInstallationMode::Open;
    config.require_secure_transport = true;

    let state = Arc::new(AppState {
        store: Arc::new(store),
        db: Arc::new(db),
        notifier: Arc::new(RecordingNotifier::default()),
        converter: PassthroughConverter,
        login_throttle: LoginThrottle::new(0),
        config,
    });
    let router = app::router(state);

    let mut fields = Fields::new();
    fields.insert("ac".to_string(), "B4".to_string());
    let (status, _) = post_wire(router, "/sync", &fields).await;
    assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
}
