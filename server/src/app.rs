//! The axum [`Router`] and its handlers: sync protocol dispatch, login,
//! and chapter save, wired against [`AppState`]'s shared services.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use scriptura_core::access::InstallationMode;
use scriptura_core::access::Transport;
use scriptura_core::notify::Notifier;
use scriptura_core::save::SaveContext;
use scriptura_core::save::SaveInput;
use scriptura_core::save::SaveOutcome;
use scriptura_core::session::attempt_login;
use scriptura_core::session::LoginThrottle;
use scriptura_core::session::Role;
use scriptura_core::session::Session;
use scriptura_core::store::ChapterStore;
use scriptura_core::sync;
use scriptura_core::sync::Action;

use crate::config::Config;
use crate::convert::PassthroughConverter;
use crate::db::Database;
use crate::http::error_response;
use crate::http::parse_request_body;
use crate::http::wire_response;

pub struct AppState {
    pub store: Arc<dyn ChapterStore>,
    pub db: Arc<Database>,
    pub notifier: Arc<dyn Notifier>,
    pub converter: PassthroughConverter,
    pub config: Config,
    pub login_throttle: LoginThrottle,
}

pub fn router(state: Arc<AppState>) -> Router {
    let guarded = Router::new()
        .route("/sync", post(handle_sync))
        .route("/login", post(handle_login))
        .route("/save", post(handle_save))
        .layer(from_fn_with_state(state.clone(), require_secure_transport));

    Router::new()
        .merge(guarded)
        .route("/healthz", get(handle_health))
        .with_state(state)
}

/// Refuses requests over plaintext with 426 Upgrade Required when the
/// installation is configured to demand a secure transport (spec §6,
/// supplemented feature: "responds to an insecure request with status
/// 426"). TLS is expected to be terminated in front of this process; the
/// reverse proxy is expected to set `x-forwarded-proto` accordingly.
async fn require_secure_transport(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.config.require_secure_transport {
        let is_secure = request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));
        if !is_secure {
            return error_response(StatusCode::UPGRADE_REQUIRED, "secure transport required");
        }
    }
    next.run(request).await
}

#[derive(serde::Serialize)]
struct Health {
    status: &'static str,
    bibles: usize,
}

/// Plain liveness probe, separate from the wire protocol: orchestrators
/// (systemd, a container scheduler) expect JSON, not the `key=value` sync
/// encoding the rest of this router speaks.
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let bibles = state.store.list_bibles().map(|b| b.len()).unwrap_or(0);
    Json(Health { status: "ok", bibles }).into_response()
}

/// The session a request claims, carried as two plain wire fields (`un`,
/// `ro`) rather than a bearer token scheme, consistent with the rest of
/// the wire protocol's flat field style. A production deployment would
/// authenticate this from a signed cookie instead of trusting the field;
/// wiring that through is `scriptura-server`'s integration surface, not
/// `scriptura-core`'s.
fn session_from_fields(fields: &sync::Fields) -> Option<Session> {
    let username = fields.get("un")?.clone();
    let role = match fields.get("ro")?.as_str() {
        "guest" => Role::Guest,
        "member" => Role::Member,
        "consultant" => Role::Consultant,
        "translator" => Role::Translator,
        "manager" => Role::Manager,
        "admin" => Role::Admin,
        _ => return None,
    };
    Some(Session { username, role })
}

async fn handle_sync(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let fields = parse_request_body(&body);
    let Some(action_code) = fields.get("ac") else {
        return error_response(StatusCode::BAD_REQUEST, "missing action field");
    };
    let Some(action) = Action::from_wire_code(action_code) else {
        return error_response(StatusCode::BAD_REQUEST, "unknown action");
    };

    match action {
        Action::SendChapter => {
            let Some(session) = session_from_fields(&fields) else {
                return error_response(StatusCode::UNAUTHORIZED, "missing session fields");
            };
            let mode = InstallationMode::from(state.config.installation_mode);
            // The `require_secure_transport` middleware already rejected any
            // plaintext request before this handler runs, so the role/mode
            // check below only ever sees a connection it should treat as secure.
            match sync::handle_send_chapter(
                state.store.as_ref(),
                state.db.as_ref(),
                state.notifier.as_ref(),
                &session,
                mode,
                Transport::Secure,
                state.config.require_secure_transport,
                &state.config.save_limits,
                &state.config.moderator_address,
                Utc::now(),
                &fields,
            ) {
                Ok(response) => wire_response(&response),
                Err(err @ sync::SyncError::ChecksumMismatch) => {
                    error_response(StatusCode::CONFLICT, err.to_string())
                }
                Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
            }
        }
        Action::GetChapter => match sync::handle_get_chapter(state.store.as_ref(), &fields) {
            Ok(response) => wire_response(&response),
            Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        },
        _ => match sync::handle_checksum_or_list_request(state.store.as_ref(), action, &fields) {
            Ok(response) => wire_response(&response),
            Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        },
    }
}

async fn handle_login(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let fields = parse_request_body(&body);
    let (Some(username), Some(password)) = (fields.get("un"), fields.get("pw")) else {
        return error_response(StatusCode::BAD_REQUEST, "missing credentials");
    };
    let now_unix = Utc::now().timestamp().max(0) as u64;
    match attempt_login(
        state.db.as_ref(),
        &state.login_throttle,
        now_unix,
        username,
        password,
    ) {
        Ok(session) => {
            let mut fields = sync::Fields::new();
            fields.insert("un".to_string(), session.username);
            fields.insert("ro".to_string(), format!("{:?}", session.role).to_lowercase());
            wire_response(&fields)
        }
        Err(err) => error_response(StatusCode::UNAUTHORIZED, err.to_string()),
    }
}

async fn handle_save(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let fields = parse_request_body(&body);
    let Some(session) = session_from_fields(&fields) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing session fields");
    };
    let (Some(bible), Some(book), Some(chapter), Some(html), Some(checksum)) = (
        fields.get("bi"),
        fields.get("bk").and_then(|v| v.parse::<u16>().ok()),
        fields.get("ch").and_then(|v| v.parse::<u32>().ok()),
        fields.get("ht"),
        fields.get("ck"),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "missing or malformed save fields");
    };

    let ctx = SaveContext {
        store: state.store.as_ref(),
        snapshots: state.db.as_ref(),
        ledger: state.db.as_ref(),
        converter: &state.converter,
        mode: InstallationMode::from(state.config.installation_mode),
        // Gated by the `require_secure_transport` middleware before this
        // handler runs; see the note in `handle_sync`.
        transport: Transport::Secure,
        require_secure_transport: state.config.require_secure_transport,
        limits: state.config.save_limits,
    };
    let input = SaveInput {
        bible: bible.clone(),
        book,
        chapter,
        html: html.clone(),
        client_checksum: checksum.clone(),
    };
    let outcome = scriptura_core::save::save_chapter(&ctx, &session, Utc::now(), input);

    let mut response = sync::Fields::new();
    match outcome {
        SaveOutcome::Saved => {
            response.insert("st".to_string(), "saved".to_string());
        }
        SaveOutcome::MergedWithOthers { rendered_html } => {
            response.insert("st".to_string(), "reload".to_string());
            response.insert("ht".to_string(), rendered_html);
        }
        SaveOutcome::SavedWithConflicts { rendered_html, conflicts } => {
            response.insert("st".to_string(), "reload".to_string());
            response.insert("ht".to_string(), rendered_html);
            response.insert(
                "cv".to_string(),
                conflicts
                    .iter()
                    .map(|c| c.verse.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        SaveOutcome::ChecksumMismatch => {
            return error_response(StatusCode::CONFLICT, "checksum mismatch");
        }
        SaveOutcome::Rejected { message } => {
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    }
    wire_response(&response)
}
