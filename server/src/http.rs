use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Form, Json, Router,
    extract::{FromRef, FromRequestParts, Path, Query, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, request::Parts},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, Key, PrivateCookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use platform_authn::CredentialStore;
use products_directory::{EmployeeRecord, LookupError, MatchRule, Resolver, ValidationError};
use products_meeting::{MeetingDetails, MeetingStore};
use serde::{Deserialize, Serialize};
use time::Duration as TimeDuration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, instrument, warn};

use crate::{
    attendance::{AttendanceEntry, AttendanceNotifier},
    config::AppConfig,
    pages::{self, Notice},
};

const SESSION_COOKIE: &str = "meeting_admin";
const LOGIN_PATH: &str = "/admin/login";
const INVALID_LOGIN: &str = "ชื่อผู้ใช้หรือรหัสผ่านไม่ถูกต้อง";
const NOT_FOUND_MESSAGE: &str = "รหัสไม่ถูกต้องหรือไม่พบข้อมูล";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub resolver: Arc<Resolver>,
    pub meetings: MeetingStore,
    pub credentials: Arc<CredentialStore>,
    pub notifier: AttendanceNotifier,
    pub cookie_key: Key,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let credentials = match CredentialStore::load(&config.admin_users_file) {
            Ok(store) => store,
            Err(err) => {
                warn!(
                    path = %config.admin_users_file.display(),
                    error = %err,
                    "admin credentials unavailable; admin login disabled"
                );
                CredentialStore::default()
            }
        };
        let notifier =
            AttendanceNotifier::new(config.webhook_url.clone(), config.webhook_timeout)?;
        if !notifier.is_enabled() {
            warn!("GOOGLE_SCRIPT_URL not set; attendance will not be forwarded");
        }
        Ok(Self {
            resolver: Arc::new(config.directory.resolver()),
            meetings: MeetingStore::new(&config.schedule_file),
            credentials: Arc::new(credentials),
            notifier,
            cookie_key: config.cookie_key.clone(),
            config,
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "meeting registration listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    let api = Router::new()
        .route("/api/check_employee/{emp_id}", get(check_employee_handler))
        .layer(cors_layer(&state.config.cors_allowed_origins));
    Router::new()
        .route("/", get(landing_handler))
        .route("/register", post(register_handler))
        .route(
            "/register_manual",
            get(manual_notice_handler).post(register_manual_handler),
        )
        .route(LOGIN_PATH, get(login_page_handler).post(login_handler))
        .route("/admin/logout", get(logout_handler))
        .route(
            "/admin/detail",
            get(meeting_editor_handler).post(meeting_save_handler),
        )
        .route("/admin/cache", get(cache_status_handler))
        .route("/admin/cache/clear", post(cache_clear_handler))
        .route("/health", get(health_handler))
        .merge(api)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

async fn blocking<T, F>(task: F) -> HttpResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| HttpError::internal(err.into()))
}

async fn load_meeting(state: &AppState) -> HttpResult<Option<MeetingDetails>> {
    let store = state.meetings.clone();
    Ok(match blocking(move || store.load()).await? {
        Ok(details) => details,
        Err(err) => {
            warn!(error = %err, "meeting record unreadable");
            None
        }
    })
}

async fn landing_handler(State(state): State<AppState>) -> HttpResult<Html<String>> {
    let meeting = load_meeting(&state).await?;
    Ok(Html(pages::landing(meeting.as_ref(), None)))
}

#[derive(Debug, Default, Deserialize)]
struct DebugQuery {
    debug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegisterForm {
    emp_id: String,
}

fn validation_message(err: &ValidationError) -> String {
    match err {
        ValidationError::TooShort { min, .. } => {
            format!("รหัสพนักงานต้องมีอย่างน้อย {min} หลัก")
        }
    }
}

#[instrument(name = "http.register", skip_all)]
async fn register_handler(
    State(state): State<AppState>,
    Query(query): Query<DebugQuery>,
    Form(form): Form<RegisterForm>,
) -> HttpResult<Response> {
    let raw_id = form.emp_id.trim().to_string();
    if raw_id.is_empty() {
        let meeting = load_meeting(&state).await?;
        let page = pages::landing(meeting.as_ref(), Some("กรุณากรอกรหัสพนักงาน"));
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page)).into_response());
    }
    let show_timing = state.config.debug_mode && query.debug.as_deref() == Some("1");

    let resolver = state.resolver.clone();
    let id = raw_id.clone();
    let response = match blocking(move || resolver.lookup(&id)).await? {
        Ok(lookup) => {
            let timing = show_timing.then_some(&lookup);
            match &lookup.found {
                Some(found) => {
                    info!(emp_id = %found.record.id, rule = ?found.rule, "employee registered");
                    state
                        .notifier
                        .notify(AttendanceEntry::new(&found.record, false, Utc::now()));
                    Html(pages::registered(&found.record, false, timing)).into_response()
                }
                None => {
                    info!(emp_id = %raw_id, "employee id not found");
                    Html(pages::lookup_miss(&raw_id, NOT_FOUND_MESSAGE, timing)).into_response()
                }
            }
        }
        Err(LookupError::Invalid(err)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Html(pages::lookup_miss(&raw_id, &validation_message(&err), None)),
        )
            .into_response(),
        Err(LookupError::Directory(err)) => {
            error!(error = %err, "employee directory unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Html(pages::directory_unavailable(&raw_id)),
            )
                .into_response()
        }
    };
    Ok(response)
}

async fn manual_notice_handler() -> Html<String> {
    Html(pages::manual_notice())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManualForm {
    new_emp_id: String,
    new_emp_name: String,
    new_position: String,
    new_sec_short: String,
    new_cc_name: String,
}

impl ManualForm {
    fn into_record(self, min_id_len: usize) -> Result<EmployeeRecord, Vec<String>> {
        let record = EmployeeRecord {
            id: self.new_emp_id.trim().to_string(),
            name: self.new_emp_name.trim().to_string(),
            job_title: self.new_position.trim().to_string(),
            unit_short: self.new_sec_short.trim().to_string(),
            unit_full: self.new_cc_name.trim().to_string(),
        };
        let mut errors = Vec::new();
        if record.id.chars().count() < min_id_len {
            errors.push(format!("รหัสพนักงานต้องมีอย่างน้อย {min_id_len} หลัก"));
        }
        if record.name.is_empty() {
            errors.push("กรุณากรอกชื่อ - นามสกุล".to_string());
        }
        if errors.is_empty() {
            Ok(record)
        } else {
            Err(errors)
        }
    }
}

#[instrument(name = "http.register_manual", skip_all)]
async fn register_manual_handler(
    State(state): State<AppState>,
    Form(form): Form<ManualForm>,
) -> Response {
    match form.into_record(state.config.manual_min_id_len) {
        Ok(record) => {
            info!(emp_id = %record.id, "manual registration accepted");
            state
                .notifier
                .notify(AttendanceEntry::new(&record, true, Utc::now()));
            Html(pages::registered(&record, true, None)).into_response()
        }
        Err(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Html(pages::manual_rejected(&errors)),
        )
            .into_response(),
    }
}

/// Signed-in administrator, carried in the private session cookie.
#[derive(Debug, Deserialize, Serialize)]
struct AdminSession {
    user: String,
    expires_at: DateTime<Utc>,
}

fn read_session(jar: &PrivateCookieJar) -> Option<AdminSession> {
    let cookie = jar.get(SESSION_COOKIE)?;
    let session: AdminSession = serde_json::from_str(cookie.value()).ok()?;
    (session.expires_at > Utc::now()).then_some(session)
}

/// Extractor for admin-only routes; anonymous requests go to the login page.
struct AdminUser(String);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = PrivateCookieJar::<Key>::from_request_parts(parts, state)
            .await
            .unwrap_or_else(|never| match never {});
        read_session(&jar)
            .map(|session| AdminUser(session.user))
            .ok_or_else(|| Redirect::to(LOGIN_PATH))
    }
}

async fn login_page_handler(jar: PrivateCookieJar) -> Response {
    if read_session(&jar).is_some() {
        return Redirect::to("/admin/detail").into_response();
    }
    Html(pages::login("", None)).into_response()
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[instrument(name = "http.admin_login", skip_all)]
async fn login_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Form(form): Form<LoginForm>,
) -> HttpResult<Response> {
    let username = form.username.trim().to_string();
    let credentials = state.credentials.clone();
    let (user, password) = (username.clone(), form.password);
    let verified = blocking(move || credentials.verify_credential(&user, &password)).await?;
    if !verified {
        warn!(user = %username, "admin login rejected");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Html(pages::login(&username, Some(INVALID_LOGIN))),
        )
            .into_response());
    }

    let ttl = state.config.session_ttl_minutes;
    let session = AdminSession {
        user: username.clone(),
        expires_at: Utc::now() + Duration::minutes(ttl),
    };
    let value = serde_json::to_string(&session).map_err(|err| HttpError::internal(err.into()))?;
    let cookie = Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(ttl))
        .build();
    info!(user = %username, "admin signed in");
    Ok((jar.add(cookie), Redirect::to("/admin/detail")).into_response())
}

async fn logout_handler(jar: PrivateCookieJar) -> (PrivateCookieJar, Redirect) {
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    (jar, Redirect::to(LOGIN_PATH))
}

async fn meeting_editor_handler(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
) -> HttpResult<Html<String>> {
    let details = load_meeting(&state).await?.unwrap_or_default();
    Ok(Html(pages::meeting_editor(&user, &details, None)))
}

#[instrument(name = "http.meeting_save", skip_all)]
async fn meeting_save_handler(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Form(details): Form<MeetingDetails>,
) -> HttpResult<Response> {
    let details = details.normalized();
    if let Err(err) = details.validate() {
        let message = err.to_string();
        let page = pages::meeting_editor(&user, &details, Some(Notice::Error(&message)));
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(page)).into_response());
    }

    let store = state.meetings.clone();
    let record = details.clone();
    match blocking(move || store.save(&record)).await? {
        Ok(()) => {
            info!(user = %user, topic = %details.topic, "meeting details updated");
            Ok(Html(pages::meeting_editor(&user, &details, Some(Notice::Saved))).into_response())
        }
        Err(err) => {
            error!(error = %err, "failed to save meeting details");
            let page = pages::meeting_editor(
                &user,
                &details,
                Some(Notice::Error("บันทึกข้อมูลไม่สำเร็จ")),
            );
            Ok((StatusCode::INTERNAL_SERVER_ERROR, Html(page)).into_response())
        }
    }
}

async fn cache_status_handler(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> HttpResult<Html<String>> {
    let resolver = state.resolver.clone();
    let stats = blocking(move || resolver.cache().stats()).await?;
    let cache = state.resolver.cache().config();
    Ok(Html(pages::cache_status(&stats, &cache.source, &cache.snapshot)))
}

async fn cache_clear_handler(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
) -> HttpResult<Redirect> {
    let resolver = state.resolver.clone();
    blocking(move || resolver.cache().clear())
        .await?
        .map_err(|err| HttpError::internal(err.into()))?;
    info!(user = %user, "directory cache cleared");
    Ok(Redirect::to("/admin/cache"))
}

#[derive(Serialize)]
struct CheckEmployeeResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<EmployeeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<MatchRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn check_employee_handler(
    State(state): State<AppState>,
    Path(emp_id): Path<String>,
) -> HttpResult<(StatusCode, Json<CheckEmployeeResponse>)> {
    let resolver = state.resolver.clone();
    let (status, body) = match blocking(move || resolver.lookup(&emp_id)).await? {
        Ok(lookup) => (
            StatusCode::OK,
            CheckEmployeeResponse {
                exists: lookup.found.is_some(),
                rule: lookup.found.as_ref().map(|found| found.rule),
                data: lookup.found.map(|found| found.record),
                error: None,
            },
        ),
        Err(err) => {
            let status = match err {
                LookupError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LookupError::Directory(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                CheckEmployeeResponse {
                    exists: false,
                    data: None,
                    rule: None,
                    error: Some(err.to_string()),
                },
            )
        }
    };
    Ok((status, Json(body)))
}

async fn health_handler(State(state): State<AppState>) -> HttpResult<Json<HealthResponse>> {
    let resolver = state.resolver.clone();
    let directory_ok = blocking(move || resolver.cache().get().is_ok()).await?;
    Ok(Json(HealthResponse {
        ok: directory_ok,
        directory_ok,
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    directory_ok: bool,
    version: &'static str,
}

type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn internal(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };

    info!("shutdown signal received");
}
