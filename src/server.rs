//! HTTP surface of the drive.
//!
//! Each request resolves its principal from a bearer token or the session
//! cookie, wraps the shared root drive in a per-request
//! `PermissionWrapperDrive`, and calls exactly one capability. Paths from the
//! URL and from `from`/`to` queries are cleaned before they reach a drive.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context as TaskContext, Poll};

use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::DriveConfig;
use crate::drive::path::{clean_path, ROOT};
use crate::drive::{Content, Drive, Entry, EntryJson, PermissionWrapperDrive, UploadPlan, CHUNK_SIZE};
use crate::error::{DriveError, DriveResult};
use crate::identity::{Principal, RequestContext, SessionManager};
use crate::permission::{PathPermission, PermissionResolver};

pub const SESSION_COOKIE: &str = "drive_session";
/// Multipart field carrying the uploaded bytes.
pub const CONTENT_FIELD: &str = "file";
/// Room for multipart boundaries and part headers on top of the upload cap.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
/// Chunks buffered between the request body and the drive.
const UPLOAD_QUEUE: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub root: Arc<dyn Drive>,
    pub resolver: PermissionResolver,
    pub sessions: SessionManager,
    pub allow_anonymous: bool,
    /// Upload cap in bytes; `None` is unlimited.
    pub max_upload_bytes: Option<u64>,
}

impl AppState {
    pub fn from_config(cfg: &DriveConfig) -> anyhow::Result<Self> {
        let root = cfg.build_root_drive()?;
        for prefix in root.mount_prefixes() {
            info!(target: "drivegate", "mount {}", prefix);
        }
        let sessions = cfg.build_sessions();
        info!(target: "drivegate", "{} configured token(s)", sessions.len());
        Ok(Self {
            root: Arc::new(root),
            resolver: PermissionResolver::new(cfg.build_permission_store()?),
            sessions,
            allow_anonymous: cfg.allow_anonymous,
            max_upload_bytes: cfg.upload_limit(),
        })
    }

    /// Identify the caller; credentials that do not validate are never downgraded to anonymous.
    pub fn authenticate(&self, headers: &HeaderMap) -> DriveResult<RequestContext> {
        let principal = match request_token(headers) {
            Some(token) => self
                .sessions
                .validate(&token)
                .ok_or_else(|| DriveError::unauthorized("invalid or expired session"))?,
            None if self.allow_anonymous => Principal::anonymous(),
            None => return Err(DriveError::unauthorized("authentication required")),
        };
        Ok(RequestContext::new(principal))
    }

    /// Root drive as seen by `principal`.
    pub fn drive_for(&self, principal: Principal) -> PermissionWrapperDrive {
        PermissionWrapperDrive::new(principal, self.root.clone(), self.resolver.clone())
    }

    fn session_drive(&self, headers: &HeaderMap, op: &str, path: &str) -> DriveResult<PermissionWrapperDrive> {
        let ctx = self.authenticate(headers)?;
        debug!(
            target: "drivegate::http",
            request_id = %ctx.request_id,
            user = ctx.principal.display_name(),
            anonymous = ctx.principal.is_anonymous(),
            op,
            path,
            "request"
        );
        Ok(self.drive_for(ctx.principal))
    }
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some((k, v)) = p.split_once('=') {
            if k == name { return Some(v.to_string()); }
        }
    }
    None
}

fn request_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    bearer.or_else(|| parse_cookie(headers, SESSION_COOKIE))
}

impl IntoResponse for DriveError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(target: "drivegate", "{}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

// ---- operations shared by handlers and tests ----

pub async fn list_entries(drive: &dyn Drive, path: &str) -> DriveResult<Vec<EntryJson>> {
    Ok(drive.list(path).await?.into_iter().map(EntryJson::from).collect())
}

/// Copy `from` to `to`; the source is looked up first so a missing source reports NotFound.
pub async fn copy_entry(drive: &dyn Drive, from: &str, to: &str, overwrite: bool) -> DriveResult<Entry> {
    let src = drive.get(from).await?;
    let copied = drive
        .copy(&src, to, overwrite, &|loaded: u64| {
            tracing::trace!(target: "drivegate::http", from = src.path.as_str(), loaded, "copy progress");
        })
        .await?;
    Ok(copied)
}

/// Declare an upload. Negative or oversized sizes are rejected before the drive is consulted.
pub async fn declare_upload(
    drive: &dyn Drive,
    path: &str,
    size: i64,
    overwrite: bool,
    limit: Option<u64>,
) -> DriveResult<UploadPlan> {
    if size < 0 {
        return Err(DriveError::bad_request("invalid file size"));
    }
    if let Some(max) = limit {
        if size as u64 > max {
            return Err(DriveError::bad_request(format!("file size {} exceeds limit of {} bytes", size, max)));
        }
    }
    drive.upload(path, size, overwrite).await
}

fn parse_size(raw: Option<&str>) -> DriveResult<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| DriveError::bad_request("invalid file size"))
}

/// Open a file for streaming; directories are not readable content.
pub async fn open_content(drive: &dyn Drive, path: &str) -> DriveResult<(Entry, Content)> {
    let entry = drive.get(path).await?;
    if !entry.is_file() {
        return Err(DriveError::not_allowed(format!("not readable content: {}", path)));
    }
    let content = drive.read(path).await?;
    Ok((entry, content))
}

/// `AsyncRead` over chunks handed across a channel; the sender closing is EOF.
struct ChunkReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
}

impl AsyncRead for ChunkReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        while self.pending.is_empty() {
            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = self.pending.len().min(buf.remaining());
        let chunk = self.pending.split_to(n);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

/// Stream `body` into `drive.save` as it arrives. The body is never held in
/// memory as a whole; once more than `limit` bytes arrive the save is failed
/// with BadRequest.
pub async fn save_content<S>(drive: &dyn Drive, path: &str, body: S, limit: Option<u64>) -> DriveResult<Entry>
where
    S: Stream<Item = DriveResult<Bytes>> + Send,
{
    let (tx, rx) = mpsc::channel(UPLOAD_QUEUE);
    let reader: Content = Box::pin(ChunkReader { rx, pending: Bytes::new() });
    let progress = |loaded: u64| trace!(target: "drivegate::http", path, loaded, "save progress");

    let feed = async move {
        let mut body = std::pin::pin!(body);
        let mut received = 0u64;
        while let Some(chunk) = body.next().await {
            let failure = match chunk {
                Ok(chunk) => {
                    received += chunk.len() as u64;
                    match limit {
                        Some(max) if received > max => {
                            DriveError::bad_request(format!("upload exceeds limit of {} bytes", max))
                        }
                        _ => {
                            // The drive stopped reading; its own result tells why
                            if tx.send(Ok(chunk)).await.is_err() {
                                return None;
                            }
                            continue;
                        }
                    }
                }
                Err(e) => e,
            };
            let _ = tx.send(Err(io::Error::new(io::ErrorKind::InvalidData, failure.to_string()))).await;
            return Some(failure);
        }
        None
    };

    let (saved, failure) = tokio::join!(drive.save(path, reader, &progress), feed);
    match failure {
        Some(e) => Err(e),
        None => saved,
    }
}

fn content_stream(reader: Content) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    futures_util::stream::try_unfold(reader, |mut r| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = r.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok::<_, std::io::Error>(Some((Bytes::from(buf), r)))
    })
}

// ---- handlers ----

#[derive(Debug, Deserialize)]
struct TransferQuery {
    from: String,
    to: String,
    #[serde(default)]
    overwrite: bool,
}

/// `size` stays textual so a malformed value gets the same error as a negative one.
#[derive(Debug, Deserialize)]
struct UploadQuery {
    size: Option<String>,
    #[serde(default)]
    overwrite: bool,
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> DriveResult<T> {
    query.map(|Query(q)| q).map_err(|e| DriveError::bad_request(e.body_text()))
}

async fn list_root(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<EntryJson>>, DriveError> {
    let drive = state.session_drive(&headers, "list", ROOT)?;
    Ok(Json(list_entries(&drive, ROOT).await?))
}

async fn list_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<Vec<EntryJson>>, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "list", &path)?;
    Ok(Json(list_entries(&drive, &path).await?))
}

async fn get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<EntryJson>, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "get", &path)?;
    Ok(Json(drive.get(&path).await?.into()))
}

async fn mkdir_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<EntryJson>, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "make_dir", &path)?;
    Ok(Json(drive.make_dir(&path).await?.into()))
}

async fn copy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TransferQuery>, QueryRejection>,
) -> Result<Json<EntryJson>, DriveError> {
    let q = query_params(query)?;
    let (from, to) = (clean_path(&q.from), clean_path(&q.to));
    let drive = state.session_drive(&headers, "copy", &from)?;
    Ok(Json(copy_entry(&drive, &from, &to, q.overwrite).await?.into()))
}

async fn move_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TransferQuery>, QueryRejection>,
) -> Result<Json<EntryJson>, DriveError> {
    let q = query_params(query)?;
    let (from, to) = (clean_path(&q.from), clean_path(&q.to));
    let drive = state.session_drive(&headers, "move", &from)?;
    Ok(Json(drive.move_entry(&from, &to).await?.into()))
}

async fn delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<StatusCode, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "delete", &path)?;
    drive.delete(&path).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    query: Result<Query<UploadQuery>, QueryRejection>,
) -> Result<Json<UploadPlan>, DriveError> {
    let path = clean_path(&path);
    let q = query_params(query)?;
    let size = parse_size(q.size.as_deref())?;
    let drive = state.session_drive(&headers, "upload", &path)?;
    Ok(Json(declare_upload(&drive, &path, size, q.overwrite, state.max_upload_bytes).await?))
}

async fn read_content_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Response, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "read", &path)?;
    let (entry, content) = open_content(&drive, &path).await?;
    let mut resp = Body::from_stream(content_stream(content)).into_response();
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    h.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.size));
    Ok(resp)
}

async fn write_content_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<EntryJson>, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "save", &path)?;
    let mut multipart = multipart.map_err(|e| DriveError::bad_request(e.body_text()))?;
    while let Some(field) = multipart.next_field().await.map_err(|e| DriveError::bad_request(e.body_text()))? {
        if field.name() != Some(CONTENT_FIELD) {
            continue;
        }
        let body = field.map_err(|e| DriveError::bad_request(e.body_text()));
        return Ok(Json(save_content(&drive, &path, body, state.max_upload_bytes).await?.into()));
    }
    Err(DriveError::bad_request(format!("missing multipart field '{}'", CONTENT_FIELD)))
}

async fn get_permissions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<Vec<PathPermission>>, DriveError> {
    let path = clean_path(&path);
    let drive = state.session_drive(&headers, "list_permissions", &path)?;
    Ok(Json(drive.list_permissions(&path).await?))
}

async fn put_permissions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    records: Result<Json<Vec<PathPermission>>, JsonRejection>,
) -> Result<StatusCode, DriveError> {
    let path = clean_path(&path);
    let Json(records) = records.map_err(|e| DriveError::bad_request(e.body_text()))?;
    let drive = state.session_drive(&headers, "save_permissions", &path)?;
    drive.save_permissions(&path, records).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: AppState) -> Router {
    let upload_limit = match state.max_upload_bytes {
        Some(max) => DefaultBodyLimit::max(usize::try_from(max).unwrap_or(usize::MAX).saturating_add(MULTIPART_OVERHEAD)),
        None => DefaultBodyLimit::disable(),
    };
    Router::new()
        .route("/", get(|| async { "drivegate ok" }))
        .route("/entries", get(list_root))
        .route("/entries/{*path}", get(list_handler))
        .route("/entry/{*path}", get(get_handler).delete(delete_handler))
        .route("/mkdir/{*path}", post(mkdir_handler))
        .route("/copy", post(copy_handler))
        .route("/move", post(move_handler))
        .route("/upload/{*path}", post(upload_handler))
        .route(
            "/content/{*path}",
            get(read_content_handler).put(write_content_handler).layer(upload_limit),
        )
        .route("/permissions/{*path}", get(get_permissions_handler).put(put_permissions_handler))
        .with_state(state)
}

pub async fn run_with_config(cfg: DriveConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&cfg).context("While building drive state from config")?;
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!(target: "drivegate", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
