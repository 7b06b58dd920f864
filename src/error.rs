//! Unified drive error model and transport mapping helpers.
//! Every layer (backends, permission store, wrapper, HTTP) speaks `DriveError`;
//! the HTTP boundary maps it to a status code with `http_status()`.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a file: {0}")]
    NotAFile(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DriveError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self { DriveError::NotFound(msg.into()) }
    pub fn already_exists<S: Into<String>>(msg: S) -> Self { DriveError::AlreadyExists(msg.into()) }
    pub fn conflict<S: Into<String>>(msg: S) -> Self { DriveError::Conflict(msg.into()) }
    pub fn not_a_directory<S: Into<String>>(msg: S) -> Self { DriveError::NotADirectory(msg.into()) }
    pub fn not_a_file<S: Into<String>>(msg: S) -> Self { DriveError::NotAFile(msg.into()) }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self { DriveError::Forbidden(msg.into()) }
    pub fn bad_request<S: Into<String>>(msg: S) -> Self { DriveError::BadRequest(msg.into()) }
    pub fn not_allowed<S: Into<String>>(msg: S) -> Self { DriveError::NotAllowed(msg.into()) }
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self { DriveError::Unauthorized(msg.into()) }
    pub fn internal<S: Into<String>>(msg: S) -> Self { DriveError::Internal(msg.into()) }

    /// Stable snake_case code used in error response bodies.
    pub fn code_str(&self) -> &'static str {
        match self {
            DriveError::NotFound(_) => "not_found",
            DriveError::AlreadyExists(_) => "already_exists",
            DriveError::Conflict(_) => "conflict",
            DriveError::NotADirectory(_) => "not_a_directory",
            DriveError::NotAFile(_) => "not_a_file",
            DriveError::Forbidden(_) => "forbidden",
            DriveError::BadRequest(_) => "bad_request",
            DriveError::NotAllowed(_) => "not_allowed",
            DriveError::Unauthorized(_) => "unauthorized",
            DriveError::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DriveError::NotFound(m)
            | DriveError::AlreadyExists(m)
            | DriveError::Conflict(m)
            | DriveError::NotADirectory(m)
            | DriveError::NotAFile(m)
            | DriveError::Forbidden(m)
            | DriveError::BadRequest(m)
            | DriveError::NotAllowed(m)
            | DriveError::Unauthorized(m)
            | DriveError::Internal(m) => m.as_str(),
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            DriveError::NotFound(_) => 404,
            DriveError::AlreadyExists(_) | DriveError::Conflict(_) => 409,
            DriveError::NotADirectory(_) | DriveError::NotAFile(_) | DriveError::BadRequest(_) => 400,
            DriveError::Forbidden(_) => 403,
            DriveError::NotAllowed(_) => 405,
            DriveError::Unauthorized(_) => 401,
            DriveError::Internal(_) => 500,
        }
    }

    /// JSON body sent alongside a non-2xx status.
    pub fn body(&self) -> ErrorBody<'_> {
        ErrorBody { code: self.code_str(), message: self.message() }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: &'a str,
    pub message: &'a str,
}

pub type DriveResult<T> = Result<T, DriveError>;

impl From<std::io::Error> for DriveError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => DriveError::NotFound(err.to_string()),
            ErrorKind::AlreadyExists => DriveError::AlreadyExists(err.to_string()),
            ErrorKind::PermissionDenied => DriveError::Forbidden(err.to_string()),
            _ => DriveError::Internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for DriveError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: untyped failures are backend faults
        DriveError::Internal(err.to_string())
    }
}
