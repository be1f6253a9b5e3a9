// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Errors that may be encountered while interacting with the local daemon.

use reqwest::StatusCode;

/// Error raised during communication with the local daemon.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct DaemonError {
    #[from]
    kind: Kind,
}

impl DaemonError {
    /// Returns true if the daemon could not be reached at all.
    pub fn is_connect(&self) -> bool {
        match &self.kind {
            Kind::Connect(_) => true,
            Kind::Reqwest(err) => err.is_connect(),
            _ => false,
        }
    }

    /// Returns true if the daemon rejected the API password.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.kind, Kind::Unauthorized)
            || self.http_status_code() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Returns true if the skylink is already pinned by the daemon. This is
    /// a benign outcome that callers handle as a positive result.
    pub fn is_already_pinned(&self) -> bool {
        matches!(self.kind, Kind::AlreadyPinned)
    }

    /// Returns true if the daemon does not know the requested object.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, Kind::NotFound)
            || self.http_status_code() == Some(StatusCode::NOT_FOUND)
    }

    /// Returns the HTTP status code associated with the error, if any.
    pub fn http_status_code(&self) -> Option<StatusCode> {
        match &self.kind {
            Kind::Status { code, .. } => Some(*code),
            Kind::Reqwest(err) => err.status(),
            _ => None,
        }
    }

    /// An error marking the skylink as already pinned.
    pub fn already_pinned() -> Self {
        Kind::AlreadyPinned.into()
    }

    /// An error marking the daemon as unreachable.
    pub fn connect(message: impl Into<String>) -> Self {
        Kind::Connect(message.into()).into()
    }

    /// An error marking the API password as rejected.
    pub fn unauthorized() -> Self {
        Kind::Unauthorized.into()
    }

    /// Wraps an arbitrary error as a daemon error.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Kind::Other(error.into()).into()
    }

    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_connect() {
            Kind::Connect(error.to_string()).into()
        } else {
            Kind::Reqwest(error).into()
        }
    }

    pub(crate) fn status(code: StatusCode, message: String) -> Self {
        if code == StatusCode::UNAUTHORIZED {
            Kind::Unauthorized.into()
        } else if code == StatusCode::NOT_FOUND {
            Kind::NotFound.into()
        } else {
            Kind::Status { code, message }.into()
        }
    }
}

/// The classified failure modes of daemon communication.
#[derive(Debug, thiserror::Error)]
enum Kind {
    #[error("failed to connect to the local daemon: {0}")]
    Connect(String),
    #[error("the daemon rejected the API password")]
    Unauthorized,
    #[error("skylink already pinned")]
    AlreadyPinned,
    #[error("the daemon does not know the requested object")]
    NotFound,
    #[error("the daemon returned status {code}: {message}")]
    Status {
        code: StatusCode,
        message: String,
    },
    #[error(transparent)]
    Reqwest(reqwest::Error),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// An error returned when building a [`HttpDaemonClient`][crate::HttpDaemonClient] fails.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// The configured daemon authority is not a valid URL host.
    #[error("invalid daemon host or port")]
    InvalidHostOrPort,
    /// The underlying HTTP client could not be constructed.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}
