//! Book status lifecycle
//!
//! ```text
//! Idle -> RequestingLoan -> Fulfilling -> Downloading -> Downloaded | DownloadFailed
//! Downloaded -> RequestingRevoke -> Revoked | RevokeFailed
//! ```
//!
//! Any status may be cleared when the book is deleted or its account logs
//! out.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::feed::AcquisitionType;
use crate::ids::{AccountId, BookId};

/// Current status of one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BookStatus {
    /// Known to the account but nothing is held locally
    Idle,
    RequestingLoan,
    Fulfilling,
    Downloading {
        running: u64,
        total: Option<u64>,
    },
    Downloaded,
    DownloadFailed {
        error: BorrowError,
    },
    RequestingRevoke,
    Revoked,
    RevokeFailed {
        error: RevokeError,
    },
}

impl BookStatus {
    /// Whether work is in progress for the book
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            BookStatus::RequestingLoan
                | BookStatus::Fulfilling
                | BookStatus::Downloading { .. }
                | BookStatus::RequestingRevoke
        )
    }

    /// Whether the book may be revoked from this status
    pub fn is_revocable(&self) -> bool {
        matches!(
            self,
            BookStatus::Downloaded | BookStatus::Idle | BookStatus::RevokeFailed { .. }
        )
    }

    /// Download progress as a fraction, when known
    pub fn progress(&self) -> Option<f64> {
        match self {
            BookStatus::Downloading {
                running,
                total: Some(total),
            } if *total > 0 => Some((*running as f64 / *total as f64).min(1.0)),
            _ => None,
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookStatus::Idle => write!(f, "idle"),
            BookStatus::RequestingLoan => write!(f, "requesting loan"),
            BookStatus::Fulfilling => write!(f, "fulfilling"),
            BookStatus::Downloading { running, total } => match total {
                Some(total) => write!(f, "downloading {}/{} bytes", running, total),
                None => write!(f, "downloading {} bytes", running),
            },
            BookStatus::Downloaded => write!(f, "downloaded"),
            BookStatus::DownloadFailed { error } => write!(f, "download failed: {}", error),
            BookStatus::RequestingRevoke => write!(f, "requesting revoke"),
            BookStatus::Revoked => write!(f, "revoked"),
            BookStatus::RevokeFailed { error } => write!(f, "revoke failed: {}", error),
        }
    }
}

/// Which fetch of a borrow failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    /// Fetching the DRM fulfillment token
    DrmToken,
    /// Fetching the book itself
    Artifact,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::DrmToken => write!(f, "DRM token"),
            FetchStage::Artifact => write!(f, "book"),
        }
    }
}

/// Why a borrow ended in `DownloadFailed`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BorrowError {
    #[error("account {account} does not exist in the profile the request was made in")]
    AccountNotFound { account: AccountId },

    #[error("acquisition type '{acquisition}' requires a remote loan, which is not supported")]
    UnsupportedAcquisition { acquisition: AcquisitionType },

    #[error("fetching the {stage} failed{}: {message}", http_suffix(.status))]
    Fetch {
        stage: FetchStage,
        status: Option<u16>,
        running: u64,
        message: String,
    },

    #[error("the book requires DRM but no DRM connector is available")]
    DrmUnsupported,

    #[error("the book requires DRM but this device is not activated for the account")]
    DrmNotActivated,

    #[error("DRM fulfillment failed: {message}")]
    DrmFulfillment { message: String },

    #[error("the book database could not store the book: {message}")]
    Database { message: String },
}

fn http_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" with HTTP {}", s))
        .unwrap_or_default()
}

/// Why a revoke ended in `RevokeFailed`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevokeError {
    #[error("account {account} does not exist in the profile the request was made in")]
    AccountNotFound { account: AccountId },

    #[error("the book is not held by this account")]
    NotFound,

    #[error("the book has no download, loan or revocation link to give back")]
    NotRevocable,

    #[error("the loan is DRM protected but no DRM connector is available")]
    DrmUnsupported,

    #[error("returning the DRM loan failed: {message}")]
    DrmReturn { message: String },

    #[error("the server refused the revocation with HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("the revocation request failed: {message}")]
    Network { message: String },

    #[error("the book database could not be updated: {message}")]
    Database { message: String },
}

/// Event published by the book registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookStatusEvent {
    /// The status of a book changed
    Changed { book_id: BookId, status: BookStatus },
    /// The book no longer has a status
    Cleared { book_id: BookId },
}

impl BookStatusEvent {
    pub fn book_id(&self) -> &BookId {
        match self {
            BookStatusEvent::Changed { book_id, .. } | BookStatusEvent::Cleared { book_id } => {
                book_id
            }
        }
    }
}
