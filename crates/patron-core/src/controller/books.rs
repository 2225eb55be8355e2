//! Revoking, deleting and cancelling books

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{stored_status, Inner, PinnedAccount};
use crate::accounts::Account;
use crate::books::{BookDatabaseError, BookStatus, RevokeError};
use crate::credentials::AdobeCredentials;
use crate::http::HttpResult;
use crate::ids::{AccountId, BookId};

/// Errors from deleting a book
#[derive(Error, Debug)]
pub enum BookRequestError {
    #[error("Account {0} does not exist in the profile the request was made in")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    Database(#[from] BookDatabaseError),
}

fn database_error(e: BookDatabaseError) -> RevokeError {
    RevokeError::Database {
        message: e.to_string(),
    }
}

pub(super) async fn revoke(inner: &Inner, book_id: BookId, account: PinnedAccount) -> BookStatus {
    let status = match run_revoke(inner, &book_id, &account).await {
        Ok(()) => {
            info!(book = %book_id.short(), "book revoked");
            BookStatus::Revoked
        }
        Err(error) => {
            warn!(book = %book_id.short(), "revoke failed: {}", error);
            BookStatus::RevokeFailed { error }
        }
    };
    inner.registry.update(&book_id, status.clone());
    status
}

async fn run_revoke(inner: &Inner, book_id: &BookId, pin: &PinnedAccount) -> Result<(), RevokeError> {
    let account = inner
        .account(pin)
        .ok_or(RevokeError::AccountNotFound { account: pin.id })?;

    // A revoked book must not be brought back by a download still running
    if inner.cancel_download(book_id).is_some() {
        debug!(book = %book_id.short(), "cancelled download of revoked book");
    }

    let record = account
        .books()
        .book(book_id)
        .map_err(database_error)?
        .ok_or(RevokeError::NotFound)?;
    if !record.is_downloaded() && record.loan.is_none() && record.entry.revoke_uri.is_none() {
        return Err(RevokeError::NotRevocable);
    }

    if let Some(loan) = &record.loan {
        let drm = inner.drm.as_ref().ok_or(RevokeError::DrmUnsupported)?;
        let adobe = adobe_credentials(&account).ok_or_else(|| RevokeError::DrmReturn {
            message: "the device is not activated for this account".to_string(),
        })?;
        drm.return_loan(loan, &adobe)
            .await
            .map_err(|e| RevokeError::DrmReturn {
                message: format!("{:#}", e),
            })?;
        account
            .books()
            .set_loan(book_id, None)
            .map_err(database_error)?;
    } else if let Some(uri) = &record.entry.revoke_uri {
        let auth = account.credentials().map(|c| c.http_auth());
        debug!(book = %book_id.short(), %uri, "requesting revocation");
        match inner.http.get(auth.as_ref(), uri).await {
            HttpResult::Ok(_) => {}
            HttpResult::Error { status, message } => {
                return Err(RevokeError::Server { status, message });
            }
            HttpResult::Exception(e) => {
                return Err(RevokeError::Network {
                    message: format!("{:#}", e),
                });
            }
        }
    }

    account
        .books()
        .delete_artifact(book_id)
        .map_err(database_error)
}

fn adobe_credentials(account: &Account) -> Option<AdobeCredentials> {
    account
        .credentials()
        .and_then(|c| c.adobe_credentials().cloned())
        .filter(AdobeCredentials::is_activated)
}

/// Delete a book and forget its status
///
/// The status is cleared even when the account or the book is gone.
pub(super) fn delete(
    inner: &Inner,
    book_id: BookId,
    account: PinnedAccount,
) -> Result<(), BookRequestError> {
    inner.cancel_download(&book_id);
    let result = match inner.account(&account) {
        Some(account) => account
            .books()
            .delete_book(&book_id)
            .map_err(BookRequestError::from),
        None => Err(BookRequestError::AccountNotFound(account.id)),
    };
    inner.registry.clear(&book_id);

    match &result {
        Ok(()) => info!(book = %book_id.short(), "book deleted"),
        Err(e) => warn!(book = %book_id.short(), "book deletion failed: {}", e),
    }
    result
}

/// Cancel the download of a book, reverting its status
pub(super) fn cancel(inner: &Inner, book_id: &BookId) -> Option<BookStatus> {
    let account = inner.cancel_download(book_id)?;
    let status = stored_status(&account, book_id);
    info!(book = %book_id.short(), %status, "download cancelled");
    inner.registry.update(book_id, status.clone());
    Some(status)
}
