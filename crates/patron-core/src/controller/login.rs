//! Login and logout

use anyhow::anyhow;
use tracing::{debug, info, warn};

use super::{Inner, LoginTarget};
use crate::accounts::Account;
use crate::credentials::Credentials;
use crate::events::{cause, AccountEvent, AccountLoginError, AccountLogoutError, Cause};
use crate::http::HttpResult;

pub(super) async fn login(
    inner: &Inner,
    target: LoginTarget,
    credentials: Credentials,
) -> AccountEvent {
    let account = match inner.resolve(target) {
        Ok(account) => account,
        Err(e) => {
            let account = match target {
                LoginTarget::Account(id) => Some(id),
                LoginTarget::Current => None,
            };
            return inner.publish_account(AccountEvent::AccountLoginFailed {
                account,
                error: AccountLoginError::ProfileConfiguration,
                cause: cause(e),
            });
        }
    };

    let failed = |error: AccountLoginError, cause: Option<Cause>| {
        warn!(account = %account.id(), ?error, "login failed");
        AccountEvent::AccountLoginFailed {
            account: Some(account.id()),
            error,
            cause,
        }
    };

    if let Some(auth) = &account.provider().authentication {
        debug!(account = %account.id(), uri = %auth.login_uri, "probing credentials");
        let probe = inner
            .http
            .head(Some(&credentials.http_auth()), &auth.login_uri)
            .await;
        let error = match probe {
            HttpResult::Ok(_) => None,
            HttpResult::Error { status: 401, .. } => Some((
                AccountLoginError::CredentialsIncorrect,
                cause(anyhow!("The server rejected the credentials")),
            )),
            HttpResult::Error { status, message } => Some((
                AccountLoginError::ServerError,
                cause(anyhow!("HTTP {}: {}", status, message)),
            )),
            HttpResult::Exception(e) => Some((AccountLoginError::NetworkException, cause(e))),
        };
        if let Some((error, cause)) = error {
            return inner.publish_account(failed(error, cause));
        }
    }

    let credentials = activate_device(inner, &account, credentials).await;
    if let Err(e) = account.set_credentials(Some(credentials.clone())) {
        return inner.publish_account(failed(
            AccountLoginError::AccountsDatabaseProblem,
            cause(e),
        ));
    }

    info!(account = %account.id(), "logged in");
    inner.publish_account(AccountEvent::AccountLoginSucceeded {
        account: account.id(),
        credentials,
    })
}

/// Activate this device with the patron's DRM vendor, when possible
///
/// Failure leaves the credentials untouched.
async fn activate_device(inner: &Inner, account: &Account, credentials: Credentials) -> Credentials {
    let Some(drm) = &inner.drm else {
        return credentials;
    };
    let Some(adobe) = credentials.adobe_credentials().cloned() else {
        return credentials;
    };
    if adobe.is_activated() {
        return credentials;
    }
    let Some(licensor) = credentials.licensor_for(&adobe.vendor_id).cloned() else {
        debug!(account = %account.id(), vendor = %adobe.vendor_id, "no DRM licensor");
        return credentials;
    };

    match drm
        .activate_device(&adobe.vendor_id, &licensor.client_token)
        .await
    {
        Ok(activation) => {
            info!(account = %account.id(), vendor = %adobe.vendor_id, "device activated");
            credentials.with_adobe_credentials(Some(adobe.activated(activation)))
        }
        Err(e) => {
            warn!(account = %account.id(), "device activation failed: {:#}", e);
            credentials
        }
    }
}

pub(super) async fn logout(inner: &Inner) -> AccountEvent {
    let account = match inner.resolve(LoginTarget::Current) {
        Ok(account) => account,
        Err(e) => {
            return inner.publish_account(AccountEvent::AccountLogoutFailed {
                account: None,
                error: AccountLogoutError::ProfileConfiguration,
                cause: cause(e),
            });
        }
    };

    let adobe = account
        .credentials()
        .and_then(|c| c.adobe_credentials().cloned())
        .filter(|a| a.is_activated());
    if let (Some(drm), Some(adobe)) = (&inner.drm, adobe) {
        match drm.deactivate_device(&adobe).await {
            Ok(()) => info!(account = %account.id(), "device deactivated"),
            Err(e) => warn!(account = %account.id(), "device deactivation failed: {:#}", e),
        }
    }

    if let Err(e) = account.remove_credentials() {
        warn!(account = %account.id(), "logout failed: {}", e);
        return inner.publish_account(AccountEvent::AccountLogoutFailed {
            account: Some(account.id()),
            error: AccountLogoutError::AccountsDatabase,
            cause: cause(e),
        });
    }

    let mut books = account.books().book_ids().unwrap_or_else(|e| {
        warn!(account = %account.id(), "could not list books: {}", e);
        Vec::new()
    });
    books.extend(inner.cancel_downloads_of(&account));

    let destroyed = account.books().destroy();
    for book in &books {
        inner.registry.clear(book);
    }

    match destroyed {
        Ok(()) => {
            info!(account = %account.id(), books = books.len(), "logged out");
            inner.publish_account(AccountEvent::AccountLogoutSucceeded {
                account: account.id(),
            })
        }
        Err(e) => {
            warn!(account = %account.id(), "could not delete books: {}", e);
            inner.publish_account(AccountEvent::AccountLogoutFailed {
                account: Some(account.id()),
                error: AccountLogoutError::Io,
                cause: cause(e),
            })
        }
    }
}
