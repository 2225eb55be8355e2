//! Events published by the controller
//!
//! Every controller request ends with exactly one terminal event. Outcomes
//! are closed enums so callers handle them with a single `match`.
//!
//! Failure events carry an optional cause for logging. Causes are shared
//! (`Arc`) so events stay cheap to clone across subscribers.

pub mod bus;

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::credentials::Credentials;
use crate::ids::{AccountId, ProfileId};

pub use bus::{EventBus, Subscription};

/// Underlying cause attached to a failure event
pub type Cause = Arc<anyhow::Error>;

pub(crate) fn cause(error: impl Into<anyhow::Error>) -> Option<Cause> {
    Some(Arc::new(error.into()))
}

fn fmt_cause(f: &mut fmt::Formatter<'_>, cause: &Option<Cause>) -> fmt::Result {
    match cause {
        Some(cause) => write!(f, ": {:#}", cause),
        None => Ok(()),
    }
}

/// Events about profiles
#[derive(Debug, Clone)]
pub enum ProfileEvent {
    ProfileCreated {
        id: ProfileId,
        display_name: String,
    },
    ProfileCreationFailed {
        display_name: String,
        error: ProfileCreationError,
        cause: Option<Cause>,
    },
}

/// Why a profile could not be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileCreationError {
    /// Another profile already uses the display name
    DuplicateName,
    /// The database runs in anonymous mode
    AnonymousProfileEnabled,
    /// The profile could not be written to disk
    Io,
}

impl fmt::Display for ProfileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileEvent::ProfileCreated { id, display_name } => {
                write!(f, "Created profile {} ({})", id, display_name)
            }
            ProfileEvent::ProfileCreationFailed {
                display_name,
                error,
                cause,
            } => {
                let reason = match error {
                    ProfileCreationError::DuplicateName => "the name is already in use",
                    ProfileCreationError::AnonymousProfileEnabled => {
                        "profiles are disabled in anonymous mode"
                    }
                    ProfileCreationError::Io => "it could not be stored",
                };
                write!(
                    f,
                    "Could not create profile '{}': {}",
                    display_name, reason
                )?;
                fmt_cause(f, cause)
            }
        }
    }
}

/// Events about accounts of the current profile
#[derive(Debug, Clone)]
pub enum AccountEvent {
    AccountCreationSucceeded {
        account: AccountId,
        provider: Url,
    },
    AccountCreationFailed {
        provider: Url,
        error: AccountCreationError,
        cause: Option<Cause>,
    },
    AccountDeletionSucceeded {
        account: AccountId,
        provider: Url,
    },
    AccountDeletionFailed {
        provider: Url,
        error: AccountDeletionError,
        cause: Option<Cause>,
    },
    /// The current account of the current profile changed
    AccountChanged {
        account: AccountId,
    },
    AccountSelectSucceeded {
        account: AccountId,
        provider: Url,
    },
    AccountSelectFailed {
        provider: Url,
        cause: Option<Cause>,
    },
    AccountLoginSucceeded {
        account: AccountId,
        credentials: Credentials,
    },
    AccountLoginFailed {
        account: Option<AccountId>,
        error: AccountLoginError,
        cause: Option<Cause>,
    },
    AccountLogoutSucceeded {
        account: AccountId,
    },
    AccountLogoutFailed {
        account: Option<AccountId>,
        error: AccountLogoutError,
        cause: Option<Cause>,
    },
}

impl AccountEvent {
    /// Whether the event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AccountEvent::AccountCreationFailed { .. }
                | AccountEvent::AccountDeletionFailed { .. }
                | AccountEvent::AccountSelectFailed { .. }
                | AccountEvent::AccountLoginFailed { .. }
                | AccountEvent::AccountLogoutFailed { .. }
        )
    }
}

/// Why an account could not be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountCreationError {
    /// No current profile, unknown provider, or an account already exists
    ProfileConfiguration,
    AccountsDatabaseProblem,
}

/// Why an account could not be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDeletionError {
    /// No current profile or no account for the provider
    ProfileConfiguration,
    /// The account is the last one of the profile
    OnlyOneRemaining,
    AccountsDatabaseProblem,
}

/// Why a login failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLoginError {
    /// The profile or account could not be found
    ProfileConfiguration,
    /// The login request could not be made
    NetworkException,
    /// The server answered 401
    CredentialsIncorrect,
    /// The server answered with another error status
    ServerError,
    /// The credentials could not be stored
    AccountsDatabaseProblem,
}

/// Why a logout failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountLogoutError {
    ProfileConfiguration,
    /// The credentials could not be removed
    AccountsDatabase,
    /// The book database could not be deleted
    Io,
}

impl fmt::Display for AccountEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountEvent::AccountCreationSucceeded { account, provider } => {
                write!(f, "Created account {} for {}", account, provider)
            }
            AccountEvent::AccountCreationFailed {
                provider,
                error,
                cause,
            } => {
                write!(f, "Could not create account for {} ({:?})", provider, error)?;
                fmt_cause(f, cause)
            }
            AccountEvent::AccountDeletionSucceeded { account, provider } => {
                write!(f, "Deleted account {} for {}", account, provider)
            }
            AccountEvent::AccountDeletionFailed {
                provider,
                error,
                cause,
            } => {
                write!(f, "Could not delete account for {} ({:?})", provider, error)?;
                fmt_cause(f, cause)
            }
            AccountEvent::AccountChanged { account } => {
                write!(f, "Current account is now {}", account)
            }
            AccountEvent::AccountSelectSucceeded { account, provider } => {
                write!(f, "Selected account {} for {}", account, provider)
            }
            AccountEvent::AccountSelectFailed { provider, cause } => {
                write!(f, "Could not select account for {}", provider)?;
                fmt_cause(f, cause)
            }
            AccountEvent::AccountLoginSucceeded { account, .. } => {
                write!(f, "Logged in to account {}", account)
            }
            AccountEvent::AccountLoginFailed { error, cause, .. } => {
                let reason = match error {
                    AccountLoginError::ProfileConfiguration => "profile configuration problem",
                    AccountLoginError::NetworkException => "network error",
                    AccountLoginError::CredentialsIncorrect => "incorrect barcode or PIN",
                    AccountLoginError::ServerError => "server error",
                    AccountLoginError::AccountsDatabaseProblem => {
                        "credentials could not be stored"
                    }
                };
                write!(f, "Login failed: {}", reason)?;
                fmt_cause(f, cause)
            }
            AccountEvent::AccountLogoutSucceeded { account } => {
                write!(f, "Logged out of account {}", account)
            }
            AccountEvent::AccountLogoutFailed { error, cause, .. } => {
                write!(f, "Logout failed ({:?})", error)?;
                fmt_cause(f, cause)
            }
        }
    }
}
