//! Account creation, deletion and selection

use tracing::{info, warn};
use url::Url;

use super::Inner;
use crate::events::{cause, AccountCreationError, AccountDeletionError, AccountEvent};
use crate::profiles::ProfileDatabaseError;

pub(super) fn create(inner: &Inner, provider: Url) -> AccountEvent {
    let failed = |error, e: ProfileDatabaseError| {
        warn!(%provider, "account creation failed: {}", e);
        AccountEvent::AccountCreationFailed {
            provider: provider.clone(),
            error,
            cause: cause(e),
        }
    };

    let Some(descriptor) = inner.providers.provider(&provider) else {
        let event = AccountEvent::AccountCreationFailed {
            provider: provider.clone(),
            error: AccountCreationError::ProfileConfiguration,
            cause: cause(anyhow::anyhow!("Unknown account provider {}", provider)),
        };
        return inner.publish_account(event);
    };

    let result = {
        let mut profiles = inner.write_profiles();
        match profiles.current_profile_mut() {
            Some(profile) => profile.create_account(descriptor),
            None => Err(ProfileDatabaseError::NoCurrentProfile),
        }
    };

    let event = match result {
        Ok(account) => {
            info!(account = %account.id(), %provider, "account created");
            AccountEvent::AccountCreationSucceeded {
                account: account.id(),
                provider: provider.clone(),
            }
        }
        Err(
            e @ (ProfileDatabaseError::NoCurrentProfile
            | ProfileDatabaseError::AccountAlreadyExists(_)),
        ) => failed(AccountCreationError::ProfileConfiguration, e),
        Err(e) => failed(AccountCreationError::AccountsDatabaseProblem, e),
    };
    inner.publish_account(event)
}

pub(super) fn delete_by_provider(inner: &Inner, provider: Url) -> AccountEvent {
    let result = {
        let mut profiles = inner.write_profiles();
        match profiles.current_profile_mut() {
            Some(profile) => {
                let account = profile.accounts().account_for_provider(&provider);
                let books = account
                    .as_ref()
                    .and_then(|a| a.books().book_ids().ok())
                    .unwrap_or_default();
                profile
                    .delete_account_by_provider(&provider)
                    .map(|deletion| (deletion, account, books))
            }
            None => Err(ProfileDatabaseError::NoCurrentProfile),
        }
    };

    match result {
        Ok((deletion, account, books)) => {
            if let Some(account) = &account {
                inner.cancel_downloads_of(account);
            }
            for book in &books {
                inner.registry.clear(book);
            }
            info!(account = %deletion.account, %provider, "account deleted");

            let event = inner.publish_account(AccountEvent::AccountDeletionSucceeded {
                account: deletion.account,
                provider,
            });
            if let Some(current) = deletion.current_changed {
                inner.publish_account(AccountEvent::AccountChanged { account: current });
            }
            event
        }
        Err(e) => {
            let error = match &e {
                ProfileDatabaseError::OnlyOneRemaining => AccountDeletionError::OnlyOneRemaining,
                ProfileDatabaseError::NoCurrentProfile
                | ProfileDatabaseError::NoAccountForProvider(_) => {
                    AccountDeletionError::ProfileConfiguration
                }
                _ => AccountDeletionError::AccountsDatabaseProblem,
            };
            warn!(%provider, "account deletion failed: {}", e);
            inner.publish_account(AccountEvent::AccountDeletionFailed {
                provider,
                error,
                cause: cause(e),
            })
        }
    }
}

pub(super) fn select_by_provider(inner: &Inner, provider: Url) -> AccountEvent {
    let result = {
        let mut profiles = inner.write_profiles();
        match profiles.current_profile_mut() {
            Some(profile) => {
                let previous = profile.account_current().id();
                profile
                    .select_account(&provider)
                    .map(|account| (account.id(), account.id() != previous))
            }
            None => Err(ProfileDatabaseError::NoCurrentProfile),
        }
    };

    match result {
        Ok((account, changed)) => {
            let event = inner.publish_account(AccountEvent::AccountSelectSucceeded {
                account,
                provider,
            });
            if changed {
                inner.publish_account(AccountEvent::AccountChanged { account });
            }
            event
        }
        Err(e) => {
            warn!(%provider, "account selection failed: {}", e);
            inner.publish_account(AccountEvent::AccountSelectFailed {
                provider,
                cause: cause(e),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use crate::events::{AccountCreationError, AccountDeletionError, AccountEvent};
    use crate::ids::AccountId;
    use crate::profiles::ProfilesMode;
    use crate::test_support::{self, Harness};

    #[tokio::test]
    async fn test_create_select_delete() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let mut events = controller.account_events();
        let library = test_support::auth_provider_id();

        let event = controller.account_create(library.clone()).await.unwrap();
        assert!(matches!(
            event,
            AccountEvent::AccountCreationSucceeded { account, .. } if account == AccountId::new(1)
        ));

        let event = controller
            .account_select_by_provider(library.clone())
            .await
            .unwrap();
        assert!(matches!(event, AccountEvent::AccountSelectSucceeded { .. }));

        let event = controller
            .account_delete_by_provider(library.clone())
            .await
            .unwrap();
        assert!(matches!(
            event,
            AccountEvent::AccountDeletionSucceeded { account, .. } if account == AccountId::new(1)
        ));

        let published = events.drain();
        assert!(matches!(
            published.as_slice(),
            [
                AccountEvent::AccountCreationSucceeded { .. },
                AccountEvent::AccountSelectSucceeded { .. },
                AccountEvent::AccountChanged { account: a },
                AccountEvent::AccountDeletionSucceeded { .. },
                AccountEvent::AccountChanged { account: b },
            ] if *a == AccountId::new(1) && *b == AccountId::new(0)
        ));
    }

    #[tokio::test]
    async fn test_create_twice_for_provider_fails() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let library = test_support::auth_provider_id();

        controller.account_create(library.clone()).await.unwrap();
        let event = controller.account_create(library).await.unwrap();
        assert!(matches!(
            event,
            AccountEvent::AccountCreationFailed {
                error: AccountCreationError::ProfileConfiguration,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_for_unknown_provider_fails() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let event = harness
            .controller
            .account_create(Url::parse("https://nowhere.example/").unwrap())
            .await
            .unwrap();
        assert!(matches!(
            event,
            AccountEvent::AccountCreationFailed {
                error: AccountCreationError::ProfileConfiguration,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_delete_last_account_fails() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;

        let event = controller
            .account_delete_by_provider(test_support::open_provider_id())
            .await
            .unwrap();
        assert!(matches!(
            event,
            AccountEvent::AccountDeletionFailed {
                error: AccountDeletionError::OnlyOneRemaining,
                ..
            }
        ));
        assert_eq!(
            controller.with_profiles(|p| p.current_profile().unwrap().accounts().len()),
            1
        );
    }

    #[tokio::test]
    async fn test_requests_without_profile_fail() {
        let harness = Harness::new(ProfilesMode::Multi);
        let controller = &harness.controller;

        let event = controller
            .account_create(test_support::auth_provider_id())
            .await
            .unwrap();
        assert!(matches!(
            event,
            AccountEvent::AccountCreationFailed {
                error: AccountCreationError::ProfileConfiguration,
                ..
            }
        ));

        let event = controller
            .account_select_by_provider(test_support::open_provider_id())
            .await
            .unwrap();
        assert!(matches!(event, AccountEvent::AccountSelectFailed { .. }));
    }
}
