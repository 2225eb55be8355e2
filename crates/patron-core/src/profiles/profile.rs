//! A single profile and its accounts

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::preferences::Preferences;
use super::{ProfileDatabaseError, ProfileOpenProblem};
use crate::accounts::{Account, AccountsDatabase};
use crate::ids::{AccountId, ProfileId};
use crate::provider::{AccountProvider, AccountProviderRegistry};
use crate::storage;

pub(crate) const DESCRIPTION_FILE: &str = "profile.json";

#[derive(Serialize, Deserialize)]
struct Description {
    display_name: String,
    current_account: AccountId,
    #[serde(default)]
    preferences: Preferences,
}

/// Outcome of deleting an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountDeletion {
    pub account: AccountId,
    /// Set when the deleted account was current and another took its place
    pub current_changed: Option<AccountId>,
}

/// A person using the client, with one or more library accounts
pub struct Profile {
    id: ProfileId,
    display_name: String,
    directory: PathBuf,
    preferences: Preferences,
    accounts: AccountsDatabase,
    current: Arc<Account>,
}

impl Profile {
    pub fn id(&self) -> ProfileId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn accounts(&self) -> &AccountsDatabase {
        &self.accounts
    }

    pub fn account(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.account(id)
    }

    /// The account currently in use
    pub fn account_current(&self) -> &Arc<Account> {
        &self.current
    }

    /// Catalog of the current account, taking the patron's age into account
    pub fn catalog_uri_for(&self, today: NaiveDate) -> Url {
        self.current
            .provider()
            .catalog_uri_for(self.preferences.date_of_birth, today)
            .clone()
    }

    /// Add an account for `provider`
    ///
    /// A profile holds at most one account per provider.
    pub fn create_account(
        &mut self,
        provider: Arc<AccountProvider>,
    ) -> Result<Arc<Account>, ProfileDatabaseError> {
        if self.accounts.account_for_provider(&provider.id).is_some() {
            return Err(ProfileDatabaseError::AccountAlreadyExists(
                provider.id.clone(),
            ));
        }
        Ok(self.accounts.create_account(provider)?)
    }

    /// Delete the account bound to `provider`
    ///
    /// The last account of a profile cannot be deleted. When the current
    /// account goes away the lowest remaining account becomes current.
    pub fn delete_account_by_provider(
        &mut self,
        provider: &Url,
    ) -> Result<AccountDeletion, ProfileDatabaseError> {
        let account = self
            .accounts
            .account_for_provider(provider)
            .ok_or_else(|| ProfileDatabaseError::NoAccountForProvider(provider.clone()))?;
        if self.accounts.len() <= 1 {
            return Err(ProfileDatabaseError::OnlyOneRemaining);
        }

        let mut current_changed = None;
        if account.id() == self.current.id() {
            let replacement = self
                .accounts
                .accounts()
                .values()
                .find(|a| a.id() != account.id())
                .cloned()
                .ok_or(ProfileDatabaseError::OnlyOneRemaining)?;
            self.write_description(replacement.id(), &self.preferences)?;
            current_changed = Some(replacement.id());
            self.current = replacement;
        }

        self.accounts.delete_account(account.id())?;
        Ok(AccountDeletion {
            account: account.id(),
            current_changed,
        })
    }

    /// Make the account bound to `provider` current
    pub fn select_account(&mut self, provider: &Url) -> Result<Arc<Account>, ProfileDatabaseError> {
        let account = self
            .accounts
            .account_for_provider(provider)
            .ok_or_else(|| ProfileDatabaseError::NoAccountForProvider(provider.clone()))?;

        if account.id() != self.current.id() {
            self.write_description(account.id(), &self.preferences)?;
            self.current = account.clone();
            info!(profile = %self.id, account = %account.id(), "selected account");
        }
        Ok(account)
    }

    pub fn set_preferences(&mut self, preferences: Preferences) -> Result<(), ProfileDatabaseError> {
        self.write_description(self.current.id(), &preferences)?;
        self.preferences = preferences;
        Ok(())
    }

    fn write_description(
        &self,
        current_account: AccountId,
        preferences: &Preferences,
    ) -> Result<(), ProfileDatabaseError> {
        storage::write_json(
            &self.directory.join(DESCRIPTION_FILE),
            &Description {
                display_name: self.display_name.clone(),
                current_account,
                preferences: preferences.clone(),
            },
        )?;
        debug!(profile = %self.id, "stored profile description");
        Ok(())
    }

    /// Create a profile on disk with one account for `provider`
    pub(super) fn provision(
        id: ProfileId,
        directory: PathBuf,
        display_name: String,
        preferences: Preferences,
        provider: Arc<AccountProvider>,
        providers: &dyn AccountProviderRegistry,
    ) -> Result<Self, ProfileDatabaseError> {
        storage::create_dir_all(&directory)?;
        let mut accounts = AccountsDatabase::open(&directory, providers)?;
        let current = accounts.create_account(provider)?;

        let profile = Self {
            id,
            display_name,
            directory,
            preferences,
            accounts,
            current,
        };
        profile.write_description(profile.current.id(), &profile.preferences)?;
        Ok(profile)
    }

    pub(super) fn load(
        id: ProfileId,
        directory: PathBuf,
        providers: &dyn AccountProviderRegistry,
    ) -> Result<Self, ProfileOpenProblem> {
        let description =
            storage::read_json_optional::<Description>(&directory.join(DESCRIPTION_FILE))
                .map_err(|source| ProfileOpenProblem::Unreadable { id, source })?
                .ok_or(ProfileOpenProblem::MissingDescription { id })?;

        let accounts = AccountsDatabase::open(&directory, providers)
            .map_err(|source| ProfileOpenProblem::Accounts { id, source })?;
        if accounts.is_empty() {
            return Err(ProfileOpenProblem::NoAccounts { id });
        }

        let current = accounts
            .account(description.current_account)
            .ok_or(ProfileOpenProblem::CurrentAccountMissing {
                id,
                account: description.current_account,
            })?;

        Ok(Self {
            id,
            display_name: description.display_name,
            directory,
            preferences: description.preferences,
            accounts,
            current,
        })
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("directory", &self.directory)
            .field("accounts", &self.accounts.len())
            .field("current_account", &self.current.id())
            .finish()
    }
}
