//! Account store
//!
//! Accounts live in numbered subdirectories of their profile's directory:
//!
//! ```text
//! <accountID>/account.json       {"provider": "<uri>"}
//! <accountID>/credentials.json   present while logged in
//! <accountID>/books/             book database
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::books::{BookDatabase, BookDatabaseError};
use crate::credentials::Credentials;
use crate::ids::{self, AccountId};
use crate::provider::{AccountProvider, AccountProviderRegistry};
use crate::storage::{self, StorageError};

const DESCRIPTOR_FILE: &str = "account.json";
const CREDENTIALS_FILE: &str = "credentials.json";
const BOOKS_DIR: &str = "books";

/// Errors raised by the account store
#[derive(Debug, Error)]
pub enum AccountsDatabaseError {
    #[error("Failed to open accounts in '{path}': {}", join_problems(.problems))]
    Open {
        path: PathBuf,
        problems: Vec<AccountOpenProblem>,
    },

    #[error("Account {0} does not exist")]
    NotFound(AccountId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Books(#[from] BookDatabaseError),
}

/// One problem found while opening an account store
#[derive(Debug, Error)]
pub enum AccountOpenProblem {
    #[error("account directory listing failed: {0}")]
    Listing(#[source] StorageError),

    #[error("account {id} is unreadable: {source}")]
    Unreadable {
        id: AccountId,
        #[source]
        source: StorageError,
    },

    #[error("account {id} has no descriptor")]
    MissingDescriptor { id: AccountId },

    #[error("account {id} uses provider {provider}, which is not available")]
    ProviderMissing { id: AccountId, provider: Url },

    #[error("account {id} has unreadable credentials: {source}")]
    Credentials {
        id: AccountId,
        #[source]
        source: StorageError,
    },

    #[error("account {id} has an unusable book database: {source}")]
    Books {
        id: AccountId,
        #[source]
        source: BookDatabaseError,
    },
}

fn join_problems(problems: &[AccountOpenProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Serialize, Deserialize)]
struct Descriptor {
    provider: Url,
}

/// A library card held by a profile
pub struct Account {
    id: AccountId,
    directory: PathBuf,
    provider: Arc<AccountProvider>,
    credentials: RwLock<Option<Credentials>>,
    books: BookDatabase,
}

impl Account {
    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn provider(&self) -> &Arc<AccountProvider> {
        &self.provider
    }

    /// Current credentials, if logged in
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The account's book database
    pub fn books(&self) -> &BookDatabase {
        &self.books
    }

    /// Persist new credentials, or remove them with `None`
    ///
    /// The in-memory value changes only once the disk write succeeded.
    pub fn set_credentials(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<(), AccountsDatabaseError> {
        let path = self.directory.join(CREDENTIALS_FILE);
        match &credentials {
            Some(value) => storage::write_json(&path, value)?,
            None => storage::remove_file(&path)?,
        }

        debug!(
            account = %self.id,
            logged_in = credentials.is_some(),
            "stored account credentials"
        );
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
        Ok(())
    }

    pub fn remove_credentials(&self) -> Result<(), AccountsDatabaseError> {
        self.set_credentials(None)
    }

    fn load(
        id: AccountId,
        directory: PathBuf,
        providers: &dyn AccountProviderRegistry,
    ) -> Result<Self, AccountOpenProblem> {
        let descriptor = storage::read_json_optional::<Descriptor>(&directory.join(DESCRIPTOR_FILE))
            .map_err(|source| AccountOpenProblem::Unreadable { id, source })?
            .ok_or(AccountOpenProblem::MissingDescriptor { id })?;

        let provider = providers.provider(&descriptor.provider).ok_or_else(|| {
            AccountOpenProblem::ProviderMissing {
                id,
                provider: descriptor.provider.clone(),
            }
        })?;

        let credentials = storage::read_json_optional(&directory.join(CREDENTIALS_FILE))
            .map_err(|source| AccountOpenProblem::Credentials { id, source })?;

        let books = BookDatabase::open(directory.join(BOOKS_DIR))
            .map_err(|source| AccountOpenProblem::Books { id, source })?;

        Ok(Self {
            id,
            directory,
            provider,
            credentials: RwLock::new(credentials),
            books,
        })
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("directory", &self.directory)
            .field("provider", &self.provider.id.as_str())
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

/// The accounts of one profile
#[derive(Debug)]
pub struct AccountsDatabase {
    directory: PathBuf,
    accounts: BTreeMap<AccountId, Arc<Account>>,
    high_water: Option<u64>,
}

impl AccountsDatabase {
    /// Open the accounts stored in `directory`
    ///
    /// Every account is checked; all problems are reported together.
    pub fn open(
        directory: impl Into<PathBuf>,
        providers: &dyn AccountProviderRegistry,
    ) -> Result<Self, AccountsDatabaseError> {
        let directory = directory.into();
        let entries = storage::numbered_subdirectories(&directory).map_err(|e| {
            AccountsDatabaseError::Open {
                path: directory.clone(),
                problems: vec![AccountOpenProblem::Listing(e)],
            }
        })?;

        let mut accounts = BTreeMap::new();
        let mut problems = Vec::new();
        for (raw_id, path) in entries {
            let id = AccountId::new(raw_id);
            match Account::load(id, path, providers) {
                Ok(account) => {
                    accounts.insert(id, Arc::new(account));
                }
                Err(problem) => problems.push(problem),
            }
        }

        if !problems.is_empty() {
            return Err(AccountsDatabaseError::Open {
                path: directory,
                problems,
            });
        }

        debug!(path = %directory.display(), count = accounts.len(), "opened accounts");
        let high_water = accounts.keys().map(|id| id.value()).max();
        Ok(Self {
            directory,
            accounts,
            high_water,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn accounts(&self) -> &BTreeMap<AccountId, Arc<Account>> {
        &self.accounts
    }

    pub fn account(&self, id: AccountId) -> Option<Arc<Account>> {
        self.accounts.get(&id).cloned()
    }

    /// The first account bound to a provider
    pub fn account_for_provider(&self, provider: &Url) -> Option<Arc<Account>> {
        self.accounts
            .values()
            .find(|account| &account.provider.id == provider)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Create an account bound to `provider`
    ///
    /// On failure the new directory is removed again and nothing is
    /// registered.
    pub fn create_account(
        &mut self,
        provider: Arc<AccountProvider>,
    ) -> Result<Arc<Account>, AccountsDatabaseError> {
        let raw_id = ids::allocate(self.accounts.keys().map(|id| id.value()), self.high_water);
        let id = AccountId::new(raw_id);
        let directory = self.directory.join(id.to_string());

        let account = match Self::provision(id, &directory, provider) {
            Ok(account) => Arc::new(account),
            Err(e) => {
                let _ = storage::remove_dir_all(&directory);
                return Err(e);
            }
        };

        self.high_water = Some(raw_id);
        self.accounts.insert(id, account.clone());
        info!(account = %id, provider = %account.provider.id, "created account");
        Ok(account)
    }

    fn provision(
        id: AccountId,
        directory: &Path,
        provider: Arc<AccountProvider>,
    ) -> Result<Account, AccountsDatabaseError> {
        storage::create_dir_all(directory)?;
        storage::write_json(
            &directory.join(DESCRIPTOR_FILE),
            &Descriptor {
                provider: provider.id.clone(),
            },
        )?;
        let books = BookDatabase::open(directory.join(BOOKS_DIR))?;
        Ok(Account {
            id,
            directory: directory.to_path_buf(),
            provider,
            credentials: RwLock::new(None),
            books,
        })
    }

    /// Delete an account with its credentials and books
    pub fn delete_account(&mut self, id: AccountId) -> Result<Arc<Account>, AccountsDatabaseError> {
        let account = self
            .accounts
            .get(&id)
            .cloned()
            .ok_or(AccountsDatabaseError::NotFound(id))?;

        account.books.destroy()?;
        storage::remove_dir_all(&account.directory)?;
        self.accounts.remove(&id);
        info!(account = %id, provider = %account.provider.id, "deleted account");
        Ok(account)
    }
}
