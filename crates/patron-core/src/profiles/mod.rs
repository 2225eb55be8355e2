//! Profile store
//!
//! ```text
//! <profiles-root>/<profileID>/profile.json
//! <profiles-root>/<profileID>/<accountID>/...
//! ```
//!
//! In anonymous mode the store holds exactly one profile, id 0, which is
//! always current. In multi-profile mode profiles are created by name and
//! no profile is current until one is selected.

pub mod preferences;
pub mod profile;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::accounts::AccountsDatabaseError;
use crate::ids::{self, AccountId, ProfileId};
use crate::provider::{AccountProvider, AccountProviderRegistry};
use crate::storage::{self, StorageError};

pub use preferences::{ColorScheme, FontFamily, Preferences, ReaderPreferences};
pub use profile::{AccountDeletion, Profile};

/// How the profile store is used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilesMode {
    /// One implicit profile
    #[default]
    Anonymous,
    /// Named profiles chosen by the user
    Multi,
}

impl fmt::Display for ProfilesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfilesMode::Anonymous => write!(f, "anonymous"),
            ProfilesMode::Multi => write!(f, "multi"),
        }
    }
}

impl FromStr for ProfilesMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anonymous" => Ok(ProfilesMode::Anonymous),
            "multi" => Ok(ProfilesMode::Multi),
            _ => Err(format!(
                "Invalid profiles mode: {}. Use 'anonymous' or 'multi'",
                s
            )),
        }
    }
}

/// Errors raised by the profile store
#[derive(Debug, Error)]
pub enum ProfileDatabaseError {
    #[error("Failed to open profiles in '{path}': {}", join_problems(.problems))]
    Open {
        path: PathBuf,
        problems: Vec<ProfileOpenProblem>,
    },

    #[error("A profile named '{0}' already exists")]
    DuplicateName(String),

    #[error("Profiles cannot be created or selected in anonymous mode")]
    AnonymousProfileEnabled,

    #[error("Profile {0} does not exist")]
    ProfileNotFound(ProfileId),

    #[error("No profile is selected")]
    NoCurrentProfile,

    #[error("No account uses provider {0}")]
    NoAccountForProvider(Url),

    #[error("An account for provider {0} already exists")]
    AccountAlreadyExists(Url),

    #[error("The last account of a profile cannot be deleted")]
    OnlyOneRemaining,

    #[error(transparent)]
    Accounts(#[from] AccountsDatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One problem found while opening the profile store
#[derive(Debug, Error)]
pub enum ProfileOpenProblem {
    #[error("profile directory listing failed: {0}")]
    Listing(#[source] StorageError),

    #[error("profile {id} is unreadable: {source}")]
    Unreadable {
        id: ProfileId,
        #[source]
        source: StorageError,
    },

    #[error("profile {id} has no description")]
    MissingDescription { id: ProfileId },

    #[error("profile {id}: {source}")]
    Accounts {
        id: ProfileId,
        #[source]
        source: AccountsDatabaseError,
    },

    #[error("profile {id} has no accounts")]
    NoAccounts { id: ProfileId },

    #[error("profile {id} refers to missing current account {account}")]
    CurrentAccountMissing { id: ProfileId, account: AccountId },

    #[error("anonymous profile could not be created: {0}")]
    Anonymous(#[source] Box<ProfileDatabaseError>),
}

fn join_problems(problems: &[ProfileOpenProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// All profiles on this device
#[derive(Debug)]
pub struct ProfilesDatabase {
    directory: PathBuf,
    mode: ProfilesMode,
    profiles: BTreeMap<ProfileId, Profile>,
    current: Option<ProfileId>,
    high_water: Option<u64>,
}

impl ProfilesDatabase {
    /// Open the store in `directory`
    ///
    /// Every profile is checked and all problems are reported together. In
    /// anonymous mode a missing anonymous profile is created with one
    /// account for the default provider.
    pub fn open(
        directory: impl Into<PathBuf>,
        mode: ProfilesMode,
        providers: &dyn AccountProviderRegistry,
    ) -> Result<Self, ProfileDatabaseError> {
        let directory = directory.into();
        storage::create_dir_all(&directory)?;

        let entries = storage::numbered_subdirectories(&directory).map_err(|e| {
            ProfileDatabaseError::Open {
                path: directory.clone(),
                problems: vec![ProfileOpenProblem::Listing(e)],
            }
        })?;

        let anonymous_id = ProfileId::first();
        let mut profiles = BTreeMap::new();
        let mut problems = Vec::new();
        for (raw_id, path) in entries {
            let id = ProfileId::new(raw_id);
            if mode == ProfilesMode::Anonymous && id != anonymous_id {
                continue;
            }
            match Profile::load(id, path, providers) {
                Ok(profile) => {
                    profiles.insert(id, profile);
                }
                Err(problem) => problems.push(problem),
            }
        }

        if !problems.is_empty() {
            return Err(ProfileDatabaseError::Open {
                path: directory,
                problems,
            });
        }

        let mut current = None;
        if mode == ProfilesMode::Anonymous {
            if !profiles.contains_key(&anonymous_id) {
                let profile = Profile::provision(
                    anonymous_id,
                    directory.join(anonymous_id.to_string()),
                    String::new(),
                    Preferences::default(),
                    providers.default_provider(),
                    providers,
                )
                .map_err(|e| ProfileDatabaseError::Open {
                    path: directory.clone(),
                    problems: vec![ProfileOpenProblem::Anonymous(Box::new(e))],
                })?;
                info!("created anonymous profile");
                profiles.insert(anonymous_id, profile);
            }
            current = Some(anonymous_id);
        }

        debug!(
            path = %directory.display(),
            %mode,
            count = profiles.len(),
            "opened profiles"
        );
        let high_water = profiles.keys().map(|id| id.value()).max();
        Ok(Self {
            directory,
            mode,
            profiles,
            current,
            high_water,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn mode(&self) -> ProfilesMode {
        self.mode
    }

    pub fn profiles(&self) -> &BTreeMap<ProfileId, Profile> {
        &self.profiles
    }

    pub fn profile(&self, id: ProfileId) -> Option<&Profile> {
        self.profiles.get(&id)
    }

    /// Id of the current profile
    pub fn current(&self) -> Option<ProfileId> {
        self.current
    }

    pub fn current_profile(&self) -> Option<&Profile> {
        self.current.and_then(|id| self.profiles.get(&id))
    }

    pub fn current_profile_mut(&mut self) -> Option<&mut Profile> {
        self.current.and_then(|id| self.profiles.get_mut(&id))
    }

    /// Create a named profile with one account for `provider`
    ///
    /// Names are compared exactly. Nothing touches the disk when the name
    /// is taken.
    pub fn create_profile(
        &mut self,
        provider: Arc<AccountProvider>,
        display_name: &str,
        date_of_birth: Option<NaiveDate>,
        providers: &dyn AccountProviderRegistry,
    ) -> Result<ProfileId, ProfileDatabaseError> {
        if self.mode == ProfilesMode::Anonymous {
            return Err(ProfileDatabaseError::AnonymousProfileEnabled);
        }
        if self
            .profiles
            .values()
            .any(|p| p.display_name() == display_name)
        {
            return Err(ProfileDatabaseError::DuplicateName(display_name.to_string()));
        }

        let raw_id = ids::allocate(self.profiles.keys().map(|id| id.value()), self.high_water);
        let id = ProfileId::new(raw_id);
        let directory = self.directory.join(id.to_string());

        let profile = match Profile::provision(
            id,
            directory.clone(),
            display_name.to_string(),
            Preferences::default().with_date_of_birth(date_of_birth),
            provider,
            providers,
        ) {
            Ok(profile) => profile,
            Err(e) => {
                let _ = storage::remove_dir_all(&directory);
                return Err(e);
            }
        };

        self.high_water = Some(raw_id);
        self.profiles.insert(id, profile);
        info!(profile = %id, name = %display_name, "created profile");
        Ok(id)
    }

    /// Make a profile current
    pub fn set_current(&mut self, id: ProfileId) -> Result<(), ProfileDatabaseError> {
        if self.mode == ProfilesMode::Anonymous {
            return Err(ProfileDatabaseError::AnonymousProfileEnabled);
        }
        if !self.profiles.contains_key(&id) {
            return Err(ProfileDatabaseError::ProfileNotFound(id));
        }
        self.current = Some(id);
        debug!(profile = %id, "selected profile");
        Ok(())
    }
}
