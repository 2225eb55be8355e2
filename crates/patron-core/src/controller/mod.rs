//! Asynchronous controller
//!
//! Every request returns a [`Pending`] immediately and runs as one unit of
//! work. Profile and account requests run one at a time on a serialized
//! queue. Borrows and revocations run on a bounded download pool.
//!
//! Each request ends with exactly one terminal event, published on the
//! matching bus; the [`Pending`] resolves to that same event.
//!
//! ## Usage
//!
//! ```ignore
//! let controller = Controller::open(&config)?;
//! let mut events = controller.account_events();
//!
//! let event = controller
//!     .account_login(LoginTarget::Current, Credentials::new("2355123", "1234"))
//!     .await?;
//! ```

mod accounts;
mod books;
mod borrow;
mod login;
mod profiles;
mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};
use url::Url;

use crate::accounts::{Account, AccountsDatabaseError};
use crate::books::{Acquisition, BookRegistry, BookStatus, BookStatusEvent, FeedEntry};
use crate::config::Config;
use crate::credentials::Credentials;
use crate::download::{DownloadHandle, Downloader, HttpDownloader};
use crate::drm::DrmConnector;
use crate::events::{AccountEvent, EventBus, ProfileEvent, Subscription};
use crate::http::{Http, ReqwestHttp};
use crate::ids::{AccountId, BookId, ProfileId};
use crate::profiles::{Preferences, ProfileDatabaseError, ProfilesDatabase};
use crate::provider::{AccountProvider, AccountProviderRegistry, StaticProviderRegistry};

pub use books::BookRequestError;
pub use borrow::ProgressThrottle;
pub use queue::{ControllerStopped, DownloadPool, Pending, TaskQueue};

/// Which account a login applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginTarget {
    /// The current account of the current profile
    Current,
    /// A specific account of the current profile
    Account(AccountId),
}

/// Everything the controller depends on
///
/// Passed in explicitly so tests can substitute any collaborator.
pub struct ControllerServices {
    pub profiles: ProfilesDatabase,
    pub providers: Arc<dyn AccountProviderRegistry>,
    pub http: Arc<dyn Http>,
    pub downloader: Arc<dyn Downloader>,
    /// Absent on builds without DRM support
    pub drm: Option<Arc<dyn DrmConnector>>,
    pub max_concurrent_downloads: usize,
}

struct InFlight {
    handle: DownloadHandle,
    account: Arc<Account>,
}

/// The account a book request was made for, captured at submission
///
/// Account ids are only unique within a profile, so the profile is kept
/// too. The request fails if that account is gone by the time it runs.
pub(crate) struct PinnedAccount {
    id: AccountId,
    target: Option<(ProfileId, Arc<Account>)>,
}

/// State shared between the controller and its running tasks
pub(crate) struct Inner {
    profiles: RwLock<ProfilesDatabase>,
    providers: Arc<dyn AccountProviderRegistry>,
    http: Arc<dyn Http>,
    downloader: Arc<dyn Downloader>,
    drm: Option<Arc<dyn DrmConnector>>,
    registry: Arc<BookRegistry>,
    profile_events: EventBus<ProfileEvent>,
    account_events: EventBus<AccountEvent>,
    in_flight: Mutex<HashMap<BookId, InFlight>>,
}

impl Inner {
    fn read_profiles(&self) -> RwLockReadGuard<'_, ProfilesDatabase> {
        self.profiles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_profiles(&self) -> RwLockWriteGuard<'_, ProfilesDatabase> {
        self.profiles.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<BookId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a login target within the current profile
    fn resolve(&self, target: LoginTarget) -> Result<Arc<Account>, ProfileDatabaseError> {
        let profiles = self.read_profiles();
        let profile = profiles
            .current_profile()
            .ok_or(ProfileDatabaseError::NoCurrentProfile)?;
        match target {
            LoginTarget::Current => Ok(profile.account_current().clone()),
            LoginTarget::Account(id) => profile
                .account(id)
                .ok_or_else(|| AccountsDatabaseError::NotFound(id).into()),
        }
    }

    /// Capture an account of the current profile for a book request
    fn pin_account(&self, id: AccountId) -> PinnedAccount {
        let profiles = self.read_profiles();
        let target = profiles
            .current_profile()
            .and_then(|profile| Some((profile.id(), profile.account(id)?)));
        PinnedAccount { id, target }
    }

    /// The pinned account, if its profile still holds it
    fn account(&self, pin: &PinnedAccount) -> Option<Arc<Account>> {
        let (profile, account) = pin.target.as_ref()?;
        self.read_profiles()
            .profile(*profile)
            .and_then(|p| p.account(pin.id))
            .filter(|current| Arc::ptr_eq(current, account))
    }

    fn publish_account(&self, event: AccountEvent) -> AccountEvent {
        self.account_events.publish(event.clone());
        event
    }

    fn publish_profile(&self, event: ProfileEvent) -> ProfileEvent {
        self.profile_events.publish(event.clone());
        event
    }

    /// Track a running download, replacing any older one for the book
    fn track(&self, book_id: &BookId, handle: DownloadHandle, account: Arc<Account>) {
        let previous = self
            .in_flight()
            .insert(book_id.clone(), InFlight { handle, account });
        if let Some(previous) = previous {
            debug!(book = %book_id.short(), "replacing in-flight download");
            previous.handle.cancel();
        }
    }

    /// Stop tracking `handle`, unless a newer download took its place
    fn untrack(&self, book_id: &BookId, handle: &DownloadHandle) {
        let mut in_flight = self.in_flight();
        if in_flight
            .get(book_id)
            .is_some_and(|entry| entry.handle.same_as(handle))
        {
            in_flight.remove(book_id);
        }
    }

    /// Stop tracking and cancel the download of a book
    fn cancel_download(&self, book_id: &BookId) -> Option<Arc<Account>> {
        let entry = self.in_flight().remove(book_id)?;
        entry.handle.cancel();
        Some(entry.account)
    }

    /// Cancel every download made for `account`
    fn cancel_downloads_of(&self, account: &Arc<Account>) -> Vec<BookId> {
        let mut in_flight = self.in_flight();
        let books: Vec<BookId> = in_flight
            .iter()
            .filter(|(_, entry)| Arc::ptr_eq(&entry.account, account))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &books {
            if let Some(entry) = in_flight.remove(id) {
                entry.handle.cancel();
            }
        }
        books
    }
}

/// Status of a book as recorded in its account's database
fn stored_status(account: &Account, book_id: &BookId) -> BookStatus {
    match account.books().book(book_id) {
        Ok(Some(record)) if record.is_downloaded() => BookStatus::Downloaded,
        _ => BookStatus::Idle,
    }
}

/// Front door for every profile, account and book request
pub struct Controller {
    inner: Arc<Inner>,
    queue: TaskQueue,
    downloads: DownloadPool,
}

impl Controller {
    /// Start a controller. Must be called inside a tokio runtime.
    pub fn new(services: ControllerServices) -> Self {
        let ControllerServices {
            profiles,
            providers,
            http,
            downloader,
            drm,
            max_concurrent_downloads,
        } = services;

        info!(
            mode = %profiles.mode(),
            profiles = profiles.profiles().len(),
            drm = drm.is_some(),
            "controller started"
        );
        Self {
            inner: Arc::new(Inner {
                profiles: RwLock::new(profiles),
                providers,
                http,
                downloader,
                drm,
                registry: Arc::new(BookRegistry::new()),
                profile_events: EventBus::new(),
                account_events: EventBus::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
            queue: TaskQueue::start(),
            downloads: DownloadPool::new(max_concurrent_downloads),
        }
    }

    /// Wire up the default collaborators described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let providers: Arc<dyn AccountProviderRegistry> = match &config.providers_file {
            Some(path) => Arc::new(StaticProviderRegistry::load_from_path(
                path,
                config.default_provider.as_ref(),
            )?),
            None => Arc::new(StaticProviderRegistry::builtin()?),
        };

        let http = ReqwestHttp::new(config.http_timeout())?;
        let downloader = HttpDownloader::new(http.client().clone(), config.temp_dir())
            .context("Failed to prepare download directory")?;
        let profiles = ProfilesDatabase::open(
            config.profiles_dir(),
            config.profiles_mode,
            providers.as_ref(),
        )
        .context("Failed to open profiles")?;

        Ok(Self::new(ControllerServices {
            profiles,
            providers,
            http: Arc::new(http),
            downloader: Arc::new(downloader),
            drm: None,
            max_concurrent_downloads: config.max_concurrent_downloads,
        }))
    }

    pub fn profile_events(&self) -> Subscription<ProfileEvent> {
        self.inner.profile_events.subscribe()
    }

    pub fn account_events(&self) -> Subscription<AccountEvent> {
        self.inner.account_events.subscribe()
    }

    pub fn book_events(&self) -> Subscription<BookStatusEvent> {
        self.inner.registry.subscribe()
    }

    pub fn book_registry(&self) -> &Arc<BookRegistry> {
        &self.inner.registry
    }

    pub fn providers(&self) -> &Arc<dyn AccountProviderRegistry> {
        &self.inner.providers
    }

    /// Read access to the profile store
    ///
    /// `f` runs under the store's read lock; it must not call back into
    /// the controller.
    pub fn with_profiles<R>(&self, f: impl FnOnce(&ProfilesDatabase) -> R) -> R {
        f(&self.inner.read_profiles())
    }

    /// Books with a download in progress
    pub fn downloads_in_flight(&self) -> Vec<BookId> {
        let mut books: Vec<BookId> = self.inner.in_flight().keys().cloned().collect();
        books.sort();
        books
    }

    pub fn profile_create(
        &self,
        provider: Arc<AccountProvider>,
        display_name: impl Into<String>,
        date_of_birth: Option<NaiveDate>,
    ) -> Pending<ProfileEvent> {
        let inner = Arc::clone(&self.inner);
        let display_name = display_name.into();
        self.queue.submit(async move {
            profiles::create(&inner, provider, display_name, date_of_birth)
        })
    }

    pub fn profile_select(&self, id: ProfileId) -> Pending<Result<(), ProfileDatabaseError>> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { profiles::select(&inner, id) })
    }

    /// Replace the preferences of the current profile
    pub fn profile_update_preferences(
        &self,
        preferences: Preferences,
    ) -> Pending<Result<(), ProfileDatabaseError>> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { profiles::update_preferences(&inner, preferences) })
    }

    pub fn account_create(&self, provider: Url) -> Pending<AccountEvent> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { accounts::create(&inner, provider) })
    }

    pub fn account_delete_by_provider(&self, provider: Url) -> Pending<AccountEvent> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { accounts::delete_by_provider(&inner, provider) })
    }

    pub fn account_select_by_provider(&self, provider: Url) -> Pending<AccountEvent> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { accounts::select_by_provider(&inner, provider) })
    }

    pub fn account_login(
        &self,
        target: LoginTarget,
        credentials: Credentials,
    ) -> Pending<AccountEvent> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { login::login(&inner, target, credentials).await })
    }

    /// Log out the current account of the current profile
    pub fn account_logout(&self) -> Pending<AccountEvent> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { login::logout(&inner).await })
    }

    /// Borrow a book and download it
    ///
    /// `account` names an account of the profile current at the time of
    /// the call. `RequestingLoan` is published before this returns.
    pub fn book_borrow(
        &self,
        book_id: BookId,
        account: AccountId,
        acquisition: Acquisition,
        entry: FeedEntry,
    ) -> Pending<BookStatus> {
        self.inner
            .registry
            .update(&book_id, BookStatus::RequestingLoan);
        let account = self.inner.pin_account(account);
        let inner = Arc::clone(&self.inner);
        self.downloads.submit(async move {
            borrow::borrow(&inner, book_id, account, acquisition, entry).await
        })
    }

    /// Return a book early
    ///
    /// `RequestingRevoke` is published before this returns.
    pub fn book_revoke(&self, book_id: BookId, account: AccountId) -> Pending<BookStatus> {
        self.inner
            .registry
            .update(&book_id, BookStatus::RequestingRevoke);
        let account = self.inner.pin_account(account);
        let inner = Arc::clone(&self.inner);
        self.downloads
            .submit(async move { books::revoke(&inner, book_id, account).await })
    }

    /// Delete a book from an account and forget its status
    pub fn book_delete(
        &self,
        book_id: BookId,
        account: AccountId,
    ) -> Pending<Result<(), BookRequestError>> {
        let account = self.inner.pin_account(account);
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(async move { books::delete(&inner, book_id, account) })
    }

    /// Cancel the download of a book
    ///
    /// Resolves to the status the book reverted to, or `None` when no
    /// download was running.
    pub fn book_download_cancel(&self, book_id: BookId) -> Pending<Option<BookStatus>> {
        Pending::ready(books::cancel(&self.inner, &book_id))
    }
}
