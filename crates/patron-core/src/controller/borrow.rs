//! Borrowing and downloading books
//!
//! A borrow stores the feed entry, downloads the acquisition, and stores
//! the result. A payload typed as an ACSM token goes through the DRM
//! connector first and the loan it returns is recorded with the book.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tempfile::TempPath;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{stored_status, Inner, PinnedAccount};
use crate::accounts::Account;
use crate::books::feed::{is_content_type, ADOBE_ACSM_CONTENT_TYPE};
use crate::books::{
    Acquisition, BookDatabaseError, BookRegistry, BookStatus, BorrowError, FeedEntry, FetchStage,
};
use crate::credentials::AdobeCredentials;
use crate::download::{DownloadHandle, DownloadListener, DownloadRequest};
use crate::ids::BookId;
use crate::storage;

/// Progress step used when the size of a download is unknown
const UNKNOWN_TOTAL_STEP: u64 = 1024 * 1024;

/// Limits how often download progress is published
///
/// Progress is published at zero bytes and then each time the download
/// advanced by a tenth of its total since the last publication.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last: Option<u64>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether progress at `running` bytes should be published
    pub fn should_publish(&mut self, running: u64, total: Option<u64>) -> bool {
        let step = total.map_or(UNKNOWN_TOTAL_STEP, |total| total / 10).max(1);
        let publish = running == 0
            || self
                .last
                .map_or(true, |last| running.saturating_sub(last) >= step);
        if publish {
            self.last = Some(running);
        }
        publish
    }
}

enum Outcome {
    Completed {
        file: TempPath,
        content_type: Option<String>,
    },
    Failed {
        status: Option<u16>,
        running: u64,
        cause: anyhow::Error,
    },
    Cancelled,
}

/// How a borrow ended, when it did not fail
enum Completion {
    Downloaded,
    /// Status to report; the canceller already published it
    Cancelled(BookStatus),
}

struct BorrowListener {
    book_id: BookId,
    registry: Arc<BookRegistry>,
    throttle: Mutex<ProgressThrottle>,
    outcome: Mutex<Option<oneshot::Sender<Outcome>>>,
    /// Set once the download has started; progress stops after cancellation
    handle: OnceLock<DownloadHandle>,
}

impl BorrowListener {
    fn finish(&self, outcome: Outcome) {
        let sender = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

impl DownloadListener for BorrowListener {
    fn started(&self, expected_total: Option<u64>) {
        debug!(book = %self.book_id.short(), ?expected_total, "download started");
    }

    fn data_received(&self, running: u64, expected_total: Option<u64>) {
        if self.handle.get().is_some_and(DownloadHandle::is_cancelled) {
            return;
        }
        let publish = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_publish(running, expected_total);
        if publish {
            self.registry.update(
                &self.book_id,
                BookStatus::Downloading {
                    running,
                    total: expected_total,
                },
            );
        }
    }

    fn completed(&self, file: TempPath, content_type: Option<String>) {
        self.finish(Outcome::Completed { file, content_type });
    }

    fn failed(&self, status: Option<u16>, running: u64, cause: anyhow::Error) {
        self.finish(Outcome::Failed {
            status,
            running,
            cause,
        });
    }

    fn cancelled(&self) {
        self.finish(Outcome::Cancelled);
    }
}

fn database_error(e: BookDatabaseError) -> BorrowError {
    BorrowError::Database {
        message: e.to_string(),
    }
}

pub(super) async fn borrow(
    inner: &Inner,
    book_id: BookId,
    account: PinnedAccount,
    acquisition: Acquisition,
    entry: FeedEntry,
) -> BookStatus {
    match run(inner, &book_id, &account, &acquisition, &entry).await {
        Ok(Completion::Downloaded) => {
            info!(book = %book_id.short(), title = %entry.title, "book downloaded");
            inner.registry.update(&book_id, BookStatus::Downloaded);
            BookStatus::Downloaded
        }
        Ok(Completion::Cancelled(status)) => {
            debug!(book = %book_id.short(), "borrow cancelled");
            status
        }
        Err(error) => {
            warn!(book = %book_id.short(), "borrow failed: {}", error);
            let status = BookStatus::DownloadFailed { error };
            inner.registry.update(&book_id, status.clone());
            status
        }
    }
}

async fn run(
    inner: &Inner,
    book_id: &BookId,
    pin: &PinnedAccount,
    acquisition: &Acquisition,
    entry: &FeedEntry,
) -> Result<Completion, BorrowError> {
    let account = inner
        .account(pin)
        .ok_or(BorrowError::AccountNotFound { account: pin.id })?;

    // Borrow, buy, sample and subscribe links need a remote loan first
    if !acquisition.kind.is_direct() {
        return Err(BorrowError::UnsupportedAcquisition {
            acquisition: acquisition.kind,
        });
    }

    if entry.book_id() != *book_id {
        return Err(BorrowError::Database {
            message: format!("feed entry '{}' does not belong to book {}", entry.id, book_id),
        });
    }
    account
        .books()
        .create_or_update(entry)
        .map_err(database_error)?;
    inner.registry.update(book_id, BookStatus::Fulfilling);

    let (tx, rx) = oneshot::channel();
    let listener = Arc::new(BorrowListener {
        book_id: book_id.clone(),
        registry: Arc::clone(&inner.registry),
        throttle: Mutex::new(ProgressThrottle::new()),
        outcome: Mutex::new(Some(tx)),
        handle: OnceLock::new(),
    });
    let request = DownloadRequest {
        uri: acquisition.uri.clone(),
        auth: account.credentials().map(|c| c.http_auth()),
    };

    let handle = inner.downloader.download(request, listener.clone());
    let _ = listener.handle.set(handle.clone());
    inner.track(book_id, handle.clone(), Arc::clone(&account));
    let outcome = rx.await;
    inner.untrack(book_id, &handle);

    let stage = if acquisition.yields_drm_token() {
        FetchStage::DrmToken
    } else {
        FetchStage::Artifact
    };

    match outcome {
        Ok(Outcome::Completed { file, content_type }) => {
            store(inner, &account, book_id, acquisition, file, content_type).await?;
            Ok(Completion::Downloaded)
        }
        Ok(Outcome::Failed {
            status,
            running,
            cause,
        }) => Err(BorrowError::Fetch {
            stage,
            status,
            running,
            message: format!("{:#}", cause),
        }),
        Ok(Outcome::Cancelled) => Ok(Completion::Cancelled(stored_status(&account, book_id))),
        Err(_) => Err(BorrowError::Fetch {
            stage,
            status: None,
            running: 0,
            message: "the download ended without a result".to_string(),
        }),
    }
}

/// Store a finished download, fulfilling it first if it is a DRM token
async fn store(
    inner: &Inner,
    account: &Account,
    book_id: &BookId,
    acquisition: &Acquisition,
    file: TempPath,
    content_type: Option<String>,
) -> Result<(), BorrowError> {
    let content_type = content_type.or_else(|| acquisition.content_type.clone());
    let is_token = content_type
        .as_deref()
        .is_some_and(|t| is_content_type(t, ADOBE_ACSM_CONTENT_TYPE));

    if !is_token {
        account
            .books()
            .write_artifact(book_id, &file)
            .map_err(database_error)?;
        return Ok(());
    }

    let drm = inner.drm.as_ref().ok_or(BorrowError::DrmUnsupported)?;
    let adobe = account
        .credentials()
        .and_then(|c| c.adobe_credentials().cloned())
        .filter(AdobeCredentials::is_activated)
        .ok_or(BorrowError::DrmNotActivated)?;

    inner.registry.update(book_id, BookStatus::Fulfilling);
    let fulfillment = drm
        .fulfill(&file, &adobe)
        .await
        .map_err(|e| BorrowError::DrmFulfillment {
            message: format!("{:#}", e),
        })?;

    account
        .books()
        .write_artifact(book_id, &fulfillment.file)
        .map_err(database_error)?;
    account
        .books()
        .set_loan(book_id, Some(fulfillment.loan))
        .map_err(database_error)?;
    if let Err(e) = storage::remove_file(&fulfillment.file) {
        debug!("could not remove fulfilled file: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::feed::EPUB_CONTENT_TYPE;
    use crate::books::{AcquisitionType, BookStatusEvent};
    use crate::events::AccountEvent;
    use crate::controller::{Controller, LoginTarget, Pending};
    use crate::credentials::{Credentials, DrmLicensor};
    use crate::ids::AccountId;
    use crate::profiles::ProfilesMode;
    use crate::test_support::{self, DownloadScript, Harness};
    use url::Url;

    #[test]
    fn test_throttle_known_total() {
        let mut throttle = ProgressThrottle::new();
        let published: Vec<u64> = (0..=20u64)
            .map(|i| i * 50)
            .filter(|&running| throttle.should_publish(running, Some(1000)))
            .collect();
        assert_eq!(
            published,
            vec![0, 100, 200, 300, 400, 500, 600, 700, 800, 900, 1000]
        );
    }

    #[test]
    fn test_throttle_unknown_total() {
        let mut throttle = ProgressThrottle::new();
        assert!(throttle.should_publish(0, None));
        assert!(!throttle.should_publish(UNKNOWN_TOTAL_STEP - 1, None));
        assert!(throttle.should_publish(UNKNOWN_TOTAL_STEP, None));
    }

    #[test]
    fn test_throttle_tiny_total() {
        let mut throttle = ProgressThrottle::new();
        assert!(throttle.should_publish(0, Some(5)));
        assert!(throttle.should_publish(1, Some(5)));
    }

    fn downloading_events(events: &[BookStatusEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|event| match event {
                BookStatusEvent::Changed {
                    status: BookStatus::Downloading { running, .. },
                    ..
                } => Some(*running),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_open_access_borrow() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let entry = test_support::feed_entry("urn:book:1");
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        harness.downloader.script(
            &acquisition.uri,
            DownloadScript::Complete {
                chunks: vec![100; 10],
                total: Some(1000),
                content_type: Some(EPUB_CONTENT_TYPE.to_string()),
            },
        );
        let mut events = controller.book_events();

        let status = controller
            .book_borrow(entry.book_id(), account, acquisition, entry.clone())
            .await
            .unwrap();
        assert_eq!(status, BookStatus::Downloaded);

        let events = events.drain();
        assert_eq!(
            events.first(),
            Some(&BookStatusEvent::Changed {
                book_id: entry.book_id(),
                status: BookStatus::RequestingLoan
            })
        );
        let progress = downloading_events(&events);
        assert_eq!(progress[0], 0);
        assert!(progress.iter().any(|&running| running >= 100));
        assert!(progress.len() - 1 <= 10);

        let record = controller.with_profiles(|p| {
            p.current_profile()
                .unwrap()
                .account(account)
                .unwrap()
                .books()
                .book(&entry.book_id())
                .unwrap()
                .unwrap()
        });
        assert!(record.is_downloaded());
        assert_eq!(std::fs::read(record.artifact.unwrap()).unwrap().len(), 1000);
        assert!(controller.downloads_in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_keeps_stage() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let entry = test_support::feed_entry("urn:book:1");
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        harness
            .downloader
            .script(&acquisition.uri, DownloadScript::Fail { status: Some(404) });

        let status = controller
            .book_borrow(entry.book_id(), account, acquisition, entry.clone())
            .await
            .unwrap();

        let BookStatus::DownloadFailed {
            error: BorrowError::Fetch { stage, status, .. },
        } = status
        else {
            panic!("unexpected status: {}", status);
        };
        assert_eq!(stage, FetchStage::Artifact);
        assert_eq!(status, Some(404));
        assert!(controller.downloads_in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_loan_acquisitions_are_unsupported() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let acquisition = Acquisition::new(
            AcquisitionType::Borrow,
            Url::parse("https://library.example/borrow/1").unwrap(),
        );
        let entry = test_support::feed_entry("urn:book:1").with_acquisition(acquisition.clone());

        let status = controller
            .book_borrow(entry.book_id(), account, acquisition, entry)
            .await
            .unwrap();
        assert!(matches!(
            status,
            BookStatus::DownloadFailed {
                error: BorrowError::UnsupportedAcquisition {
                    acquisition: AcquisitionType::Borrow
                }
            }
        ));
        assert!(harness.downloader.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let entry = test_support::feed_entry("urn:book:1");
        let acquisition = entry.preferred_acquisition().unwrap().clone();

        let status = harness
            .controller
            .book_borrow(entry.book_id(), AccountId::new(9), acquisition, entry)
            .await
            .unwrap();
        assert!(matches!(
            status,
            BookStatus::DownloadFailed {
                error: BorrowError::AccountNotFound { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_drm_token_without_connector() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let (entry, acquisition) = test_support::acsm_entry("urn:book:drm");

        let status = controller
            .book_borrow(entry.book_id(), account, acquisition, entry)
            .await
            .unwrap();
        assert!(matches!(
            status,
            BookStatus::DownloadFailed {
                error: BorrowError::DrmUnsupported
            }
        ));
    }

    #[tokio::test]
    async fn test_drm_token_without_activation() {
        let harness = Harness::with_drm(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let (entry, acquisition) = test_support::acsm_entry("urn:book:drm");

        let status = controller
            .book_borrow(entry.book_id(), account, acquisition, entry)
            .await
            .unwrap();
        assert!(matches!(
            status,
            BookStatus::DownloadFailed {
                error: BorrowError::DrmNotActivated
            }
        ));
    }

    #[tokio::test]
    async fn test_drm_fulfillment_records_loan() {
        let harness = Harness::with_drm(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);

        let credentials = Credentials::new("guest", "")
            .with_adobe_credentials(Some(AdobeCredentials::pre_activation(
                "NYPL",
            )))
            .with_drm_licensor(DrmLicensor {
                vendor: "NYPL".to_string(),
                client_token: "token".to_string(),
                device_manager_url: None,
            });
        controller
            .account_login(LoginTarget::Current, credentials)
            .await
            .unwrap();

        let (entry, acquisition) = test_support::acsm_entry("urn:book:drm");
        let status = controller
            .book_borrow(entry.book_id(), account, acquisition, entry.clone())
            .await
            .unwrap();
        assert_eq!(status, BookStatus::Downloaded);

        let record = controller.with_profiles(|p| {
            p.current_profile()
                .unwrap()
                .account(account)
                .unwrap()
                .books()
                .book(&entry.book_id())
                .unwrap()
                .unwrap()
        });
        assert!(record.is_downloaded());
        assert_eq!(record.loan.unwrap().vendor, "NYPL");
        assert_eq!(harness.drm().fulfillments(), 1);
    }

    #[tokio::test]
    async fn test_cancel_reverts_status() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let entry = test_support::feed_entry("urn:book:1");
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        harness
            .downloader
            .script(&acquisition.uri, DownloadScript::Hang);

        let pending = controller.book_borrow(entry.book_id(), account, acquisition, entry.clone());
        test_support::wait_for_in_flight(controller, &entry.book_id()).await;

        let reverted = controller
            .book_download_cancel(entry.book_id())
            .await
            .unwrap();
        assert_eq!(reverted, Some(BookStatus::Idle));
        assert_eq!(pending.await.unwrap(), BookStatus::Idle);
        assert_eq!(
            controller.book_registry().get(&entry.book_id()),
            Some(BookStatus::Idle)
        );
        assert!(controller.downloads_in_flight().is_empty());

        // Nothing left to cancel
        assert_eq!(
            controller
                .book_download_cancel(entry.book_id())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_newer_borrow_replaces_older() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let entry = test_support::feed_entry("urn:book:1");
        let book = entry.book_id();
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        harness
            .downloader
            .script(&acquisition.uri, DownloadScript::Hang);

        let older = controller.book_borrow(book.clone(), account, acquisition.clone(), entry.clone());
        test_support::wait_for_in_flight(controller, &book).await;
        let newer = controller.book_borrow(book.clone(), account, acquisition, entry);

        // The older download is cancelled once the newer one is tracked
        assert_eq!(older.await.unwrap(), BookStatus::Idle);
        assert_eq!(controller.downloads_in_flight(), vec![book.clone()]);

        assert_eq!(
            controller.book_download_cancel(book.clone()).await.unwrap(),
            Some(BookStatus::Idle)
        );
        assert_eq!(newer.await.unwrap(), BookStatus::Idle);
        assert!(controller.downloads_in_flight().is_empty());
    }

    /// Occupy a pool slot with a download that runs until cancelled
    async fn hold_pool_slot(
        harness: &Harness,
        account: AccountId,
    ) -> (BookId, Pending<BookStatus>) {
        let entry = test_support::feed_entry("urn:book:blocker");
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        harness
            .downloader
            .script(&acquisition.uri, DownloadScript::Hang);
        let pending = harness.controller.book_borrow(
            entry.book_id(),
            account,
            acquisition,
            entry.clone(),
        );
        test_support::wait_for_in_flight(&harness.controller, &entry.book_id()).await;
        (entry.book_id(), pending)
    }

    fn queue_borrow(controller: &Controller, account: AccountId, id: &str) -> (BookId, Pending<BookStatus>) {
        let entry = test_support::feed_entry(id);
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        let pending = controller.book_borrow(entry.book_id(), account, acquisition, entry.clone());
        (entry.book_id(), pending)
    }

    #[tokio::test]
    async fn test_borrow_stays_with_requesting_profile() {
        let harness = Harness::with_pool(ProfilesMode::Multi, 1);
        let controller = &harness.controller;
        let first = test_support::create_profile(controller, "Kermit").await;
        let second = test_support::create_profile(controller, "Gonzo").await;
        controller.profile_select(first).await.unwrap().unwrap();
        let account = test_support::current_account(controller);

        let (blocker, blocked) = hold_pool_slot(&harness, account).await;
        let (book, pending) = queue_borrow(controller, account, "urn:book:1");

        // Both profiles have an account with this id
        controller.profile_select(second).await.unwrap().unwrap();
        assert_eq!(test_support::current_account(controller), account);

        controller.book_download_cancel(blocker).await.unwrap();
        assert_eq!(blocked.await.unwrap(), BookStatus::Idle);
        assert_eq!(pending.await.unwrap(), BookStatus::Downloaded);

        assert!(test_support::holds_book(controller, first, account, &book));
        assert!(!test_support::holds_book(controller, second, account, &book));
    }

    #[tokio::test]
    async fn test_borrow_for_account_deleted_while_queued() {
        let harness = Harness::with_pool(ProfilesMode::Anonymous, 1);
        let controller = &harness.controller;
        let current = test_support::current_account(controller);
        let library = test_support::auth_provider_id();
        let AccountEvent::AccountCreationSucceeded { account, .. } =
            controller.account_create(library.clone()).await.unwrap()
        else {
            panic!("account creation failed");
        };

        let (blocker, blocked) = hold_pool_slot(&harness, current).await;
        let (_, pending) = queue_borrow(controller, account, "urn:book:1");
        let event = controller.account_delete_by_provider(library).await.unwrap();
        assert!(!event.is_failure());

        controller.book_download_cancel(blocker).await.unwrap();
        blocked.await.unwrap();
        assert_eq!(
            pending.await.unwrap(),
            BookStatus::DownloadFailed {
                error: BorrowError::AccountNotFound { account }
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_borrows_of_one_book() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);
        let entry = test_support::feed_entry("urn:book:1");
        let book = entry.book_id();
        let acquisition = entry.preferred_acquisition().unwrap().clone();
        harness.downloader.script(
            &acquisition.uri,
            DownloadScript::Complete {
                chunks: vec![256; 4],
                total: Some(1024),
                content_type: Some(EPUB_CONTENT_TYPE.to_string()),
            },
        );

        for _ in 0..25 {
            let pending: Vec<_> = (0..4)
                .map(|_| {
                    controller.book_borrow(
                        book.clone(),
                        account,
                        acquisition.clone(),
                        entry.clone(),
                    )
                })
                .collect();
            for pending in pending {
                let status = pending.await.unwrap();
                assert!(
                    matches!(status, BookStatus::Downloaded | BookStatus::Idle),
                    "unexpected status: {}",
                    status
                );
            }
            assert!(controller.downloads_in_flight().is_empty());
        }

        assert!(test_support::holds_book(
            controller,
            controller.with_profiles(|p| p.current().unwrap()),
            account,
            &book
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_racing_borrow_leaves_nothing_in_flight() {
        let harness = Harness::new(ProfilesMode::Anonymous);
        let controller = &harness.controller;
        let account = test_support::current_account(controller);

        for round in 0..60u32 {
            let entry = test_support::feed_entry(&format!("urn:book:{}", round));
            let book = entry.book_id();
            let acquisition = entry.preferred_acquisition().unwrap().clone();

            match round % 3 {
                // Cancel right away, usually before the download is tracked
                0 => {
                    let pending =
                        controller.book_borrow(book.clone(), account, acquisition, entry);
                    controller.book_download_cancel(book.clone()).await.unwrap();
                    let status = pending.await.unwrap();
                    assert!(
                        matches!(status, BookStatus::Downloaded | BookStatus::Idle),
                        "unexpected status: {}",
                        status
                    );
                }
                // Cancel during the transfer
                1 => {
                    harness
                        .downloader
                        .script(&acquisition.uri, DownloadScript::Hang);
                    let pending =
                        controller.book_borrow(book.clone(), account, acquisition, entry);
                    test_support::wait_for_in_flight(controller, &book).await;
                    assert_eq!(
                        controller.book_download_cancel(book.clone()).await.unwrap(),
                        Some(BookStatus::Idle)
                    );
                    assert_eq!(pending.await.unwrap(), BookStatus::Idle);
                }
                // Cancel after completion
                _ => {
                    let pending =
                        controller.book_borrow(book.clone(), account, acquisition, entry);
                    assert_eq!(pending.await.unwrap(), BookStatus::Downloaded);
                    assert_eq!(
                        controller.book_download_cancel(book.clone()).await.unwrap(),
                        None
                    );
                }
            }
            assert!(controller.downloads_in_flight().is_empty());
        }
    }
}
