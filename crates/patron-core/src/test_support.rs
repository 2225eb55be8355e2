//! Fixtures and fakes shared by unit tests

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::{NamedTempFile, TempDir};
use url::Url;

use crate::books::feed::{ADOBE_ACSM_CONTENT_TYPE, EPUB_CONTENT_TYPE};
use crate::books::{Acquisition, AcquisitionType, FeedEntry};
use crate::controller::{Controller, ControllerServices};
use crate::credentials::{AdobeCredentials, DeviceActivation, HttpAuth};
use crate::download::{DownloadHandle, DownloadListener, DownloadRequest, Downloader};
use crate::drm::{DrmConnector, DrmFulfillment, DrmLoan};
use crate::http::{Http, HttpBody, HttpHead, HttpResult};
use crate::events::ProfileEvent;
use crate::ids::{AccountId, BookId, ProfileId};
use crate::profiles::{ProfilesDatabase, ProfilesMode};
use crate::provider::{
    AccountProvider, AccountProviderRegistry, AuthenticationDescription, StaticProviderRegistry,
};

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn open_provider_id() -> Url {
    url("https://open.example/")
}

pub fn auth_provider_id() -> Url {
    url("https://library.example/")
}

pub fn login_uri() -> Url {
    url("https://library.example/login")
}

/// An open-access provider (the default) and one requiring login
pub fn registry() -> StaticProviderRegistry {
    let open = AccountProvider {
        id: open_provider_id(),
        display_name: "Open Library".to_string(),
        subtitle: None,
        logo: None,
        catalog_uri: url("https://open.example/opds"),
        catalog_uri_for_under_13: None,
        authentication: None,
        supports_reservations: false,
        supports_card_creator: false,
        support_email: None,
    };
    let library = AccountProvider {
        id: auth_provider_id(),
        display_name: "Public Library".to_string(),
        subtitle: Some("Card required".to_string()),
        logo: None,
        catalog_uri: url("https://library.example/opds"),
        catalog_uri_for_under_13: Some(url("https://library.example/kids")),
        authentication: Some(AuthenticationDescription {
            login_uri: login_uri(),
            requires_pin: true,
            barcode_format: None,
        }),
        supports_reservations: true,
        supports_card_creator: false,
        support_email: Some("help@library.example".to_string()),
    };
    StaticProviderRegistry::new(vec![open, library], None).unwrap()
}

pub fn open_provider(registry: &StaticProviderRegistry) -> Arc<AccountProvider> {
    registry.provider(&open_provider_id()).unwrap()
}

pub fn auth_provider(registry: &StaticProviderRegistry) -> Arc<AccountProvider> {
    registry.provider(&auth_provider_id()).unwrap()
}

/// An open-access entry whose acquisition URI is unique to the entry
pub fn feed_entry(id: &str) -> FeedEntry {
    let uri = url(&format!(
        "https://books.example/{}.epub",
        BookId::for_entry(id).short()
    ));
    FeedEntry::new(id, format!("Title of {}", id)).with_acquisition(
        Acquisition::new(AcquisitionType::OpenAccess, uri).with_content_type(EPUB_CONTENT_TYPE),
    )
}

/// An entry whose acquisition yields an Adobe fulfillment token
pub fn acsm_entry(id: &str) -> (FeedEntry, Acquisition) {
    let uri = url(&format!(
        "https://library.example/fulfill/{}",
        BookId::for_entry(id).short()
    ));
    let acquisition = Acquisition::new(AcquisitionType::OpenAccess, uri)
        .with_content_type(ADOBE_ACSM_CONTENT_TYPE);
    let entry = FeedEntry::new(id, "Protected").with_acquisition(acquisition.clone());
    (entry, acquisition)
}

pub fn current_account(controller: &Controller) -> AccountId {
    controller.with_profiles(|p| p.current_profile().unwrap().account_current().id())
}

/// Create a profile through the controller and return its id
pub async fn create_profile(controller: &Controller, name: &str) -> ProfileId {
    let provider = controller.providers().default_provider();
    match controller.profile_create(provider, name, None).await.unwrap() {
        ProfileEvent::ProfileCreated { id, .. } => id,
        event => panic!("unexpected event: {}", event),
    }
}

/// Whether an account of a profile holds `book`
pub fn holds_book(controller: &Controller, profile: ProfileId, account: AccountId, book: &BookId) -> bool {
    controller.with_profiles(|p| {
        p.profile(profile)
            .and_then(|p| p.account(account))
            .is_some_and(|a| a.books().book(book).unwrap().is_some())
    })
}

/// Wait until a download of `book` is tracked by the controller
pub async fn wait_for_in_flight(controller: &Controller, book: &BookId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !controller.downloads_in_flight().contains(book) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

// ==================== HTTP ====================

#[derive(Debug, Clone)]
pub enum FakeResponse {
    Ok(Vec<u8>),
    Status(u16),
    Exception,
}

#[derive(Debug, Clone)]
pub struct FakeRequest {
    pub method: &'static str,
    pub uri: Url,
    pub auth: Option<HttpAuth>,
}

/// Scripted [`Http`]; unscripted URIs answer 200 with an empty body
#[derive(Default)]
pub struct FakeHttp {
    responses: Mutex<HashMap<Url, FakeResponse>>,
    requests: Mutex<Vec<FakeRequest>>,
}

impl FakeHttp {
    pub fn respond(&self, uri: Url, response: FakeResponse) {
        self.responses.lock().unwrap().insert(uri, response);
    }

    pub fn requests(&self) -> Vec<FakeRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn answer(&self, method: &'static str, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<Vec<u8>> {
        self.requests.lock().unwrap().push(FakeRequest {
            method,
            uri: uri.clone(),
            auth: auth.cloned(),
        });
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or(FakeResponse::Ok(Vec::new()));
        match response {
            FakeResponse::Ok(body) => HttpResult::Ok(body),
            FakeResponse::Status(status) => HttpResult::Error {
                status,
                message: "scripted failure".to_string(),
            },
            FakeResponse::Exception => HttpResult::Exception(anyhow!("connection refused")),
        }
    }
}

#[async_trait]
impl Http for FakeHttp {
    async fn head(&self, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<HttpHead> {
        match self.answer("HEAD", auth, uri) {
            HttpResult::Ok(body) => HttpResult::Ok(HttpHead {
                status: 200,
                content_type: None,
                content_length: Some(body.len() as u64),
            }),
            HttpResult::Error { status, message } => HttpResult::Error { status, message },
            HttpResult::Exception(e) => HttpResult::Exception(e),
        }
    }

    async fn get(&self, auth: Option<&HttpAuth>, uri: &Url) -> HttpResult<HttpBody> {
        match self.answer("GET", auth, uri) {
            HttpResult::Ok(body) => HttpResult::Ok(HttpBody {
                status: 200,
                content_type: None,
                body,
            }),
            HttpResult::Error { status, message } => HttpResult::Error { status, message },
            HttpResult::Exception(e) => HttpResult::Exception(e),
        }
    }
}

// ==================== Downloads ====================

#[derive(Debug, Clone)]
pub enum DownloadScript {
    /// Deliver chunks of the given sizes, then complete
    Complete {
        chunks: Vec<usize>,
        total: Option<u64>,
        content_type: Option<String>,
    },
    Fail {
        status: Option<u16>,
    },
    /// Wait until cancelled
    Hang,
}

impl Default for DownloadScript {
    fn default() -> Self {
        DownloadScript::Complete {
            chunks: vec![64],
            total: Some(64),
            content_type: None,
        }
    }
}

/// Scripted [`Downloader`]; unscripted URIs complete with 64 bytes
pub struct FakeDownloader {
    temp_dir: PathBuf,
    scripts: Mutex<HashMap<Url, DownloadScript>>,
    requests: Mutex<Vec<DownloadRequest>>,
}

impl FakeDownloader {
    fn new(temp_dir: PathBuf) -> Self {
        std::fs::create_dir_all(&temp_dir).unwrap();
        Self {
            temp_dir,
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, uri: &Url, script: DownloadScript) {
        self.scripts.lock().unwrap().insert(uri.clone(), script);
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Downloader for FakeDownloader {
    fn download(
        &self,
        request: DownloadRequest,
        listener: Arc<dyn DownloadListener>,
    ) -> DownloadHandle {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.uri)
            .cloned()
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request);

        let (handle, mut signal) = DownloadHandle::new();
        let temp_dir = self.temp_dir.clone();
        tokio::spawn(async move {
            match script {
                DownloadScript::Complete {
                    chunks,
                    total,
                    content_type,
                } => {
                    listener.started(total);
                    listener.data_received(0, total);
                    let mut file = NamedTempFile::new_in(&temp_dir).unwrap();
                    let mut running = 0u64;
                    for size in chunks {
                        tokio::task::yield_now().await;
                        if signal.is_cancelled() {
                            listener.cancelled();
                            return;
                        }
                        file.write_all(&vec![b'x'; size]).unwrap();
                        running += size as u64;
                        listener.data_received(running, total);
                    }
                    listener.completed(file.into_temp_path(), content_type);
                }
                DownloadScript::Fail { status } => {
                    listener.started(None);
                    listener.failed(status, 0, anyhow!("scripted download failure"));
                }
                DownloadScript::Hang => {
                    listener.started(None);
                    signal.cancelled().await;
                    listener.cancelled();
                }
            }
        });
        handle
    }
}

// ==================== DRM ====================

/// [`DrmConnector`] that counts calls and fulfills tokens with a fixed book
#[derive(Default)]
pub struct FakeDrm {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    fulfillments: AtomicUsize,
    returns: AtomicUsize,
    fail_activation: AtomicBool,
}

impl FakeDrm {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn fulfillments(&self) -> usize {
        self.fulfillments.load(Ordering::SeqCst)
    }

    pub fn returns(&self) -> usize {
        self.returns.load(Ordering::SeqCst)
    }

    pub fn fail_activation(&self) {
        self.fail_activation.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DrmConnector for FakeDrm {
    async fn activate_device(&self, vendor_id: &str, _client_token: &str) -> Result<DeviceActivation> {
        if self.fail_activation.load(Ordering::SeqCst) {
            return Err(anyhow!("activation refused by {}", vendor_id));
        }
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceActivation {
            user_id: "urn:uuid:user".to_string(),
            device_id: "urn:uuid:device".to_string(),
            device_token: None,
        })
    }

    async fn deactivate_device(&self, _credentials: &AdobeCredentials) -> Result<()> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fulfill(&self, token: &Path, credentials: &AdobeCredentials) -> Result<DrmFulfillment> {
        let count = self.fulfillments.fetch_add(1, Ordering::SeqCst) + 1;
        let file = token.with_extension("epub");
        std::fs::write(&file, b"fulfilled book")?;
        Ok(DrmFulfillment {
            file,
            loan: DrmLoan {
                vendor: credentials.vendor_id.clone(),
                loan_id: format!("loan-{}", count),
                returnable: true,
            },
        })
    }

    async fn return_loan(&self, _loan: &DrmLoan, _credentials: &AdobeCredentials) -> Result<()> {
        self.returns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== Harness ====================

/// A controller over a temporary directory with every collaborator faked
///
/// Must be created inside a tokio runtime.
pub struct Harness {
    pub controller: Controller,
    pub http: Arc<FakeHttp>,
    pub downloader: Arc<FakeDownloader>,
    pub drm: Option<Arc<FakeDrm>>,
    _temp_dir: TempDir,
}

impl Harness {
    pub fn new(mode: ProfilesMode) -> Self {
        Self::build(mode, None, 4)
    }

    pub fn with_drm(mode: ProfilesMode) -> Self {
        Self::build(mode, Some(Arc::new(FakeDrm::default())), 4)
    }

    /// A harness whose download pool runs `size` requests at a time
    pub fn with_pool(mode: ProfilesMode, size: usize) -> Self {
        Self::build(mode, None, size)
    }

    fn build(mode: ProfilesMode, drm: Option<Arc<FakeDrm>>, pool: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let providers = Arc::new(registry());
        let profiles =
            ProfilesDatabase::open(temp_dir.path().join("profiles"), mode, providers.as_ref())
                .unwrap();
        let http = Arc::new(FakeHttp::default());
        let downloader = Arc::new(FakeDownloader::new(temp_dir.path().join("downloads")));

        let controller = Controller::new(ControllerServices {
            profiles,
            providers,
            http: http.clone(),
            downloader: downloader.clone(),
            drm: drm.clone().map(|d| d as Arc<dyn DrmConnector>),
            max_concurrent_downloads: pool,
        });

        Self {
            controller,
            http,
            downloader,
            drm,
            _temp_dir: temp_dir,
        }
    }

    pub fn drm(&self) -> &FakeDrm {
        self.drm.as_ref().unwrap()
    }
}
