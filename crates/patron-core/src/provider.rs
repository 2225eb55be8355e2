//! Account providers
//!
//! An account provider describes one library: where its catalog lives and
//! how patrons authenticate. Providers are loaded once at startup and never
//! change afterwards; accounts refer to them by their URI.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use url::Url;

/// Age below which the under-13 catalog is used, when a provider has one
pub const UNDER_13_AGE: u32 = 13;

/// Description of a library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProvider {
    /// Opaque identifier of the provider
    pub id: Url,
    pub display_name: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub logo: Option<Url>,
    /// Root of the OPDS catalog
    pub catalog_uri: Url,
    /// Catalog shown to patrons younger than 13
    #[serde(default)]
    pub catalog_uri_for_under_13: Option<Url>,
    /// How patrons log in; absent when the library needs no login
    #[serde(default)]
    pub authentication: Option<AuthenticationDescription>,
    #[serde(default)]
    pub supports_reservations: bool,
    #[serde(default)]
    pub supports_card_creator: bool,
    #[serde(default)]
    pub support_email: Option<String>,
}

/// Authentication requirements of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationDescription {
    /// Endpoint probed with the patron's credentials during login
    pub login_uri: Url,
    #[serde(default = "default_true")]
    pub requires_pin: bool,
    #[serde(default)]
    pub barcode_format: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AccountProvider {
    /// Whether logging in requires a network round trip
    pub fn requires_credentials(&self) -> bool {
        self.authentication.is_some()
    }

    /// Catalog to show a patron born on `date_of_birth`, as of `today`
    pub fn catalog_uri_for(&self, date_of_birth: Option<NaiveDate>, today: NaiveDate) -> &Url {
        match (&self.catalog_uri_for_under_13, date_of_birth) {
            (Some(under_13), Some(born)) if age_on(born, today) < UNDER_13_AGE => under_13,
            _ => &self.catalog_uri,
        }
    }
}

fn age_on(born: NaiveDate, today: NaiveDate) -> u32 {
    let mut age = today.year() - born.year();
    if (today.month(), today.day()) < (born.month(), born.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

/// Source of account providers
pub trait AccountProviderRegistry: Send + Sync {
    /// All known providers keyed by id
    fn providers(&self) -> BTreeMap<Url, Arc<AccountProvider>>;

    /// Provider used for default accounts
    fn default_provider(&self) -> Arc<AccountProvider>;

    /// Look up one provider
    fn provider(&self, id: &Url) -> Option<Arc<AccountProvider>> {
        self.providers().get(id).cloned()
    }
}

/// Provider registry fixed at construction time
#[derive(Debug, Clone)]
pub struct StaticProviderRegistry {
    providers: BTreeMap<Url, Arc<AccountProvider>>,
    default_provider: Arc<AccountProvider>,
}

#[derive(Deserialize)]
struct ProvidersFile {
    #[serde(default)]
    default: Option<Url>,
    providers: Vec<AccountProvider>,
}

impl StaticProviderRegistry {
    /// Build a registry from a list of providers
    ///
    /// `default` selects the default provider; the first provider is used
    /// when it is `None`.
    pub fn new(providers: Vec<AccountProvider>, default: Option<&Url>) -> Result<Self> {
        let Some(first) = providers.first() else {
            bail!("At least one account provider is required");
        };
        let default_id = default.unwrap_or(&first.id).clone();

        let providers: BTreeMap<Url, Arc<AccountProvider>> = providers
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();

        let default_provider = providers
            .get(&default_id)
            .cloned()
            .with_context(|| format!("Default provider {} is not a known provider", default_id))?;

        Ok(Self {
            providers,
            default_provider,
        })
    }

    /// Load providers from a JSON file
    ///
    /// The file holds `{"default": "<uri>", "providers": [...]}`. A default
    /// given by the caller overrides the one in the file.
    pub fn load_from_path(path: &Path, default: Option<&Url>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read providers file: {:?}", path))?;
        Self::load_from_str(&content, default)
            .with_context(|| format!("Failed to load providers from {:?}", path))
    }

    /// Load providers from a JSON string
    pub fn load_from_str(content: &str, default: Option<&Url>) -> Result<Self> {
        let file: ProvidersFile =
            serde_json::from_str(content).context("Failed to parse providers JSON")?;
        let default = default.cloned().or(file.default);
        Self::new(file.providers, default.as_ref())
    }

    /// Registry holding only the built-in open-access provider
    pub fn builtin() -> Result<Self> {
        let provider = builtin_provider().context("Invalid builtin provider")?;
        Self::new(vec![provider], None)
    }
}

impl AccountProviderRegistry for StaticProviderRegistry {
    fn providers(&self) -> BTreeMap<Url, Arc<AccountProvider>> {
        self.providers.clone()
    }

    fn default_provider(&self) -> Arc<AccountProvider> {
        self.default_provider.clone()
    }

    fn provider(&self, id: &Url) -> Option<Arc<AccountProvider>> {
        self.providers.get(id).cloned()
    }
}

fn builtin_provider() -> Result<AccountProvider, url::ParseError> {
    Ok(AccountProvider {
        id: Url::parse("https://standardebooks.org/")?,
        display_name: "Standard Ebooks".to_string(),
        subtitle: Some("Free and liberated ebooks".to_string()),
        logo: None,
        catalog_uri: Url::parse("https://standardebooks.org/feeds/opds")?,
        catalog_uri_for_under_13: None,
        authentication: None,
        supports_reservations: false,
        supports_card_creator: false,
        support_email: None,
    })
}
