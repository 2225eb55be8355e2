//! Account credentials
//!
//! Credentials are immutable values. Changing any part of them produces a
//! new value that the account store then persists as a whole.
//!
//! Serialized form (`credentials.json`):
//!
//! ```json
//! {
//!   "username": "2355123",
//!   "password": "1234",
//!   "oauth_token": null,
//!   "adobe_credentials": { "vendor_id": "NYPL", "user_id": "...", "device_id": "...", "device_token": "..." },
//!   "auth_provider": null,
//!   "patron": null,
//!   "drm_licensors": [{ "vendor": "NYPL", "client_token": "...", "device_manager_url": null }]
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Patron credentials for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "username")]
    barcode: String,
    #[serde(rename = "password")]
    pin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    oauth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adobe_credentials: Option<AdobeCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    patron: Option<String>,
    #[serde(default)]
    drm_licensors: Vec<DrmLicensor>,
}

impl Credentials {
    /// Credentials consisting of a barcode and PIN only
    pub fn new(barcode: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            barcode: barcode.into(),
            pin: pin.into(),
            oauth_token: None,
            adobe_credentials: None,
            auth_provider: None,
            patron: None,
            drm_licensors: Vec::new(),
        }
    }

    pub fn barcode(&self) -> &str {
        &self.barcode
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn oauth_token(&self) -> Option<&str> {
        self.oauth_token.as_deref()
    }

    pub fn adobe_credentials(&self) -> Option<&AdobeCredentials> {
        self.adobe_credentials.as_ref()
    }

    pub fn auth_provider(&self) -> Option<&str> {
        self.auth_provider.as_deref()
    }

    pub fn patron(&self) -> Option<&str> {
        self.patron.as_deref()
    }

    pub fn drm_licensors(&self) -> &[DrmLicensor] {
        &self.drm_licensors
    }

    /// The licensor issued by `vendor`, if any
    pub fn licensor_for(&self, vendor: &str) -> Option<&DrmLicensor> {
        self.drm_licensors.iter().find(|l| l.vendor == vendor)
    }

    #[must_use]
    pub fn with_oauth_token(mut self, token: impl Into<String>) -> Self {
        self.oauth_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_adobe_credentials(mut self, adobe: Option<AdobeCredentials>) -> Self {
        self.adobe_credentials = adobe;
        self
    }

    #[must_use]
    pub fn with_auth_provider(mut self, provider: impl Into<String>) -> Self {
        self.auth_provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_patron(mut self, patron: impl Into<String>) -> Self {
        self.patron = Some(patron.into());
        self
    }

    #[must_use]
    pub fn with_drm_licensor(mut self, licensor: DrmLicensor) -> Self {
        self.drm_licensors.retain(|l| l.vendor != licensor.vendor);
        self.drm_licensors.push(licensor);
        self
    }

    /// Authentication to send along with requests made for this patron
    ///
    /// An OAuth token takes precedence over the barcode and PIN.
    pub fn http_auth(&self) -> HttpAuth {
        match &self.oauth_token {
            Some(token) => HttpAuth::Bearer(token.clone()),
            None => HttpAuth::Basic {
                user: self.barcode.clone(),
                password: self.pin.clone(),
            },
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("barcode", &self.barcode)
            .field("pin", &"<redacted>")
            .field("oauth_token", &self.oauth_token.as_ref().map(|_| "<redacted>"))
            .field("adobe_credentials", &self.adobe_credentials)
            .field("auth_provider", &self.auth_provider)
            .field("patron", &self.patron)
            .field("drm_licensors", &self.drm_licensors)
            .finish()
    }
}

/// Adobe DRM credentials
///
/// `vendor_id` is known before activation; `user_id`, `device_id` and
/// `device_token` are filled in once the device has been activated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdobeCredentials {
    pub vendor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

impl AdobeCredentials {
    /// Pre-activation credentials for a vendor
    pub fn pre_activation(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            user_id: None,
            device_id: None,
            device_token: None,
        }
    }

    /// Whether the device has been activated with these credentials
    pub fn is_activated(&self) -> bool {
        self.user_id.is_some() && self.device_id.is_some()
    }

    /// Post-activation credentials recorded from a device activation
    #[must_use]
    pub fn activated(&self, activation: DeviceActivation) -> Self {
        Self {
            vendor_id: self.vendor_id.clone(),
            user_id: Some(activation.user_id),
            device_id: Some(activation.device_id),
            device_token: activation.device_token,
        }
    }

    /// Drop the post-activation part, keeping the vendor
    #[must_use]
    pub fn deactivated(&self) -> Self {
        Self::pre_activation(self.vendor_id.clone())
    }
}

impl fmt::Debug for AdobeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdobeCredentials")
            .field("vendor_id", &self.vendor_id)
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("device_token", &self.device_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Result of activating this device with a DRM vendor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceActivation {
    pub user_id: String,
    pub device_id: String,
    pub device_token: Option<String>,
}

/// A DRM licensor entry as issued by the library
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmLicensor {
    pub vendor: String,
    pub client_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_manager_url: Option<Url>,
}

impl fmt::Debug for DrmLicensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmLicensor")
            .field("vendor", &self.vendor)
            .field("client_token", &"<redacted>")
            .field("device_manager_url", &self.device_manager_url)
            .finish()
    }
}

/// Authentication attached to an HTTP request
#[derive(Clone, PartialEq, Eq)]
pub enum HttpAuth {
    Basic { user: String, password: String },
    Bearer(String),
}

impl fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpAuth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            HttpAuth::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}
