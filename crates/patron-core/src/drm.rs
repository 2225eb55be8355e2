//! DRM connector interface
//!
//! The DRM protocol itself lives outside this crate. The controller only
//! records activation data in the patron's credentials, hands fulfillment
//! tokens to the connector, and returns loans through it. A client without
//! a connector can still borrow unprotected books.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::{AdobeCredentials, DeviceActivation};

/// A DRM loan recorded for a fulfilled book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmLoan {
    pub vendor: String,
    pub loan_id: String,
    /// Whether the loan can be returned before it expires
    pub returnable: bool,
}

/// Output of a successful fulfillment
#[derive(Debug)]
pub struct DrmFulfillment {
    /// The decrypted-on-read book, ready to be stored
    pub file: PathBuf,
    pub loan: DrmLoan,
}

/// Connector to a DRM vendor
#[async_trait]
pub trait DrmConnector: Send + Sync {
    /// Activate this device for a patron
    async fn activate_device(
        &self,
        vendor_id: &str,
        client_token: &str,
    ) -> Result<DeviceActivation>;

    /// Deactivate this device
    async fn deactivate_device(&self, credentials: &AdobeCredentials) -> Result<()>;

    /// Turn a fulfillment token into a book
    async fn fulfill(&self, token: &Path, credentials: &AdobeCredentials)
        -> Result<DrmFulfillment>;

    /// Return a loan early
    async fn return_loan(&self, loan: &DrmLoan, credentials: &AdobeCredentials) -> Result<()>;
}
