//! Command handlers

pub mod account;
pub mod book;
pub mod config;
pub mod profile;
pub mod status;

use anyhow::{Context, Result};
use url::Url;

use patron_core::{AccountId, Controller};

/// Parse a provider URI given on the command line
pub fn parse_provider(value: &str) -> Result<Url> {
    Url::parse(value).with_context(|| format!("Invalid provider URI: {}", value))
}

/// Resolve `--account`, defaulting to the current account
pub fn resolve_account(controller: &Controller, account: Option<&str>) -> Result<AccountId> {
    match account {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid account id: {}", value)),
        None => controller
            .with_profiles(|p| p.current_profile().map(|p| p.account_current().id()))
            .context("No current profile. Pass --profile to choose one."),
    }
}
