//! Account command handlers

use anyhow::{bail, Context, Result};

use patron_core::{AccountEvent, Controller, Credentials, LoginTarget};

use super::parse_provider;
use crate::output::{Output, OutputFormat};
use crate::prompt::{confirm, read_value};

fn finish(event: &AccountEvent, output: &Output) -> Result<()> {
    output.account_event(event);
    if event.is_failure() {
        bail!("{}", event);
    }
    Ok(())
}

/// List accounts of the current profile
pub fn list(controller: &Controller, output: &Output) -> Result<()> {
    controller.with_profiles(|p| -> Result<()> {
        let profile = p
            .current_profile()
            .context("No current profile. Pass --profile to choose one.")?;
        output.print_accounts(profile);
        Ok(())
    })
}

/// List the providers accounts can be created for
pub fn providers(controller: &Controller, output: &Output) -> Result<()> {
    let providers = controller.providers().providers();
    let default = controller.providers().default_provider();

    match output.format {
        OutputFormat::Json => {
            let json: Vec<_> = providers
                .values()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "display_name": p.display_name,
                        "subtitle": p.subtitle,
                        "catalog": p.catalog_uri,
                        "requires_credentials": p.requires_credentials(),
                        "default": p.id == default.id,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Quiet => {
            for id in providers.keys() {
                println!("{}", id);
            }
        }
        OutputFormat::Human => {
            for provider in providers.values() {
                let marker = if provider.id == default.id { "*" } else { " " };
                println!("{} {} | {}", marker, provider.display_name, provider.id);
            }
            println!("\n{} provider(s)", providers.len());
        }
    }
    Ok(())
}

/// Create an account
pub async fn create(controller: &Controller, provider: String, output: &Output) -> Result<()> {
    let provider = parse_provider(&provider)?;
    let event = controller.account_create(provider).await?;
    finish(&event, output)
}

/// Delete an account and its books
pub async fn delete(controller: &Controller, provider: String, output: &Output) -> Result<()> {
    let provider = parse_provider(&provider)?;

    if output.should_prompt() {
        println!("Delete the account for {} and all of its books", provider);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let event = controller.account_delete_by_provider(provider).await?;
    finish(&event, output)
}

/// Make an account current
pub async fn select(controller: &Controller, provider: String, output: &Output) -> Result<()> {
    let provider = parse_provider(&provider)?;
    let event = controller.account_select_by_provider(provider).await?;
    finish(&event, output)
}

/// Log in
pub async fn login(
    controller: &Controller,
    barcode: String,
    pin: Option<String>,
    account: Option<String>,
    output: &Output,
) -> Result<()> {
    let target = match account {
        Some(value) => LoginTarget::Account(
            value
                .parse()
                .with_context(|| format!("Invalid account id: {}", value))?,
        ),
        None => LoginTarget::Current,
    };
    let pin = match pin {
        Some(pin) => pin,
        None => read_value("PIN")?,
    };

    let event = controller
        .account_login(target, Credentials::new(barcode, pin))
        .await?;
    finish(&event, output)
}

/// Log out of the current account
pub async fn logout(controller: &Controller, output: &Output) -> Result<()> {
    if output.should_prompt() {
        println!("Logging out deletes every book of the current account.");
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let event = controller.account_logout().await?;
    finish(&event, output)
}
