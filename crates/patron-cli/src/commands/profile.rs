//! Profile command handlers

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};

use patron_core::profiles::{ColorScheme, FontFamily};
use patron_core::{Controller, ProfileEvent};

use super::parse_provider;
use crate::output::{Output, OutputFormat};

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

/// List all profiles
pub fn list(controller: &Controller, output: &Output) -> Result<()> {
    controller.with_profiles(|p| {
        let profiles: Vec<_> = p.profiles().values().collect();
        output.print_profiles(&profiles, p.current());
    });
    Ok(())
}

/// Create a profile
pub async fn create(
    controller: &Controller,
    name: String,
    born: Option<String>,
    provider: Option<String>,
    output: &Output,
) -> Result<()> {
    let date_of_birth = born.as_deref().map(parse_date).transpose()?;
    let provider = match provider {
        Some(uri) => {
            let uri = parse_provider(&uri)?;
            controller
                .providers()
                .provider(&uri)
                .ok_or_else(|| anyhow!("Unknown provider: {}", uri))?
        }
        None => controller.providers().default_provider(),
    };

    let event = controller
        .profile_create(provider, name, date_of_birth)
        .await?;
    output.profile_event(&event);
    if let ProfileEvent::ProfileCreationFailed { .. } = event {
        bail!("Profile creation failed");
    }
    Ok(())
}

/// Show the current profile
pub fn show(controller: &Controller, output: &Output) -> Result<()> {
    let today = Local::now().date_naive();
    controller.with_profiles(|p| -> Result<()> {
        let profile = p
            .current_profile()
            .context("No current profile. Pass --profile to choose one.")?;
        let preferences = profile.preferences();
        let catalog = profile.catalog_uri_for(today);

        match output.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "id": profile.id(),
                        "display_name": profile.display_name(),
                        "current_account": profile.account_current().id(),
                        "catalog": catalog,
                        "preferences": preferences,
                    })
                );
            }
            OutputFormat::Quiet => println!("{}", profile.id()),
            OutputFormat::Human => {
                println!("ID:            {}", profile.id());
                println!("Name:          {}", profile.display_name());
                if let Some(born) = preferences.date_of_birth {
                    println!("Born:          {}", born.format("%Y-%m-%d"));
                }
                println!("Catalog:       {}", catalog);
                println!();
                println!("Font:          {}", preferences.reader.font_family);
                println!("Font scale:    {}%", preferences.reader.font_scale);
                println!("Color scheme:  {}", preferences.reader.color_scheme);
            }
        }
        Ok(())
    })
}

/// Update preferences of the current profile
pub async fn prefs(
    controller: &Controller,
    born: Option<String>,
    font: Option<String>,
    scale: Option<u16>,
    scheme: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut preferences = controller
        .with_profiles(|p| p.current_profile().map(|p| p.preferences().clone()))
        .context("No current profile. Pass --profile to choose one.")?;

    if let Some(born) = born {
        preferences.date_of_birth = match born.as_str() {
            "" | "none" => None,
            value => Some(parse_date(value)?),
        };
    }
    if let Some(font) = font {
        preferences.reader.font_family = font.parse::<FontFamily>().map_err(|e| anyhow!(e))?;
    }
    if let Some(scale) = scale {
        if scale == 0 {
            bail!("Font scale must be positive");
        }
        preferences.reader.font_scale = scale;
    }
    if let Some(scheme) = scheme {
        preferences.reader.color_scheme = scheme.parse::<ColorScheme>().map_err(|e| anyhow!(e))?;
    }

    controller
        .profile_update_preferences(preferences)
        .await?
        .context("Failed to update preferences")?;
    output.success("Preferences updated");
    Ok(())
}
