//! Status command handler

use anyhow::Result;

use patron_core::{Config, Controller};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(controller: &Controller, config: &Config, output: &Output) -> Result<()> {
    let (mode, profiles, current, current_account) = controller.with_profiles(|p| {
        let current = p.current_profile();
        (
            p.mode(),
            p.profiles().len(),
            current.map(|c| (c.id(), c.display_name().to_string())),
            current.map(|c| {
                let account = c.account_current();
                (
                    account.id(),
                    account.provider().display_name.clone(),
                    account.is_logged_in(),
                )
            }),
        )
    });
    let in_flight = controller.downloads_in_flight().len();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "profiles_mode": mode.to_string(),
                    "profiles": profiles,
                    "current_profile": current.as_ref().map(|(id, _)| *id),
                    "current_account": current_account.as_ref().map(|(id, _, _)| *id),
                    "logged_in": current_account.as_ref().map(|(_, _, l)| *l),
                    "providers": controller.providers().providers().len(),
                    "data_dir": config.data_dir,
                    "downloads_in_flight": in_flight
                })
            );
        }
        OutputFormat::Quiet => {
            if let Some((id, _)) = current {
                println!("{}", id);
            }
        }
        OutputFormat::Human => {
            println!("Patron Status");
            println!("=============");
            println!();
            println!("Profiles:");
            println!("  Mode:    {}", mode);
            println!("  Count:   {}", profiles);
            match &current {
                Some((id, name)) => println!("  Current: {} ({})", id, name),
                None => println!("  Current: (none, pass --profile)"),
            }
            if let Some((id, provider, logged_in)) = &current_account {
                println!();
                println!("Account:");
                println!("  ID:       {}", id);
                println!("  Library:  {}", provider);
                println!(
                    "  Status:   {}",
                    if *logged_in { "logged in" } else { "logged out" }
                );
            }
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!("  Providers: {}", controller.providers().providers().len());
        }
    }

    Ok(())
}
