//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use patron_core::{
    Account, AccountEvent, BookRecord, BookStatus, Profile, ProfileEvent, ProfileId,
};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a list of profiles, marking the current one
    pub fn print_profiles(&self, profiles: &[&Profile], current: Option<ProfileId>) {
        match self.format {
            OutputFormat::Human => {
                if profiles.is_empty() {
                    println!("No profiles found.");
                    return;
                }
                for profile in profiles {
                    let marker = if Some(profile.id()) == current { "*" } else { " " };
                    let born = profile
                        .preferences()
                        .date_of_birth
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default();
                    println!(
                        "{} {:>3} | {} | {} account(s) {}",
                        marker,
                        profile.id(),
                        truncate(profile.display_name(), 30),
                        profile.accounts().len(),
                        born
                    );
                }
                println!("\n{} profile(s)", profiles.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = profiles
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id(),
                            "display_name": p.display_name(),
                            "current": Some(p.id()) == current,
                            "current_account": p.account_current().id(),
                            "accounts": p.accounts().len(),
                            "date_of_birth": p.preferences().date_of_birth,
                        })
                    })
                    .collect();
                print_json(&json);
            }
            OutputFormat::Quiet => {
                for profile in profiles {
                    println!("{}", profile.id());
                }
            }
        }
    }

    /// Print the accounts of a profile, marking the current one
    pub fn print_accounts(&self, profile: &Profile) {
        let current = profile.account_current().id();
        let accounts: Vec<_> = profile.accounts().accounts().values().collect();
        match self.format {
            OutputFormat::Human => {
                for account in &accounts {
                    let marker = if account.id() == current { "*" } else { " " };
                    println!(
                        "{} {:>3} | {} | {} | {}",
                        marker,
                        account.id(),
                        truncate(&account.provider().display_name, 30),
                        login_state(account),
                        account.provider().id
                    );
                }
                println!("\n{} account(s)", accounts.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = accounts
                    .iter()
                    .map(|a| {
                        serde_json::json!({
                            "id": a.id(),
                            "provider": a.provider().id,
                            "provider_name": a.provider().display_name,
                            "current": a.id() == current,
                            "logged_in": a.is_logged_in(),
                            "requires_credentials": a.provider().requires_credentials(),
                        })
                    })
                    .collect();
                print_json(&json);
            }
            OutputFormat::Quiet => {
                for account in &accounts {
                    println!("{}", account.id());
                }
            }
        }
    }

    /// Print the books of an account with their transient status, if any
    pub fn print_books(&self, books: &[(BookRecord, Option<BookStatus>)]) {
        match self.format {
            OutputFormat::Human => {
                if books.is_empty() {
                    println!("No books found.");
                    return;
                }
                for (record, status) in books {
                    let state = match status {
                        Some(status) => status.to_string(),
                        None if record.is_downloaded() => "downloaded".to_string(),
                        None => "not downloaded".to_string(),
                    };
                    let drm = if record.loan.is_some() { " [DRM]" } else { "" };
                    println!(
                        "{} | {}{} | {}",
                        record.id.short(),
                        truncate(&record.entry.title, 40),
                        drm,
                        state
                    );
                }
                println!("\n{} book(s)", books.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = books
                    .iter()
                    .map(|(record, status)| {
                        serde_json::json!({
                            "id": record.id,
                            "entry_id": record.entry.id,
                            "title": record.entry.title,
                            "authors": record.entry.authors,
                            "artifact": record.artifact,
                            "loan": record.loan,
                            "status": status,
                        })
                    })
                    .collect();
                print_json(&json);
            }
            OutputFormat::Quiet => {
                for (record, _) in books {
                    println!("{}", record.id);
                }
            }
        }
    }

    /// Print the terminal event of a profile request
    pub fn profile_event(&self, event: &ProfileEvent) {
        match self.format {
            OutputFormat::Human => println!("{}", event),
            OutputFormat::Json => print_json(&profile_event_json(event)),
            OutputFormat::Quiet => {
                if let ProfileEvent::ProfileCreated { id, .. } = event {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print the terminal event of an account request
    pub fn account_event(&self, event: &AccountEvent) {
        match self.format {
            OutputFormat::Human => {
                let mark = if event.is_failure() { "✗" } else { "✓" };
                println!("{} {}", mark, event);
            }
            OutputFormat::Json => {
                print_json(&serde_json::json!({
                    "status": if event.is_failure() { "failure" } else { "success" },
                    "message": event.to_string(),
                }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print the final status of a book request
    pub fn book_status(&self, book: &str, status: &BookStatus) {
        match self.format {
            OutputFormat::Human => println!("{}: {}", book, status),
            OutputFormat::Json => {
                print_json(&serde_json::json!({"book": book, "status": status}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn profile_event_json(event: &ProfileEvent) -> serde_json::Value {
    match event {
        ProfileEvent::ProfileCreated { id, display_name } => serde_json::json!({
            "status": "success",
            "id": id,
            "display_name": display_name,
        }),
        ProfileEvent::ProfileCreationFailed { .. } => serde_json::json!({
            "status": "failure",
            "message": event.to_string(),
        }),
    }
}

fn login_state(account: &Account) -> &'static str {
    if !account.provider().requires_credentials() {
        "no login needed"
    } else if account.is_logged_in() {
        "logged in"
    } else {
        "logged out"
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
