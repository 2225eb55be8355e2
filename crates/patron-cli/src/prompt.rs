//! Interactive prompts

use anyhow::{bail, Result};
use std::io::{self, Write};

/// Prompt for confirmation
///
/// Returns true if user confirms, false otherwise.
/// In non-interactive mode (no TTY), returns false.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

/// Read one line from the terminal
///
/// Fails when stdin is not a TTY, so scripts never block on a prompt.
pub fn read_value(prompt: &str) -> Result<String> {
    if !atty::is(atty::Stream::Stdin) {
        bail!("{} is required when not running interactively", prompt);
    }

    print!("{}: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
