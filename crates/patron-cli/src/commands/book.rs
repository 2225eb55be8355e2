//! Book command handlers

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use patron_core::{
    AccountId, Acquisition, AcquisitionType, BookId, BookStatus, BookStatusEvent, Controller,
    FeedEntry,
};

use super::resolve_account;
use crate::output::{Output, OutputFormat};
use crate::prompt::confirm;

/// Arguments of `book borrow`
pub struct BorrowArgs {
    pub uri: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub revoke_uri: Option<String>,
    pub account: Option<String>,
}

/// List books of an account
pub fn list(controller: &Controller, account: Option<String>, output: &Output) -> Result<()> {
    let account_id = resolve_account(controller, account.as_deref())?;
    let account = controller
        .with_profiles(|p| p.current_profile().and_then(|p| p.account(account_id)))
        .ok_or_else(|| anyhow!("Account not found: {}", account_id))?;

    let registry = controller.book_registry();
    let books: Vec<_> = account
        .books()
        .books()
        .context("Failed to read books")?
        .into_values()
        .map(|record| {
            let status = registry.get(&record.id);
            (record, status)
        })
        .collect();

    output.print_books(&books);
    Ok(())
}

/// Borrow and download a book
pub async fn borrow(controller: &Controller, args: BorrowArgs, output: &Output) -> Result<()> {
    let account = resolve_account(controller, args.account.as_deref())?;
    let uri = Url::parse(&args.uri).with_context(|| format!("Invalid URI: {}", args.uri))?;

    let mut acquisition = Acquisition::new(AcquisitionType::OpenAccess, uri);
    if let Some(content_type) = args.content_type {
        acquisition = acquisition.with_content_type(content_type);
    }
    let entry_id = args.id.unwrap_or_else(|| args.uri.clone());
    let title = args.title.unwrap_or_else(|| entry_id.clone());
    let mut entry = FeedEntry::new(entry_id, title).with_acquisition(acquisition.clone());
    entry.revoke_uri = args
        .revoke_uri
        .as_deref()
        .map(Url::parse)
        .transpose()
        .context("Invalid revoke URI")?;

    let book_id = entry.book_id();
    let progress = (output.format == OutputFormat::Human).then(|| show_progress(controller, &book_id));

    let status = controller
        .book_borrow(book_id.clone(), account, acquisition, entry)
        .await?;
    if let Some(progress) = progress {
        progress.abort();
    }

    finish(&book_id, &status, output)
}

/// Print download progress of one book to stderr until aborted
fn show_progress(controller: &Controller, book_id: &BookId) -> tokio::task::JoinHandle<()> {
    let mut events = controller.book_events();
    let book_id = book_id.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let BookStatusEvent::Changed {
                book_id: id,
                status: status @ BookStatus::Downloading { .. },
            } = event
            {
                if id == book_id {
                    match status.progress() {
                        Some(fraction) => eprintln!("  {:>3.0}%", fraction * 100.0),
                        None => eprintln!("  {}", status),
                    }
                }
            }
        }
    })
}

/// Return a book early
pub async fn revoke(
    controller: &Controller,
    id: String,
    account: Option<String>,
    output: &Output,
) -> Result<()> {
    let account = resolve_account(controller, account.as_deref())?;
    let book_id = parse_book_id(&id, controller, account)?;

    let status = controller.book_revoke(book_id.clone(), account).await?;
    finish(&book_id, &status, output)
}

/// Delete a book
pub async fn delete(
    controller: &Controller,
    id: String,
    account: Option<String>,
    output: &Output,
) -> Result<()> {
    let account = resolve_account(controller, account.as_deref())?;
    let book_id = parse_book_id(&id, controller, account)?;

    if output.should_prompt() {
        println!("Delete book: {}", book_id.short());
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    controller
        .book_delete(book_id.clone(), account)
        .await?
        .context("Failed to delete book")?;
    output.success(&format!("Deleted book: {}", book_id.short()));
    Ok(())
}

fn finish(book_id: &BookId, status: &BookStatus, output: &Output) -> Result<()> {
    output.book_status(book_id.short(), status);
    match status {
        BookStatus::DownloadFailed { error } => bail!("{}", error),
        BookStatus::RevokeFailed { error } => bail!("{}", error),
        _ => Ok(()),
    }
}

/// Parse a book ID (supports full ID or prefix)
fn parse_book_id(id: &str, controller: &Controller, account: AccountId) -> Result<BookId> {
    if let Ok(book_id) = BookId::parse(id) {
        return Ok(book_id);
    }

    let books = controller
        .with_profiles(|p| {
            p.current_profile()
                .and_then(|p| p.account(account))
                .map(|a| a.books().books())
        })
        .ok_or_else(|| anyhow!("Account not found: {}", account))?
        .context("Failed to read books")?;

    let matches: Vec<_> = books
        .values()
        .filter(|b| b.id.as_str().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No book found matching: {}", id),
        1 => Ok(matches[0].id.clone()),
        _ => {
            eprintln!("Multiple books match '{}':", id);
            for book in &matches {
                eprintln!("  {} - {}", book.id.short(), book.entry.title);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
