//! In-memory registry of book statuses
//!
//! Mutated from controller tasks, download callbacks and revocations at
//! once. The status map and the subscriber list are locked independently,
//! and no lock is held while an event is delivered.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::trace;

use super::status::{BookStatus, BookStatusEvent};
use crate::events::{EventBus, Subscription};
use crate::ids::BookId;

/// Current status of every book the client knows about
#[derive(Default)]
pub struct BookRegistry {
    statuses: RwLock<HashMap<BookId, BookStatus>>,
    events: EventBus<BookStatusEvent>,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status of a book and publish the change
    pub fn update(&self, book_id: &BookId, status: BookStatus) {
        trace!(book = %book_id.short(), %status, "book status");
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(book_id.clone(), status.clone());
        self.events.publish(BookStatusEvent::Changed {
            book_id: book_id.clone(),
            status,
        });
    }

    /// Current status of a book
    pub fn get(&self, book_id: &BookId) -> Option<BookStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(book_id)
            .cloned()
    }

    /// Snapshot of every status
    pub fn all(&self) -> HashMap<BookId, BookStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget a book and publish a final `Cleared` event
    pub fn clear(&self, book_id: &BookId) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(book_id);
        self.events.publish(BookStatusEvent::Cleared {
            book_id: book_id.clone(),
        });
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> Subscription<BookStatusEvent> {
        self.events.subscribe()
    }

    /// The bus status changes are published on
    pub fn events(&self) -> &EventBus<BookStatusEvent> {
        &self.events
    }
}
