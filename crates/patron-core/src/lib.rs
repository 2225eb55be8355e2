//! Patron Core Library
//!
//! This crate provides the core functionality for Patron, a library patron
//! client: reader profiles, library accounts, and the books borrowed
//! through them.
//!
//! # Architecture
//!
//! - **Profiles** own one or more **accounts**, each bound to an account
//!   provider (a library). One account per profile is current.
//! - Each account owns a directory-backed **book database**.
//! - The in-memory **book registry** tracks the transient status of every
//!   book and publishes changes on an event bus.
//! - The **controller** is the single entry point for requests. It runs
//!   them asynchronously and reports each outcome as an event.
//!
//! # Quick Start
//!
//! ```text
//! let controller = Controller::open(&Config::load()?)?;
//!
//! // Log in to the current account
//! let event = controller
//!     .account_login(LoginTarget::Current, Credentials::new("2355123", "1234"))
//!     .await?;
//!
//! // Borrow a book
//! let status = controller.book_borrow(entry.book_id(), account, acquisition, entry).await?;
//! ```
//!
//! # Modules
//!
//! - `controller`: Asynchronous request handling (main entry point)
//! - `profiles`: Profile store and per-profile preferences
//! - `accounts`: Account store and per-account credentials
//! - `books`: Feed entries, book database, status registry
//! - `events`: Event types and the broadcast bus
//! - `provider`: Account provider descriptions
//! - `download`, `http`, `drm`: Collaborators used by the controller
//! - `storage`: Atomic file persistence
//! - `config`: Application configuration

pub mod accounts;
pub mod books;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod download;
pub mod drm;
pub mod events;
pub mod http;
pub mod ids;
pub mod profiles;
pub mod provider;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use accounts::{Account, AccountsDatabase, AccountsDatabaseError};
pub use books::{
    Acquisition, AcquisitionType, BookDatabase, BookRecord, BookRegistry, BookStatus,
    BookStatusEvent, BorrowError, FeedEntry, RevokeError,
};
pub use config::Config;
pub use controller::{Controller, ControllerServices, LoginTarget};
pub use credentials::{AdobeCredentials, Credentials, HttpAuth};
pub use events::{AccountEvent, EventBus, ProfileEvent, Subscription};
pub use ids::{AccountId, BookId, ProfileId};
pub use profiles::{Profile, ProfileDatabaseError, ProfilesDatabase, ProfilesMode};
pub use provider::{AccountProvider, AccountProviderRegistry, StaticProviderRegistry};
pub use storage::{StorageError, StorageResult};
