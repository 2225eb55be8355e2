//! Identifiers for profiles, accounts and books
//!
//! Profile and account ids are plain non-negative integers handed out as
//! `max(existing) + 1`. Their magnitude carries no meaning beyond ordering
//! of allocation. Book ids are derived from feed entry ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Create an id from its raw value
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The raw value
            pub const fn value(self) -> u64 {
                self.0
            }

            /// The first id of a namespace
            pub const fn first() -> Self {
                Self(0)
            }

            /// The id following this one
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a profile, unique within a profile database
    ProfileId
);

numeric_id!(
    /// Identifier of an account, unique within its profile
    AccountId
);

/// Allocate the next id for a namespace
///
/// Returns `max(existing, high_water) + 1`, or the first id when nothing has
/// been allocated. `high_water` is the highest id ever handed out by this
/// process, so deleted ids are never reused while it runs.
pub(crate) fn allocate<I>(existing: I, high_water: Option<u64>) -> u64
where
    I: IntoIterator<Item = u64>,
{
    existing
        .into_iter()
        .chain(high_water)
        .max()
        .map_or(0, |max| max + 1)
}

/// Error parsing a book id
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid book id '{0}': expected 64 lowercase hex characters")]
pub struct BookIdError(String);

/// Identifier of a book: the hex SHA-256 of its feed entry id
///
/// Book ids double as directory names inside a book database, so they are
/// restricted to lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookId(String);

impl BookId {
    /// Derive the book id for a feed entry id
    pub fn for_entry(entry_id: &str) -> Self {
        let digest = Sha256::digest(entry_id.as_bytes());
        Self(hex::encode(digest))
    }

    /// Parse an existing book id
    pub fn parse(value: &str) -> Result<Self, BookIdError> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(BookIdError(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs and listings
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BookId {
    type Err = BookIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BookId {
    type Error = BookIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BookId> for String {
    fn from(id: BookId) -> Self {
        id.0
    }
}
