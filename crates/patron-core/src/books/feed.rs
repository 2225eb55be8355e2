//! Feed entries and acquisitions
//!
//! A trimmed view of an OPDS entry: only what borrowing and revocation need.
//! Parsing feeds happens elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ids::BookId;

/// Content type of an Adobe DRM fulfillment token
pub const ADOBE_ACSM_CONTENT_TYPE: &str = "application/vnd.adobe.adept+xml";

/// Content type of an EPUB
pub const EPUB_CONTENT_TYPE: &str = "application/epub+zip";

/// How a book may be obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionType {
    Borrow,
    OpenAccess,
    Generic,
    Sample,
    Buy,
    Subscribe,
}

impl AcquisitionType {
    /// Preference rank when choosing among several acquisitions; lower wins
    pub fn priority(self) -> u8 {
        match self {
            AcquisitionType::Borrow => 0,
            AcquisitionType::OpenAccess => 1,
            AcquisitionType::Generic => 2,
            AcquisitionType::Sample => 3,
            AcquisitionType::Buy => 4,
            AcquisitionType::Subscribe => 5,
        }
    }

    /// Whether the acquisition can be downloaded without a remote loan step
    pub fn is_direct(self) -> bool {
        matches!(self, AcquisitionType::OpenAccess | AcquisitionType::Generic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionType::Borrow => "borrow",
            AcquisitionType::OpenAccess => "open-access",
            AcquisitionType::Generic => "generic",
            AcquisitionType::Sample => "sample",
            AcquisitionType::Buy => "buy",
            AcquisitionType::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for AcquisitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AcquisitionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrow" => Ok(AcquisitionType::Borrow),
            "open-access" => Ok(AcquisitionType::OpenAccess),
            "generic" => Ok(AcquisitionType::Generic),
            "sample" => Ok(AcquisitionType::Sample),
            "buy" => Ok(AcquisitionType::Buy),
            "subscribe" => Ok(AcquisitionType::Subscribe),
            other => Err(format!("unknown acquisition type '{}'", other)),
        }
    }
}

/// A typed acquisition link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acquisition {
    pub kind: AcquisitionType,
    pub uri: Url,
    /// Declared content type of the resource behind `uri`
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Acquisition {
    pub fn new(kind: AcquisitionType, uri: Url) -> Self {
        Self {
            kind,
            uri,
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether fetching this link yields a DRM token rather than the book
    pub fn yields_drm_token(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|t| is_content_type(t, ADOBE_ACSM_CONTENT_TYPE))
    }
}

/// The parts of an OPDS entry kept alongside a borrowed book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// The entry's `<id>`
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub acquisitions: Vec<Acquisition>,
    /// Link used to return a loan early
    #[serde(default)]
    pub revoke_uri: Option<Url>,
}

impl FeedEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            acquisitions: Vec::new(),
            revoke_uri: None,
        }
    }

    #[must_use]
    pub fn with_acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisitions.push(acquisition);
        self
    }

    pub fn book_id(&self) -> BookId {
        BookId::for_entry(&self.id)
    }

    /// The best acquisition of this entry
    ///
    /// Priority: borrow, open-access, generic, sample, buy, subscribe. Among
    /// acquisitions of the same type the first one listed wins.
    pub fn preferred_acquisition(&self) -> Option<&Acquisition> {
        let mut best: Option<&Acquisition> = None;
        for acquisition in &self.acquisitions {
            match best {
                Some(current) if current.kind.priority() <= acquisition.kind.priority() => {}
                _ => best = Some(acquisition),
            }
        }
        best
    }
}

/// Compare content types ignoring parameters and case
pub fn is_content_type(actual: &str, expected: &str) -> bool {
    actual
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(expected))
}
