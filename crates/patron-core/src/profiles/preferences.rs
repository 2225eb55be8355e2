//! Profile preferences

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Preferences stored with each profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Used to pick a provider's under-13 catalog
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub reader: ReaderPreferences,
}

impl Preferences {
    #[must_use]
    pub fn with_date_of_birth(mut self, date_of_birth: Option<NaiveDate>) -> Self {
        self.date_of_birth = date_of_birth;
        self
    }
}

/// Reader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderPreferences {
    pub font_family: FontFamily,
    /// Font size in percent of the default
    pub font_scale: u16,
    pub color_scheme: ColorScheme,
}

impl Default for ReaderPreferences {
    fn default() -> Self {
        Self {
            font_family: FontFamily::Serif,
            font_scale: 100,
            color_scheme: ColorScheme::BlackOnWhite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontFamily {
    Serif,
    SansSerif,
    OpenDyslexic,
    Monospace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    BlackOnWhite,
    BlackOnSepia,
    WhiteOnBlack,
}

impl fmt::Display for FontFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FontFamily::Serif => "serif",
            FontFamily::SansSerif => "sans_serif",
            FontFamily::OpenDyslexic => "open_dyslexic",
            FontFamily::Monospace => "monospace",
        })
    }
}

impl FromStr for FontFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serif" => Ok(FontFamily::Serif),
            "sans_serif" => Ok(FontFamily::SansSerif),
            "open_dyslexic" => Ok(FontFamily::OpenDyslexic),
            "monospace" => Ok(FontFamily::Monospace),
            _ => Err(format!("Unknown font family: {}", s)),
        }
    }
}

impl fmt::Display for ColorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColorScheme::BlackOnWhite => "black_on_white",
            ColorScheme::BlackOnSepia => "black_on_sepia",
            ColorScheme::WhiteOnBlack => "white_on_black",
        })
    }
}

impl FromStr for ColorScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "black_on_white" => Ok(ColorScheme::BlackOnWhite),
            "black_on_sepia" => Ok(ColorScheme::BlackOnSepia),
            "white_on_black" => Ok(ColorScheme::WhiteOnBlack),
            _ => Err(format!("Unknown color scheme: {}", s)),
        }
    }
}
