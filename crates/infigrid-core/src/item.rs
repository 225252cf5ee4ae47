#![forbid(unsafe_code)]

//! Grid items as supplied by the host.

use serde::{Deserialize, Serialize};

/// Identity of an item: its index in the ordered item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u32);

/// Image reference: either a bare URL or `{ src, alt }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    Url(String),
    Described {
        src: String,
        #[serde(default)]
        alt: String,
    },
}

impl ImageSource {
    /// URL used as the resource cache key.
    #[must_use]
    pub fn src(&self) -> &str {
        match self {
            Self::Url(src) | Self::Described { src, .. } => src,
        }
    }

    #[must_use]
    pub fn alt(&self) -> Option<&str> {
        match self {
            Self::Described { alt, .. } if !alt.is_empty() => Some(alt),
            _ => None,
        }
    }
}

/// One entry of the dataset. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridItem {
    pub title: String,
    pub href: String,
    pub image: ImageSource,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GridItem {
    /// Title as shown on the card.
    #[must_use]
    pub fn display_title(&self) -> String {
        self.title.to_uppercase()
    }

    /// Tags joined for the card's caption line.
    #[must_use]
    pub fn caption(&self) -> String {
        self.tags.join(" — ")
    }
}
