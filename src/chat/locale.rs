//! Translation table keyed by translation key.
//!
//! Each entry declares the protocol versions whose clients render the key
//! natively, and a per-locale format string used when they cannot.
//!
//! ```json
//! {
//!   "multiplayer.disconnect.outdated_client": {
//!     "versions": ["47-"],
//!     "translations": { "en_us": "Outdated client! Please use %s" }
//!   }
//! }
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::protocol::version::{check_version, VersionSpec};

const BUNDLED_LOCALES: &str = include_str!("../../assets/locales.json");

/// One translation key
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocaleEntry {
    pub versions: Vec<VersionSpec>,
    pub translations: HashMap<String, String>,
}

impl LocaleEntry {
    /// Whether clients speaking `protocol_version` know this key
    pub fn supports(&self, protocol_version: i32) -> bool {
        check_version(protocol_version, &self.versions)
    }

    pub fn translation(&self, locale: &str) -> Option<&str> {
        self.translations.get(locale).map(String::as_str)
    }
}

/// Read-only translation table, built once and shared through the server context
#[derive(Debug, Clone, Default)]
pub struct LocaleTable {
    entries: HashMap<String, LocaleEntry>,
}

impl LocaleTable {
    /// Parse and validate a locale document
    ///
    /// # Errors
    /// `InvalidLocale` for a malformed locale tag or an empty translation set,
    /// `Json` if the document does not parse.
    pub fn from_json(text: &str) -> Result<Self> {
        let entries: HashMap<String, LocaleEntry> = serde_json::from_str(text)?;

        for (key, entry) in &entries {
            if entry.translations.is_empty() {
                return Err(ProtocolError::InvalidLocale(format!(
                    "'{key}' has no translations"
                )));
            }
            if let Some(tag) = entry.translations.keys().find(|tag| !is_locale_tag(tag)) {
                return Err(ProtocolError::InvalidLocale(format!(
                    "'{key}' has malformed locale tag '{tag}'"
                )));
            }
        }

        debug!(keys = entries.len(), "Loaded locale table");
        Ok(Self { entries })
    }

    /// The table shipped with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_LOCALES)
    }

    pub fn get(&self, key: &str) -> Option<&LocaleEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `ll_cc`: 2-3 lowercase letters, underscore, 2-3 lowercase letters or digits
pub fn is_locale_tag(tag: &str) -> bool {
    let Some((language, region)) = tag.split_once('_') else {
        return false;
    };
    (2..=3).contains(&language.len())
        && language.bytes().all(|b| b.is_ascii_lowercase())
        && (2..=3).contains(&region.len())
        && region
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}
