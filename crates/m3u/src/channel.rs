use serde::{Deserialize, Serialize};

/// Group used when an entry carries no `group-title` attribute.
pub const DEFAULT_GROUP: &str = "General";
/// Country used when an entry carries no `tvg-country` attribute.
pub const DEFAULT_COUNTRY: &str = "Global";
/// Language used when an entry carries no `tvg-language` attribute.
pub const DEFAULT_LANGUAGE: &str = "Multilingual";

/// A single playable channel from a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    /// Logo URL, empty when the playlist does not provide one.
    pub logo: String,
    pub url: String,
    pub group: String,
    pub country: String,
    pub language: String,
}

impl Channel {
    /// Create a channel with default metadata.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logo: String::new(),
            url: url.into(),
            group: DEFAULT_GROUP.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Whether the channel points at an HLS manifest.
    pub fn is_hls(&self) -> bool {
        self.url.to_ascii_lowercase().contains(".m3u8")
    }
}
