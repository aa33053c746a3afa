//! EXTM3U channel list parser.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::channel::{Channel, DEFAULT_COUNTRY, DEFAULT_GROUP, DEFAULT_LANGUAGE};

const EXTINF_PREFIX: &str = "#EXTINF:";

/// Name used when an `#EXTINF:` line has no comma-separated title at all.
pub const UNKNOWN_CHANNEL_NAME: &str = "Unknown Channel";

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z0-9_-]+)="([^"]*)""#).expect("attribute pattern is valid")
});

/// Metadata collected from an `#EXTINF:` line while waiting for its URL line.
#[derive(Debug, Default)]
struct PendingEntry {
    name: String,
    attributes: HashMap<String, String>,
}

impl PendingEntry {
    fn from_extinf(line: &str) -> Self {
        let body = &line[EXTINF_PREFIX.len()..];
        let name = match body.rsplit_once(',') {
            Some((_, title)) => title.trim().to_string(),
            None => UNKNOWN_CHANNEL_NAME.to_string(),
        };
        let attributes = ATTRIBUTE_RE
            .captures_iter(body)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect();
        Self { name, attributes }
    }

    fn attribute_or(&self, key: &str, default: &str) -> String {
        self.attributes
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn into_channel(self, url: &str) -> Option<Channel> {
        if self.name.is_empty() || url.is_empty() {
            return None;
        }
        Some(Channel {
            logo: self.attributes.get("tvg-logo").cloned().unwrap_or_default(),
            group: self.attribute_or("group-title", DEFAULT_GROUP),
            country: self.attribute_or("tvg-country", DEFAULT_COUNTRY),
            language: self.attribute_or("tvg-language", DEFAULT_LANGUAGE),
            name: self.name,
            url: url.to_string(),
        })
    }
}

/// Parse an EXTM3U document into channels, preserving playlist order.
///
/// An `#EXTINF:` line opens an entry which is completed by the next line that
/// starts with `http`. An entry that is followed by another `#EXTINF:` line
/// before any URL is discarded, as is a URL line with no preceding metadata.
pub fn parse_channels(content: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<PendingEntry> = None;
    let mut dropped = 0usize;

    for line in content.lines().map(str::trim) {
        if line.starts_with(EXTINF_PREFIX) {
            if pending.is_some() {
                dropped += 1;
            }
            pending = Some(PendingEntry::from_extinf(line));
        } else if line.starts_with("http") {
            match pending.take().and_then(|entry| entry.into_channel(line)) {
                Some(channel) => channels.push(channel),
                None => {
                    trace!(url = %line, "Skipping URL without usable metadata");
                    dropped += 1;
                }
            }
        }
    }
    if pending.is_some() {
        dropped += 1;
    }

    debug!(
        channels = channels.len(),
        dropped = dropped,
        "Parsed channel playlist"
    );
    channels
}
