//! # m3u
//!
//! Parsing and fetching of EXTM3U channel lists, the format used by public
//! IPTV directories.
//!
//! ```text
//! #EXTM3U
//! #EXTINF:-1 tvg-logo="https://x/logo.png" group-title="News",Channel One
//! https://x/one/live.m3u8
//! ```
//!
//! The parser is lenient: entries without a name or without a URL line are
//! dropped silently, and missing attributes fall back to the defaults exposed
//! in [`channel`].

pub mod catalog;
pub mod channel;
pub mod error;
pub mod parser;

pub use catalog::{ChannelCatalog, DEFAULT_PLAYLIST_URL};
pub use channel::Channel;
pub use error::CatalogError;
pub use parser::parse_channels;
