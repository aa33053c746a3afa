use m3u::Channel;

/// MIME type a sink must report to play HLS without a software engine.
pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// How a request's URL is to be fed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Segmented adaptive stream (`.m3u8`).
    Adaptive,
    /// Anything the sink can open directly.
    Progressive,
}

impl SourceKind {
    pub fn for_url(url: &str) -> Self {
        if is_adaptive_url(url) {
            Self::Adaptive
        } else {
            Self::Progressive
        }
    }
}

/// Whether a URL follows the `.m3u8` naming convention. Query strings and
/// fragments are tolerated.
pub fn is_adaptive_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains(".m3u8")
}

/// A request to play one channel. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    url: String,
    display_name: String,
    group: String,
}

impl PlaybackRequest {
    pub fn new(
        url: impl Into<String>,
        display_name: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.into(),
            group: group.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn source_kind(&self) -> SourceKind {
        SourceKind::for_url(&self.url)
    }
}

impl From<&Channel> for PlaybackRequest {
    fn from(channel: &Channel) -> Self {
        Self::new(&channel.url, &channel.name, &channel.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_detection() {
        assert_eq!(
            SourceKind::for_url("https://x/live.m3u8"),
            SourceKind::Adaptive
        );
        assert_eq!(
            SourceKind::for_url("https://x/LIVE.M3U8?token=abc"),
            SourceKind::Adaptive
        );
        assert_eq!(
            SourceKind::for_url("https://x/stream.mp4"),
            SourceKind::Progressive
        );
        assert_eq!(
            SourceKind::for_url("rtmp://x/live"),
            SourceKind::Progressive
        );
    }

    #[test]
    fn test_request_from_channel() {
        let mut channel = Channel::new("Alpha", "https://x/a.m3u8");
        channel.group = "News".to_string();
        let request = PlaybackRequest::from(&channel);
        assert_eq!(request.url(), "https://x/a.m3u8");
        assert_eq!(request.display_name(), "Alpha");
        assert_eq!(request.group(), "News");
        assert_eq!(request.source_kind(), SourceKind::Adaptive);
    }
}
