use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

use super::{MediaSink, MediaSource, SINK_EVENT_CAPACITY, SinkError, SinkEvent, SourceId};
use crate::request::HLS_MIME_TYPE;

/// Behaviour switches for [`MemorySink`].
#[derive(Debug, Clone)]
pub struct MemorySinkOptions {
    /// Report native HLS support from `can_play_type`.
    pub native_hls: bool,
    /// Allow `play()` without prior user interaction.
    pub autoplay: bool,
    pub fullscreen_supported: bool,
}

impl Default for MemorySinkOptions {
    fn default() -> Self {
        Self {
            native_hls: false,
            autoplay: true,
            fullscreen_supported: true,
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    source: Option<MediaSource>,
    source_history: Vec<Option<MediaSource>>,
    paused: bool,
    volume: f64,
    fullscreen: bool,
    chunks: usize,
    buffered_bytes: usize,
    decoder_resets: u32,
}

impl MemoryState {
    fn check_bound(&self, source: SourceId) -> Result<(), SinkError> {
        match &self.source {
            None => Err(SinkError::NoSource),
            Some(MediaSource::Adaptive { id, .. }) if *id == source => Ok(()),
            Some(_) => Err(SinkError::Detached),
        }
    }
}

/// A headless sink that keeps everything in memory.
///
/// `play()` succeeds as soon as any source is bound and immediately reports
/// `Playing`; other signals can be injected with [`MemorySink::emit`].
pub struct MemorySink {
    options: MemorySinkOptions,
    state: Mutex<MemoryState>,
    events: broadcast::Sender<SinkEvent>,
}

impl MemorySink {
    pub fn new(options: MemorySinkOptions) -> Self {
        let (events, _) = broadcast::channel(SINK_EVENT_CAPACITY);
        Self {
            options,
            state: Mutex::new(MemoryState {
                source: None,
                source_history: Vec::new(),
                paused: true,
                volume: 1.0,
                fullscreen: false,
                chunks: 0,
                buffered_bytes: 0,
                decoder_resets: 0,
            }),
            events,
        }
    }

    /// Broadcast a signal as if the underlying output produced it.
    pub fn emit(&self, event: SinkEvent) {
        trace!(?event, "Memory sink event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Every source binding change, `None` for a detach.
    pub fn source_history(&self) -> Vec<Option<MediaSource>> {
        self.state.lock().source_history.clone()
    }

    pub fn chunks_appended(&self) -> usize {
        self.state.lock().chunks
    }

    pub fn buffered_bytes(&self) -> usize {
        self.state.lock().buffered_bytes
    }

    pub fn decoder_resets(&self) -> u32 {
        self.state.lock().decoder_resets
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(MemorySinkOptions::default())
    }
}

impl MediaSink for MemorySink {
    fn set_source(&self, source: MediaSource) {
        let mut state = self.state.lock();
        state.source_history.push(Some(source.clone()));
        state.source = Some(source);
        state.buffered_bytes = 0;
    }

    fn clear_source(&self) {
        let mut state = self.state.lock();
        state.source = None;
        state.source_history.push(None);
        state.buffered_bytes = 0;
    }

    fn source(&self) -> Option<MediaSource> {
        self.state.lock().source.clone()
    }

    fn can_play_type(&self, mime: &str) -> bool {
        if mime.eq_ignore_ascii_case(HLS_MIME_TYPE) {
            self.options.native_hls
        } else {
            true
        }
    }

    fn append(&self, source: SourceId, chunk: Bytes) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.check_bound(source)?;
        state.chunks += 1;
        state.buffered_bytes += chunk.len();
        Ok(())
    }

    fn reset_decoder(&self, source: SourceId) {
        let mut state = self.state.lock();
        if state.check_bound(source).is_ok() {
            state.decoder_resets += 1;
            state.buffered_bytes = 0;
        }
    }

    fn end_of_stream(&self, source: SourceId) {
        let bound = self.state.lock().check_bound(source).is_ok();
        if bound {
            self.emit(SinkEvent::Ended);
        }
    }

    fn play(&self) -> Result<(), SinkError> {
        {
            let mut state = self.state.lock();
            if state.source.is_none() {
                return Err(SinkError::NoSource);
            }
            if !self.options.autoplay {
                return Err(SinkError::not_allowed("autoplay requires user interaction"));
            }
            state.paused = false;
        }
        self.emit(SinkEvent::Play);
        self.emit(SinkEvent::Playing);
        Ok(())
    }

    fn pause(&self) {
        let changed = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.paused, true)
        };
        if changed {
            self.emit(SinkEvent::Pause);
        }
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        let changed = {
            let mut state = self.state.lock();
            let changed = state.volume != volume;
            state.volume = volume;
            changed
        };
        if changed {
            self.emit(SinkEvent::VolumeChanged(volume));
        }
    }

    fn is_fullscreen(&self) -> bool {
        self.state.lock().fullscreen
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<(), SinkError> {
        if !self.options.fullscreen_supported {
            return Err(SinkError::Unsupported {
                feature: "fullscreen",
            });
        }
        self.state.lock().fullscreen = fullscreen;
        self.emit(SinkEvent::FullscreenChanged(fullscreen));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_requires_source() {
        let sink = MemorySink::default();
        assert!(matches!(sink.play(), Err(SinkError::NoSource)));

        sink.set_source(MediaSource::Progressive("https://x/a.mp4".into()));
        let mut events = sink.subscribe();
        sink.play().unwrap();
        assert!(!sink.is_paused());
        assert_eq!(events.try_recv().unwrap(), SinkEvent::Play);
        assert_eq!(events.try_recv().unwrap(), SinkEvent::Playing);
    }

    #[test]
    fn test_autoplay_refusal() {
        let sink = MemorySink::new(MemorySinkOptions {
            autoplay: false,
            ..Default::default()
        });
        sink.set_source(MediaSource::Progressive("https://x/a.mp4".into()));
        assert!(matches!(sink.play(), Err(SinkError::NotAllowed { .. })));
        assert!(sink.is_paused());
    }

    #[test]
    fn test_volume_is_clamped_and_announced() {
        let sink = MemorySink::default();
        let mut events = sink.subscribe();
        sink.set_volume(1.7);
        assert_eq!(sink.volume(), 1.0);
        assert!(events.try_recv().is_err());

        sink.set_volume(-0.5);
        assert_eq!(sink.volume(), 0.0);
        assert_eq!(events.try_recv().unwrap(), SinkEvent::VolumeChanged(0.0));
    }

    #[test]
    fn test_append_only_on_adaptive_source() {
        let sink = MemorySink::default();
        let adaptive = MediaSource::adaptive("https://x/a.m3u8");
        let id = adaptive.adaptive_id().unwrap();
        assert!(matches!(
            sink.append(id, Bytes::from_static(b"ts")),
            Err(SinkError::NoSource)
        ));

        sink.set_source(MediaSource::Progressive("https://x/a.mp4".into()));
        assert!(matches!(
            sink.append(id, Bytes::from_static(b"ts")),
            Err(SinkError::Detached)
        ));

        sink.set_source(adaptive);
        sink.append(id, Bytes::from_static(b"ts")).unwrap();
        assert_eq!(sink.chunks_appended(), 1);
        assert_eq!(sink.buffered_bytes(), 2);
    }

    #[test]
    fn test_replaced_binding_rejects_old_engine() {
        let sink = MemorySink::default();
        let mut events = sink.subscribe();
        let old = MediaSource::adaptive("https://x/live.m3u8");
        let old_id = old.adaptive_id().unwrap();
        sink.set_source(old);
        sink.clear_source();

        // Same URL, new attach.
        let new = MediaSource::adaptive("https://x/live.m3u8");
        let new_id = new.adaptive_id().unwrap();
        sink.set_source(new);

        assert!(matches!(
            sink.append(old_id, Bytes::from_static(b"OLD-SESSION-DATA")),
            Err(SinkError::Detached)
        ));
        sink.reset_decoder(old_id);
        sink.end_of_stream(old_id);
        assert_eq!(sink.chunks_appended(), 0);
        assert_eq!(sink.decoder_resets(), 0);
        assert!(events.try_recv().is_err());

        sink.append(new_id, Bytes::from_static(b"new")).unwrap();
        assert_eq!(sink.buffered_bytes(), 3);
    }
}
