//! Overlay presentation state.
//!
//! Everything here is derived from the sink's own signals plus local user
//! intent. Nothing in this module reads or writes session state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::config::OverlayConfig;
use crate::sink::{MediaSink, SinkError, SinkEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Hidden,
    Full,
    Mini,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    pub is_playing: bool,
    pub volume: f64,
    pub is_fullscreen: bool,
    pub controls_visible: bool,
    pub captions_enabled: bool,
    pub display_mode: DisplayMode,
    /// A rating or review dialog is covering the player.
    pub modal_open: bool,
}

pub struct OverlayController {
    sink: Arc<dyn MediaSink>,
    state: Arc<watch::Sender<OverlayState>>,
    activity: Arc<Notify>,
    task: JoinHandle<()>,
}

impl OverlayController {
    /// Start mirroring `sink`. Must be called from within a tokio runtime.
    pub fn new(sink: Arc<dyn MediaSink>, config: &OverlayConfig) -> Self {
        let initial = OverlayState {
            is_playing: !sink.is_paused(),
            volume: sink.volume(),
            is_fullscreen: sink.is_fullscreen(),
            controls_visible: true,
            captions_enabled: false,
            display_mode: DisplayMode::Hidden,
            modal_open: false,
        };
        let state = Arc::new(watch::Sender::new(initial));
        let activity = Arc::new(Notify::new());
        let task = tokio::spawn(observe(
            sink.subscribe(),
            Arc::clone(&state),
            Arc::clone(&activity),
            config.controls_hide_after,
        ));
        Self {
            sink,
            state,
            activity,
            task,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayState> {
        self.state.subscribe()
    }

    pub fn toggle_play(&self) -> Result<(), SinkError> {
        if self.sink.is_paused() {
            self.sink.play()
        } else {
            self.sink.pause();
            Ok(())
        }
    }

    pub fn set_volume(&self, volume: f64) {
        self.sink.set_volume(volume);
    }

    pub fn toggle_fullscreen(&self) -> Result<(), SinkError> {
        self.sink.set_fullscreen(!self.sink.is_fullscreen())
    }

    /// Flip the captions flag and return the new value.
    pub fn toggle_captions(&self) -> bool {
        let mut enabled = false;
        self.state.send_modify(|s| {
            s.captions_enabled = !s.captions_enabled;
            enabled = s.captions_enabled;
        });
        enabled
    }

    /// Pointer moved over the player: show controls and restart the hide timer.
    pub fn on_pointer_activity(&self) {
        self.state.send_if_modified(|s| !std::mem::replace(&mut s.controls_visible, true));
        self.activity.notify_one();
    }

    pub fn set_modal_open(&self, open: bool) {
        self.state.send_if_modified(|s| std::mem::replace(&mut s.modal_open, open) != open);
        self.activity.notify_one();
    }

    pub fn set_display_mode(&self, mode: DisplayMode) {
        self.state.send_if_modified(|s| {
            let changed = s.display_mode != mode || !s.controls_visible;
            s.display_mode = mode;
            s.controls_visible = true;
            changed
        });
        self.activity.notify_one();
    }
}

impl Drop for OverlayController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn hides_controls(state: &OverlayState) -> bool {
    state.display_mode == DisplayMode::Full && !state.modal_open
}

async fn observe(
    mut events: tokio::sync::broadcast::Receiver<SinkEvent>,
    state: Arc<watch::Sender<OverlayState>>,
    activity: Arc<Notify>,
    hide_after: Duration,
) {
    let mut hide_at: Option<Instant> = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => mirror(&state, event),
                Err(RecvError::Lagged(skipped)) => trace!(skipped, "Overlay lagged behind sink"),
                Err(RecvError::Closed) => break,
            },
            _ = activity.notified() => {
                hide_at = hides_controls(&state.borrow()).then(|| Instant::now() + hide_after);
            }
            _ = tokio::time::sleep_until(hide_at.unwrap_or_else(Instant::now)), if hide_at.is_some() => {
                hide_at = None;
                state.send_if_modified(|s| {
                    if hides_controls(s) && s.controls_visible {
                        s.controls_visible = false;
                        true
                    } else {
                        false
                    }
                });
            }
        }
    }
}

fn mirror(state: &watch::Sender<OverlayState>, event: SinkEvent) {
    state.send_if_modified(|s| match event {
        SinkEvent::Play | SinkEvent::Playing => !std::mem::replace(&mut s.is_playing, true),
        SinkEvent::Pause | SinkEvent::Ended => std::mem::replace(&mut s.is_playing, false),
        SinkEvent::VolumeChanged(volume) => {
            let changed = s.volume != volume;
            s.volume = volume;
            changed
        }
        SinkEvent::FullscreenChanged(fullscreen) => {
            std::mem::replace(&mut s.is_fullscreen, fullscreen) != fullscreen
        }
        SinkEvent::Waiting | SinkEvent::Error(_) => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MediaSource, MemorySink, MemorySinkOptions};

    fn overlay(sink: &Arc<MemorySink>) -> OverlayController {
        OverlayController::new(sink.clone(), &OverlayConfig::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mirrors_sink_signals() {
        let sink = Arc::new(MemorySink::default());
        sink.set_source(MediaSource::Progressive("https://x/a.mp4".into()));
        let overlay = overlay(&sink);
        assert!(!overlay.state().is_playing);

        overlay.toggle_play().unwrap();
        settle().await;
        assert!(overlay.state().is_playing);

        overlay.toggle_play().unwrap();
        settle().await;
        assert!(!overlay.state().is_playing);

        overlay.set_volume(0.25);
        settle().await;
        assert_eq!(overlay.state().volume, 0.25);

        overlay.toggle_fullscreen().unwrap();
        settle().await;
        assert!(overlay.state().is_fullscreen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_hide_after_idle_in_full_mode() {
        let sink = Arc::new(MemorySink::default());
        let overlay = overlay(&sink);
        overlay.set_display_mode(DisplayMode::Full);
        overlay.on_pointer_activity();
        settle().await;

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(overlay.state().controls_visible);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!overlay.state().controls_visible);

        overlay.on_pointer_activity();
        assert!(overlay.state().controls_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_modal_keeps_controls() {
        let sink = Arc::new(MemorySink::default());
        let overlay = overlay(&sink);
        overlay.set_display_mode(DisplayMode::Full);
        overlay.set_modal_open(true);
        overlay.on_pointer_activity();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(overlay.state().controls_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mini_mode_never_hides_controls() {
        let sink = Arc::new(MemorySink::default());
        let overlay = overlay(&sink);
        overlay.set_display_mode(DisplayMode::Mini);
        overlay.on_pointer_activity();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(overlay.state().controls_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fullscreen_unsupported() {
        let sink = Arc::new(MemorySink::new(MemorySinkOptions {
            fullscreen_supported: false,
            ..Default::default()
        }));
        let overlay = overlay(&sink);
        assert!(matches!(
            overlay.toggle_fullscreen(),
            Err(SinkError::Unsupported { .. })
        ));
        assert!(!overlay.state().is_fullscreen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_captions() {
        let sink = Arc::new(MemorySink::default());
        let overlay = overlay(&sink);
        assert!(overlay.toggle_captions());
        assert!(overlay.state().captions_enabled);
        assert!(!overlay.toggle_captions());
    }
}
