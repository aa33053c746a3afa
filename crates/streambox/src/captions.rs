//! Live captions from a speech recognizer bound to the audio output.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CaptionConfig;
use crate::overlay::DisplayMode;

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("speech recognition is unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("speech recognizer failed to start: {reason}")]
    Start { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    pub fn finished(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Results changed from `result_index` onwards.
    Result {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    Error(String),
    /// The recognizer stopped listening on its own.
    End,
}

/// A continuous speech-to-text source.
pub trait SpeechRecognizer: Send + Sync {
    fn start(
        &self,
        options: &RecognitionOptions,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, CaptionError>;

    fn stop(&self);
}

struct Listener {
    id: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Toggle {
    enabled: bool,
    mode: DisplayMode,
    listener: Option<Listener>,
    next_listener: u64,
}

/// Keeps `live_caption` in sync with a recognizer while captions are on and
/// the player is shown in full. Without a recognizer it stays silent.
pub struct CaptionEngine {
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    config: CaptionConfig,
    caption: Arc<watch::Sender<String>>,
    toggle: Arc<Mutex<Toggle>>,
}

impl CaptionEngine {
    pub fn new(recognizer: Option<Arc<dyn SpeechRecognizer>>, config: CaptionConfig) -> Self {
        Self {
            recognizer,
            config,
            caption: Arc::new(watch::Sender::new(String::new())),
            toggle: Arc::new(Mutex::new(Toggle {
                enabled: false,
                mode: DisplayMode::Hidden,
                listener: None,
                next_listener: 0,
            })),
        }
    }

    pub fn caption(&self) -> String {
        self.caption.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.caption.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.toggle.lock().listener.is_some()
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut toggle = self.toggle.lock();
        toggle.enabled = enabled;
        self.reconcile(&mut toggle);
    }

    pub fn set_display_mode(&self, mode: DisplayMode) {
        let mut toggle = self.toggle.lock();
        toggle.mode = mode;
        self.reconcile(&mut toggle);
    }

    pub fn shutdown(&self) {
        self.set_enabled(false);
    }

    fn reconcile(&self, toggle: &mut Toggle) {
        let active = toggle.enabled && toggle.mode == DisplayMode::Full;
        match (active, toggle.listener.is_some()) {
            (true, false) => {
                let Some(recognizer) = self.recognizer.clone() else {
                    return;
                };
                toggle.next_listener += 1;
                let id = toggle.next_listener;
                let token = CancellationToken::new();
                let listen = Listen {
                    recognizer,
                    options: RecognitionOptions {
                        language: self.config.language.clone(),
                        continuous: true,
                        interim_results: self.config.interim_results,
                    },
                    caption: Arc::clone(&self.caption),
                    token: token.clone(),
                    clear_after: self.config.clear_after,
                    toggle: Arc::downgrade(&self.toggle),
                    id,
                };
                let task = tokio::spawn(listen.run());
                toggle.listener = Some(Listener { id, token, task });
            }
            (false, true) => {
                if let Some(listener) = toggle.listener.take() {
                    listener.token.cancel();
                    listener.task.abort();
                }
                if let Some(recognizer) = &self.recognizer {
                    recognizer.stop();
                }
                self.caption.send_replace(String::new());
            }
            _ => {}
        }
    }
}

impl Drop for CaptionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Listen {
    recognizer: Arc<dyn SpeechRecognizer>,
    options: RecognitionOptions,
    caption: Arc<watch::Sender<String>>,
    token: CancellationToken,
    clear_after: Duration,
    toggle: Weak<Mutex<Toggle>>,
    id: u64,
}

impl Listen {
    async fn run(self) {
        self.recognize().await;
        if self.token.is_cancelled() {
            return;
        }
        // Recognizer gave up: free the slot for the next toggle.
        self.caption.send_replace(String::new());
        if let Some(toggle) = self.toggle.upgrade() {
            let mut toggle = toggle.lock();
            if toggle.listener.as_ref().is_some_and(|l| l.id == self.id) {
                toggle.listener = None;
            }
        }
    }

    async fn recognize(&self) {
        let mut events = match self.recognizer.start(&self.options) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Live captions unavailable");
                return;
            }
        };
        let mut clear_at: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => return,

                _ = tokio::time::sleep_until(clear_at.unwrap_or_else(Instant::now)), if clear_at.is_some() => {
                    clear_at = None;
                    self.caption.send_replace(String::new());
                }

                event = events.recv() => match event {
                    Some(RecognitionEvent::Result { result_index, results }) => {
                        let text: String = results
                            .iter()
                            .skip(result_index)
                            .map(|r| r.transcript.as_str())
                            .collect();
                        self.caption.send_replace(text);
                        if results.last().is_some_and(|r| r.is_final) {
                            clear_at = Some(Instant::now() + self.clear_after);
                        }
                    }
                    Some(RecognitionEvent::Error(message)) => {
                        warn!(error = %message, "Speech recognition error");
                    }
                    Some(RecognitionEvent::End) | None => {
                        debug!("Speech recognizer ended, restarting");
                        match self.recognizer.start(&self.options) {
                            Ok(restarted) => events = restarted,
                            Err(e) => {
                                warn!(error = %e, "Could not restart speech recognizer");
                                return;
                            }
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeRecognizer {
        senders: Mutex<Vec<mpsc::UnboundedSender<RecognitionEvent>>>,
        options: Mutex<Option<RecognitionOptions>>,
        stops: Mutex<u32>,
        failing: Mutex<bool>,
        attempts: Mutex<u32>,
    }

    impl FakeRecognizer {
        fn starts(&self) -> usize {
            self.senders.lock().len()
        }

        fn stops(&self) -> u32 {
            *self.stops.lock()
        }

        fn fail_starts(&self, failing: bool) {
            *self.failing.lock() = failing;
        }

        fn send(&self, event: RecognitionEvent) {
            if let Some(tx) = self.senders.lock().last() {
                let _ = tx.send(event);
            }
        }
    }

    impl SpeechRecognizer for FakeRecognizer {
        fn start(
            &self,
            options: &RecognitionOptions,
        ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, CaptionError> {
            *self.attempts.lock() += 1;
            if *self.failing.lock() {
                return Err(CaptionError::Start {
                    reason: "microphone busy".to_string(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().push(tx);
            *self.options.lock() = Some(options.clone());
            Ok(rx)
        }

        fn stop(&self) {
            *self.stops.lock() += 1;
        }
    }

    fn engine(recognizer: &Arc<FakeRecognizer>) -> CaptionEngine {
        let recognizer: Arc<dyn SpeechRecognizer> = recognizer.clone();
        CaptionEngine::new(Some(recognizer), CaptionConfig::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_caption_accumulates_from_result_index() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;

        assert_eq!(recognizer.starts(), 1);
        assert_eq!(
            recognizer.options.lock().clone(),
            Some(RecognitionOptions {
                language: "en-US".to_string(),
                continuous: true,
                interim_results: true,
            })
        );

        recognizer.send(RecognitionEvent::Result {
            result_index: 1,
            results: vec![
                RecognitionResult::finished("earlier "),
                RecognitionResult::interim("breaking "),
                RecognitionResult::interim("news"),
            ],
        });
        settle().await;
        assert_eq!(engine.caption(), "breaking news");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.caption(), "breaking news");
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_result_clears_after_delay() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;

        recognizer.send(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::finished("good evening")],
        });
        settle().await;
        assert_eq!(engine.caption(), "good evening");

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(engine.caption(), "good evening");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.caption(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognizer_restarts_on_end() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;

        recognizer.send(RecognitionEvent::End);
        settle().await;
        assert_eq!(recognizer.starts(), 2);
        assert!(engine.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_allows_retry() {
        let recognizer = Arc::new(FakeRecognizer::default());
        recognizer.fail_starts(true);
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;

        assert_eq!(*recognizer.attempts.lock(), 1);
        assert!(!engine.is_listening());

        recognizer.fail_starts(false);
        engine.set_enabled(true);
        settle().await;
        assert_eq!(recognizer.starts(), 1);
        assert!(engine.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restart_releases_listener() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;
        recognizer.send(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::interim("hello")],
        });
        settle().await;
        assert_eq!(engine.caption(), "hello");

        recognizer.fail_starts(true);
        recognizer.send(RecognitionEvent::End);
        settle().await;
        assert_eq!(*recognizer.attempts.lock(), 2);
        assert!(!engine.is_listening());
        assert_eq!(engine.caption(), "");

        recognizer.fail_starts(false);
        engine.set_display_mode(DisplayMode::Full);
        settle().await;
        assert_eq!(recognizer.starts(), 2);
        assert!(engine.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mini_mode_stops_and_clears() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;
        recognizer.send(RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult::interim("hello")],
        });
        settle().await;

        engine.set_display_mode(DisplayMode::Mini);
        assert_eq!(recognizer.stops(), 1);
        assert_eq!(engine.caption(), "");
        assert!(!engine.is_listening());

        engine.set_display_mode(DisplayMode::Full);
        settle().await;
        assert_eq!(recognizer.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_starts() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let engine = engine(&recognizer);
        engine.set_display_mode(DisplayMode::Full);
        settle().await;
        assert_eq!(recognizer.starts(), 0);

        engine.set_enabled(true);
        engine.set_enabled(false);
        settle().await;
        assert_eq!(recognizer.stops(), 1);
        assert!(!engine.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_recognizer_is_silent() {
        let engine = CaptionEngine::new(None, CaptionConfig::default());
        engine.set_display_mode(DisplayMode::Full);
        engine.set_enabled(true);
        settle().await;
        assert!(!engine.is_listening());
        assert_eq!(engine.caption(), "");
        engine.shutdown();
    }
}
