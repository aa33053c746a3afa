//! Scripted engine for exercising session policy without a network stack.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{AdaptiveSession, EngineEvent, EngineEventReceiver, EngineFactory};
use crate::sink::{MediaSink, MediaSource};

/// Counters recorded across every session a [`MockEngineFactory`] created.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MockEngineStats {
    pub created: usize,
    pub attached: usize,
    pub destroyed: usize,
    pub start_loads: usize,
    pub media_recoveries: usize,
    /// Sessions attached and not yet destroyed.
    pub active: usize,
    /// Highest value `active` ever reached.
    pub peak_active: usize,
}

#[derive(Default)]
struct MockShared {
    stats: MockEngineStats,
    senders: Vec<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

/// Engine factory whose sessions do nothing but record calls and relay
/// events injected by the test.
#[derive(Clone)]
pub struct MockEngineFactory {
    supported: bool,
    shared: Arc<Mutex<MockShared>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self {
            supported: true,
            shared: Arc::default(),
        }
    }

    /// A factory reporting that software adaptive playback is unavailable.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn stats(&self) -> MockEngineStats {
        self.shared.lock().stats.clone()
    }

    /// Deliver `event` from the most recently created session. Returns
    /// `false` if that session is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let shared = self.shared.lock();
        match shared.senders.last() {
            Some(Some(tx)) => tx.send(event).is_ok(),
            _ => false,
        }
    }

    /// Deliver `event` from the `index`-th created session.
    pub fn emit_from(&self, index: usize, event: EngineEvent) -> bool {
        let shared = self.shared.lock();
        match shared.senders.get(index) {
            Some(Some(tx)) => tx.send(event).is_ok(),
            _ => false,
        }
    }
}

impl Default for MockEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for MockEngineFactory {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(&self) -> Box<dyn AdaptiveSession> {
        let mut shared = self.shared.lock();
        shared.stats.created += 1;
        shared.senders.push(None);
        Box::new(MockSession {
            index: shared.senders.len() - 1,
            shared: Arc::clone(&self.shared),
            attached: false,
            destroyed: false,
        })
    }
}

struct MockSession {
    index: usize,
    shared: Arc<Mutex<MockShared>>,
    attached: bool,
    destroyed: bool,
}

impl AdaptiveSession for MockSession {
    fn attach(&mut self, url: &str, sink: Arc<dyn MediaSink>) -> EngineEventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        sink.set_source(MediaSource::adaptive(url));

        let mut shared = self.shared.lock();
        shared.senders[self.index] = Some(tx);
        shared.stats.attached += 1;
        shared.stats.active += 1;
        shared.stats.peak_active = shared.stats.peak_active.max(shared.stats.active);
        self.attached = true;
        rx
    }

    fn start_load(&self) {
        self.shared.lock().stats.start_loads += 1;
    }

    fn recover_media_error(&self) {
        self.shared.lock().stats.media_recoveries += 1;
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let mut shared = self.shared.lock();
        shared.senders[self.index] = None;
        shared.stats.destroyed += 1;
        if self.attached {
            shared.stats.active -= 1;
        }
    }
}
