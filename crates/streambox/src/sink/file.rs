use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MediaSink, MediaSource, SINK_EVENT_CAPACITY, SinkError, SinkEvent, SourceId};

/// Work queued for the blocking writer. Every op carries the binding it
/// was issued under; ops for a binding that is no longer open are dropped.
enum WriteOp {
    Open(u64),
    Chunk(u64, Bytes),
    Flush,
    Close(u64),
    Sync(oneshot::Sender<()>),
}

/// Who produced a chunk.
enum Origin {
    Download(u64),
    Adaptive(SourceId),
}

struct FileState {
    source: Option<MediaSource>,
    /// Bumped on every source change.
    binding: u64,
    writer: Option<mpsc::UnboundedSender<WriteOp>>,
    paused: bool,
    volume: f64,
    bytes_written: u64,
    started: bool,
    download: Option<CancellationToken>,
}

struct FileSinkInner {
    path: PathBuf,
    client: Client,
    state: Mutex<FileState>,
    events: broadcast::Sender<SinkEvent>,
}

/// A sink that records whatever it plays into a file.
///
/// Adaptive sources are written chunk by chunk as the engine appends them.
/// Progressive sources are downloaded by the sink itself. `Playing` is
/// reported once data flows while the sink is not paused.
///
/// File I/O happens on a blocking writer task; `bytes_written` counts
/// accepted bytes and [`FileSink::sync`] waits for them to reach the file.
#[derive(Clone)]
pub struct FileSink {
    inner: Arc<FileSinkInner>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, client: Client) -> Self {
        let (events, _) = broadcast::channel(SINK_EVENT_CAPACITY);
        Self {
            inner: Arc::new(FileSinkInner {
                path: path.into(),
                client,
                state: Mutex::new(FileState {
                    source: None,
                    binding: 0,
                    writer: None,
                    paused: true,
                    volume: 1.0,
                    bytes_written: 0,
                    started: false,
                    download: None,
                }),
                events,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.state.lock().bytes_written
    }

    /// Wait until everything accepted so far is written and flushed.
    pub async fn sync(&self) {
        let (done, wait) = oneshot::channel();
        let queued = self
            .inner
            .state
            .lock()
            .writer
            .as_ref()
            .is_some_and(|writer| writer.send(WriteOp::Sync(done)).is_ok());
        if queued {
            let _ = wait.await;
        }
    }
}

fn write_loop(
    path: PathBuf,
    events: broadcast::Sender<SinkEvent>,
    mut ops: mpsc::UnboundedReceiver<WriteOp>,
) {
    let mut current: Option<(u64, BufWriter<File>)> = None;
    while let Some(op) = ops.blocking_recv() {
        let result = match op {
            WriteOp::Open(binding) => {
                if let Some((_, mut writer)) = current.take() {
                    let _ = writer.flush();
                }
                File::create(&path).map(|file| current = Some((binding, BufWriter::new(file))))
            }
            WriteOp::Chunk(binding, chunk) => match current.as_mut() {
                Some((open, writer)) if *open == binding => writer.write_all(&chunk),
                _ => Ok(()),
            },
            WriteOp::Flush => current.as_mut().map_or(Ok(()), |(_, writer)| writer.flush()),
            WriteOp::Close(binding) => match current.take() {
                Some((open, mut writer)) if open == binding => writer.flush(),
                other => {
                    current = other;
                    Ok(())
                }
            },
            WriteOp::Sync(done) => {
                let flushed = current.as_mut().map_or(Ok(()), |(_, writer)| writer.flush());
                let _ = done.send(());
                flushed
            }
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Recording write failed");
            current = None;
            let _ = events.send(SinkEvent::Error(e.to_string()));
        }
    }
    if let Some((_, mut writer)) = current
        && let Err(e) = writer.flush()
    {
        warn!(path = %path.display(), error = %e, "Failed to flush recording");
    }
}

impl FileSinkInner {
    fn emit(&self, event: SinkEvent) {
        let _ = self.events.send(event);
    }

    /// The writer queue, starting the blocking writer on first use.
    fn writer(&self, state: &mut FileState) -> Option<mpsc::UnboundedSender<WriteOp>> {
        if let Some(writer) = &state.writer
            && !writer.is_closed()
        {
            return Some(writer.clone());
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let path = self.path.clone();
        let events = self.events.clone();
        handle.spawn_blocking(move || write_loop(path, events, rx));
        state.writer = Some(tx.clone());
        Some(tx)
    }

    /// Queue a chunk if `origin` still owns the current binding.
    fn push(&self, origin: Origin, chunk: Bytes) -> Result<(), SinkError> {
        let announce_playing = {
            let mut state = self.state.lock();
            let binding = state.binding;
            match (&state.source, origin) {
                (None, _) => return Err(SinkError::NoSource),
                (Some(MediaSource::Adaptive { id, .. }), Origin::Adaptive(source)) if *id == source => {}
                (Some(_), Origin::Download(from)) if from == binding => {}
                _ => return Err(SinkError::Detached),
            }
            let len = chunk.len() as u64;
            state
                .writer
                .as_ref()
                .ok_or(SinkError::NoSource)?
                .send(WriteOp::Chunk(binding, chunk))
                .map_err(|_| SinkError::append("recording writer stopped"))?;
            state.bytes_written += len;
            if !state.paused && !state.started {
                state.started = true;
                true
            } else {
                false
            }
        };
        if announce_playing {
            self.emit(SinkEvent::Playing);
        }
        Ok(())
    }

    fn flush_and_end(&self, owns_binding: impl FnOnce(&FileState) -> bool) {
        {
            let state = self.state.lock();
            if !owns_binding(&state) {
                return;
            }
            if let Some(writer) = &state.writer {
                let _ = writer.send(WriteOp::Flush);
            }
        }
        self.emit(SinkEvent::Ended);
    }

    async fn download(self: Arc<Self>, url: String, binding: u64, token: CancellationToken) {
        let response = tokio::select! {
            _ = token.cancelled() => return,
            response = self.client.get(&url).send() => response,
        };
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(url = %url, status = %r.status(), "Direct source request rejected");
                self.emit(SinkEvent::Error(format!("HTTP {}", r.status())));
                return;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Direct source request failed");
                self.emit(SinkEvent::Error(e.to_string()));
                return;
            }
        };

        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return,
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => match self.push(Origin::Download(binding), chunk) {
                    Ok(()) => {}
                    Err(SinkError::Detached) => return,
                    Err(e) => {
                        self.emit(SinkEvent::Error(e.to_string()));
                        return;
                    }
                },
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "Direct source stream interrupted");
                    self.emit(SinkEvent::Error(e.to_string()));
                    return;
                }
                None => break,
            }
        }
        debug!(url = %url, "Direct source finished");
        self.flush_and_end(|state| !token.is_cancelled() && state.binding == binding);
    }
}

impl MediaSink for FileSink {
    fn set_source(&self, source: MediaSource) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if let Some(previous) = state.download.take() {
            previous.cancel();
        }
        state.binding += 1;
        state.started = false;
        state.bytes_written = 0;
        let binding = state.binding;
        let Some(writer) = inner.writer(&mut state) else {
            state.source = None;
            drop(state);
            warn!(path = %inner.path.display(), "Recording requires a tokio runtime");
            inner.emit(SinkEvent::Error("recording requires a tokio runtime".to_string()));
            return;
        };
        let _ = writer.send(WriteOp::Open(binding));
        state.source = Some(source.clone());
        info!(path = %inner.path.display(), url = %source.url(), "Recording source");

        match source {
            MediaSource::Adaptive { .. } => {}
            MediaSource::Progressive(url) | MediaSource::Native(url) => {
                let token = CancellationToken::new();
                state.download = Some(token.clone());
                drop(state);
                tokio::spawn(Arc::clone(inner).download(url, binding, token));
            }
        }
    }

    fn clear_source(&self) {
        let mut state = self.inner.state.lock();
        if let Some(download) = state.download.take() {
            download.cancel();
        }
        if let Some(writer) = &state.writer {
            let _ = writer.send(WriteOp::Close(state.binding));
        }
        state.binding += 1;
        state.source = None;
        state.started = false;
    }

    fn source(&self) -> Option<MediaSource> {
        self.inner.state.lock().source.clone()
    }

    fn can_play_type(&self, _mime: &str) -> bool {
        false
    }

    fn append(&self, source: SourceId, chunk: Bytes) -> Result<(), SinkError> {
        self.inner.push(Origin::Adaptive(source), chunk)
    }

    fn end_of_stream(&self, source: SourceId) {
        self.inner.flush_and_end(|state| {
            state.source.as_ref().and_then(MediaSource::adaptive_id) == Some(source)
        });
    }

    fn play(&self) -> Result<(), SinkError> {
        let announce_playing = {
            let mut state = self.inner.state.lock();
            if state.source.is_none() {
                return Err(SinkError::NoSource);
            }
            state.paused = false;
            if state.bytes_written > 0 && !state.started {
                state.started = true;
                true
            } else {
                false
            }
        };
        self.inner.emit(SinkEvent::Play);
        if announce_playing {
            self.inner.emit(SinkEvent::Playing);
        }
        Ok(())
    }

    fn pause(&self) {
        let changed = {
            let mut state = self.inner.state.lock();
            state.started = false;
            !std::mem::replace(&mut state.paused, true)
        };
        if changed {
            self.inner.emit(SinkEvent::Pause);
        }
    }

    fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    fn volume(&self) -> f64 {
        self.inner.state.lock().volume
    }

    fn set_volume(&self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        self.inner.state.lock().volume = volume;
        self.inner.emit(SinkEvent::VolumeChanged(volume));
    }

    fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.inner.events.subscribe()
    }
}
