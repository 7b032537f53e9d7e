//! Audio stream session
//!
//! Owns the media socket and runs the stage threads for one stream:
//!
//! - `audio-receive`: socket → reorder queue → depacketizer
//! - `audio-decode`: decoded-unit queue → renderer (skipped when the
//!   renderer takes direct submission)
//! - `audio-keepalive`: sends `PING` to the host's media port
//!
//! Any stage failure is reported once through the [`ConnectionListener`]; the
//! stage then exits. [`AudioStream::abort`] stops every stage and may be
//! called from any thread, including a stage thread via an [`AbortHandle`].

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::depacketizer::{AudioDepacketizer, DecodedAudioQueue};
use crate::audio::renderer::{AudioRenderer, ConnectionListener, CAPABILITY_DIRECT_SUBMIT};
use crate::audio::stats::{StreamStats, StreamStatsSnapshot};
use crate::buffer::PoolKind;
use crate::codec::AudioDecoder;
use crate::config::{AppConfig, AudioConfig, ReorderConfig, StreamConfig};
use crate::constants::{AUDIO_PAYLOAD_TYPE, KEEPALIVE_PAYLOAD};
use crate::error::{Error, NetworkError, PoolError, Result, StreamError};
use crate::network::udp::{create_media_socket, is_timeout, is_transient, shutdown_socket};
use crate::rtp::{PacketArena, QueueStatus, RtpPacket, RtpReorderQueue, SequencedPacket};

/// Upper bound on a blocking receive before the loop rechecks for abort
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Running,
    Stopped,
}

impl StreamState {
    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

struct StreamInner {
    stream_config: StreamConfig,
    audio_config: AudioConfig,
    reorder_config: ReorderConfig,

    renderer: Arc<dyn AudioRenderer>,
    listener: Arc<dyn ConnectionListener>,
    decoder: Mutex<Option<Box<dyn AudioDecoder>>>,

    state: Mutex<StreamState>,
    aborting: AtomicBool,
    terminated: AtomicBool,

    socket: Mutex<Option<Arc<UdpSocket>>>,
    decoded_queue: Mutex<Option<DecodedAudioQueue>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,

    stats: Arc<StreamStats>,
}

/// One audio stream session
pub struct AudioStream {
    inner: Arc<StreamInner>,
}

/// Aborts a stream from anywhere without keeping it alive
#[derive(Clone)]
pub struct AbortHandle {
    inner: Weak<StreamInner>,
}

impl AbortHandle {
    /// Abort the stream if it still exists
    pub fn abort(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.abort();
        }
    }
}

impl AudioStream {
    /// Create a stream; nothing is opened until [`start`](Self::start)
    pub fn new(
        config: &AppConfig,
        decoder: Box<dyn AudioDecoder>,
        renderer: Arc<dyn AudioRenderer>,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(StreamInner {
                stream_config: config.stream.clone(),
                audio_config: config.audio.clone(),
                reorder_config: config.reorder.clone(),
                renderer,
                listener,
                decoder: Mutex::new(Some(decoder)),
                state: Mutex::new(StreamState::Created),
                aborting: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                socket: Mutex::new(None),
                decoded_queue: Mutex::new(None),
                shutdown_tx: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
                stats: Arc::new(StreamStats::new()),
            }),
        })
    }

    /// Open the socket, initialize the renderer and start the stage threads.
    ///
    /// Returns `Ok(false)` if the renderer declined the stream, in which case
    /// the stream has already been aborted.
    pub fn start(&self) -> Result<bool> {
        {
            let mut state = self.inner.state.lock();
            if *state != StreamState::Created {
                return Err(StreamError::InvalidState {
                    expected: StreamState::Created.name(),
                    found: state.name(),
                }
                .into());
            }
            *state = StreamState::Running;
        }

        match self.inner.clone().start_stages() {
            Ok(started) => Ok(started),
            Err(e) => {
                tracing::error!("Audio stream failed to start: {}", e);
                self.inner.abort();
                Err(e)
            }
        }
    }

    /// Stop every stage, join the threads and notify the renderer. Idempotent.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.inner.state.lock()
    }

    /// Local address of the media socket once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .socket
            .lock()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    pub fn stats(&self) -> StreamStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.inner.abort();
    }
}

impl StreamInner {
    fn start_stages(self: Arc<Self>) -> Result<bool> {
        let decoder = self.decoder.lock().take().ok_or(StreamError::InvalidState {
            expected: "decoder",
            found: "none",
        })?;

        let channels = self.audio_config.channel_count;
        if decoder.channel_count() != channels {
            return Err(StreamError::ChannelMismatch {
                negotiated: channels,
                decoder: decoder.channel_count(),
            }
            .into());
        }

        let socket = Arc::new(create_media_socket(
            self.stream_config.host,
            self.stream_config.recv_buffer_size,
            RECEIVE_POLL_INTERVAL,
        )?);
        *self.socket.lock() = Some(socket.clone());

        // Held until every stage runs, so an abort from another thread waits
        // for the renderer to be initialized and signals only what exists
        let mut threads = self.threads.lock();
        if self.aborting.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let frame_size = channels as usize * self.audio_config.samples_per_frame;
        if !self.renderer.stream_initialized(
            channels,
            self.audio_config.channel_mask,
            frame_size,
            self.audio_config.sample_rate,
        ) {
            tracing::warn!("Audio renderer declined the stream");
            drop(threads);
            self.abort();
            return Ok(false);
        }

        let direct = self.renderer.capabilities() & CAPABILITY_DIRECT_SUBMIT != 0;
        let pool_kind = self.audio_config.pool_kind.unwrap_or(if direct {
            PoolKind::Unsynchronized
        } else {
            PoolKind::Atomic
        });

        let depacketizer = AudioDepacketizer::new(
            decoder,
            direct.then(|| self.renderer.clone()),
            pool_kind,
            self.audio_config.decoded_unit_limit,
            self.stats.clone(),
        );

        let consumer = if direct {
            None
        } else {
            *self.decoded_queue.lock() = Some(depacketizer.decoded_queue()?);
            Some(depacketizer.decoded_queue()?)
        };

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let inner = self.clone();
        let receive_socket = socket.clone();
        threads.push(self.spawn_stage("audio-receive", move || {
            inner.run_receive(&receive_socket, depacketizer)
        })?);

        if let Some(consumer) = consumer {
            let inner = self.clone();
            threads.push(self.spawn_stage("audio-decode", move || inner.run_decode(consumer))?);
        }

        let inner = self.clone();
        threads.push(self.spawn_stage("audio-keepalive", move || {
            inner.run_keepalive(&socket, shutdown_rx)
        })?);

        tracing::info!(
            "Audio stream started: {} channels at {} Hz, {} submission, {:?} pool",
            channels,
            self.audio_config.sample_rate,
            if direct { "direct" } else { "queued" },
            pool_kind
        );
        Ok(true)
    }

    fn spawn_stage<F>(self: &Arc<Self>, name: &'static str, body: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let inner = self.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(e) = body() {
                    inner.stage_failed(name, &e);
                }
                tracing::debug!("{} stopped", name);
            })
            .map_err(|e| StreamError::ThreadSpawn(e.to_string()).into())
    }

    fn stage_failed(&self, stage: &str, error: &Error) {
        if self.aborting.load(Ordering::SeqCst) {
            return;
        }
        tracing::error!("{} failed: {}", stage, error);
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.listener.connection_terminated(error);
        }
    }

    fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::Relaxed)
    }

    fn run_receive(&self, socket: &UdpSocket, mut depacketizer: AudioDepacketizer) -> Result<()> {
        // Room for a full reorder queue plus the slot being received into.
        // The extra byte per slot exposes datagrams the OS would truncate.
        let max_packet_size = self.stream_config.max_packet_size;
        let arena = PacketArena::new(self.reorder_config.max_size + 2, max_packet_size + 1);
        let mut queue: RtpReorderQueue<RtpPacket> = RtpReorderQueue::from_config(&self.reorder_config);
        let acquire = |arena: &PacketArena| {
            arena
                .acquire()
                .ok_or_else(|| Error::from(StreamError::ArenaExhausted(arena.in_use())))
        };
        let mut current = acquire(&arena)?;

        while !self.is_aborting() {
            // None while the reorder queue still references the slot
            let received = current.get_mut().map(|mut data| socket.recv_from(&mut data));
            let Some(received) = received else {
                current = acquire(&arena)?;
                continue;
            };

            let len = match received {
                Ok((len, _)) => len,
                Err(e) if is_timeout(&e) || is_transient(&e) => continue,
                Err(e) if self.is_aborting() => {
                    tracing::debug!("Receive interrupted by abort: {}", e);
                    break;
                }
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string()).into()),
            };
            if self.is_aborting() {
                break;
            }

            self.stats.datagram_received();
            if len > max_packet_size {
                tracing::debug!("Discarding oversized datagram ({} > {} bytes)", len, max_packet_size);
                self.stats.oversized_discarded();
                continue;
            }
            current.set_len(len);

            let packet = match RtpPacket::parse(current.clone()) {
                Ok(packet) => packet,
                Err(_) => {
                    self.stats.runt_discarded();
                    continue;
                }
            };

            if packet.packet_type() != AUDIO_PAYLOAD_TYPE {
                self.stats.non_audio_discarded();
                continue;
            }

            match queue.add_packet(&packet) {
                QueueStatus::HandleImmediately => depacketizer.decode_input_data(&packet),
                QueueStatus::QueuedPacketsReady => {
                    while let Some(queued) = queue.get_queued_packet() {
                        depacketizer.decode_input_data(&queued);
                        queued.release();
                    }
                }
                QueueStatus::QueuedNothingReady | QueueStatus::Rejected => {}
            }
            self.stats.record_reorder(queue.stats());
        }

        Ok(())
    }

    fn run_decode(&self, queue: DecodedAudioQueue) -> Result<()> {
        loop {
            match queue.get_next_decoded_data() {
                Ok(unit) => {
                    self.renderer.play_decoded_audio(unit.as_slice());
                    self.stats.unit_played();
                    queue.free_decoded_data(unit);
                }
                Err(PoolError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn run_keepalive(&self, socket: &UdpSocket, shutdown_rx: Receiver<()>) -> Result<()> {
        let target = SocketAddr::new(self.stream_config.host, self.stream_config.audio_port);
        let interval = Duration::from_millis(self.stream_config.keepalive_interval_ms);

        loop {
            match socket.send_to(&KEEPALIVE_PAYLOAD, target) {
                Ok(_) => self.stats.keepalive_sent(),
                Err(e) if is_transient(&e) => tracing::debug!("Keep-alive not delivered: {}", e),
                Err(_) if self.is_aborting() => return Ok(()),
                Err(e) => return Err(NetworkError::SendFailed(e.to_string()).into()),
            }

            match shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => return Ok(()),
            }
        }
    }

    fn abort(&self) {
        if self.aborting.swap(true, Ordering::SeqCst) {
            return;
        }

        let previous = *self.state.lock();
        if previous == StreamState::Created {
            *self.state.lock() = StreamState::Stopped;
            return;
        }

        tracing::info!("Aborting audio stream");

        // Waits out a start in progress; the stages it spawned see the signals below
        let handles: Vec<JoinHandle<()>> = {
            let mut threads = self.threads.lock();

            // Disconnects the keep-alive wait
            self.shutdown_tx.lock().take();

            if let Some(queue) = self.decoded_queue.lock().take() {
                queue.close();
            }

            if let Some(socket) = self.socket.lock().as_ref() {
                shutdown_socket(socket);
            }

            threads.drain(..).collect()
        };

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                tracing::error!("{} panicked", name);
            }
        }

        self.renderer.stream_closing();
        *self.state.lock() = StreamState::Stopped;
        tracing::info!("Audio stream stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::depacketizer::tests::FakeDecoder;
    use crate::audio::renderer::LoggingListener;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingRenderer {
        accept: bool,
        initialized: AtomicUsize,
        closed: AtomicUsize,
    }

    impl AudioRenderer for CountingRenderer {
        fn stream_initialized(&self, channels: u16, mask: u32, frame_size: usize, rate: u32) -> bool {
            assert_eq!((channels, mask, frame_size, rate), (2, 0x3, 480, 48000));
            self.initialized.fetch_add(1, Ordering::SeqCst);
            self.accept
        }

        fn play_decoded_audio(&self, _samples: &[i16]) {}

        fn stream_closing(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records renderer calls and lingers in initialization
    struct SlowRenderer {
        entered: Sender<()>,
        events: Mutex<Vec<&'static str>>,
    }

    impl AudioRenderer for SlowRenderer {
        fn stream_initialized(&self, _: u16, _: u32, _: usize, _: u32) -> bool {
            let _ = self.entered.send(());
            thread::sleep(Duration::from_millis(100));
            self.events.lock().push("initialized");
            true
        }

        fn play_decoded_audio(&self, _samples: &[i16]) {}

        fn stream_closing(&self) {
            self.events.lock().push("closing");
        }
    }

    fn stream(renderer: Arc<CountingRenderer>, decoder_channels_ok: bool) -> AudioStream {
        let mut config = AppConfig::default();
        if !decoder_channels_ok {
            config.audio.channel_count = 6;
        }
        AudioStream::new(
            &config,
            Box::new(FakeDecoder { unit: 480 }),
            renderer,
            Arc::new(LoggingListener),
        )
        .unwrap()
    }

    #[test]
    fn test_start_and_abort() {
        let renderer = Arc::new(CountingRenderer {
            accept: true,
            ..Default::default()
        });
        let stream = stream(renderer.clone(), true);
        assert_eq!(stream.state(), StreamState::Created);

        assert!(stream.start().unwrap());
        assert_eq!(stream.state(), StreamState::Running);
        assert!(stream.local_addr().is_some());

        stream.abort();
        stream.abort();
        assert_eq!(stream.state(), StreamState::Stopped);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let renderer = Arc::new(CountingRenderer {
            accept: true,
            ..Default::default()
        });
        let stream = stream(renderer, true);
        stream.start().unwrap();

        let err = stream.start().unwrap_err();
        assert!(matches!(
            err,
            Error::Stream(StreamError::InvalidState { found: "running", .. })
        ));
    }

    #[test]
    fn test_renderer_refusal_aborts() {
        let renderer = Arc::new(CountingRenderer::default());
        let stream = stream(renderer.clone(), true);

        assert!(!stream.start().unwrap());
        assert_eq!(stream.state(), StreamState::Stopped);
        assert_eq!(renderer.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_mismatch() {
        let renderer = Arc::new(CountingRenderer {
            accept: true,
            ..Default::default()
        });
        let stream = stream(renderer.clone(), false);

        let err = stream.start().unwrap_err();
        assert!(matches!(
            err,
            Error::Stream(StreamError::ChannelMismatch { negotiated: 6, decoder: 2 })
        ));
        assert_eq!(renderer.initialized.load(Ordering::SeqCst), 0);
        assert_eq!(stream.state(), StreamState::Stopped);
    }

    #[test]
    fn test_abort_before_start() {
        let renderer = Arc::new(CountingRenderer::default());
        let stream = stream(renderer.clone(), true);
        stream.abort();

        assert_eq!(stream.state(), StreamState::Stopped);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 0);
        assert!(stream.start().is_err());
    }

    #[test]
    fn test_abort_handle_outlives_stream() {
        let renderer = Arc::new(CountingRenderer {
            accept: true,
            ..Default::default()
        });
        let stream = stream(renderer.clone(), true);
        let handle = stream.abort_handle();
        stream.start().unwrap();

        drop(stream);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
        handle.abort();
    }

    #[test]
    fn test_abort_during_start_closes_after_initialization() {
        let (entered_tx, entered_rx) = bounded(1);
        let renderer = Arc::new(SlowRenderer {
            entered: entered_tx,
            events: Mutex::new(Vec::new()),
        });
        let stream = AudioStream::new(
            &AppConfig::default(),
            Box::new(FakeDecoder { unit: 480 }),
            renderer.clone(),
            Arc::new(LoggingListener),
        )
        .unwrap();
        let handle = stream.abort_handle();

        thread::scope(|scope| {
            let starter = scope.spawn(|| stream.start());
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            handle.abort();
            assert!(starter.join().unwrap().unwrap());
        });

        assert_eq!(stream.state(), StreamState::Stopped);
        assert_eq!(*renderer.events.lock(), vec!["initialized", "closing"]);
    }
}
