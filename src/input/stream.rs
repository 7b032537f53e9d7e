//! Outbound input channel
//!
//! Callers enqueue input events from any thread; a single sender thread
//! frames them with a 4-byte big-endian length prefix and writes them to the
//! host in order. Queued mouse moves are merged before sending, as are
//! gamepad states that only continue the previous motion.

use bytes::{BufMut, BytesMut};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::renderer::ConnectionListener;
use crate::config::InputConfig;
use crate::error::{Error, NetworkError, Result, StreamError};
use crate::input::packets::*;

/// Handle to a running input channel
pub struct InputStream {
    tx: Mutex<Option<Sender<InputEvent>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    socket: Option<TcpStream>,
    stopping: Arc<AtomicBool>,
    server_generation: u32,
}

impl InputStream {
    /// Connect to the host's input port and start sending
    pub fn connect(host: IpAddr, config: &InputConfig, listener: Arc<dyn ConnectionListener>) -> Result<Self> {
        let addr = SocketAddr::new(host, config.port);
        let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(config.connect_timeout_ms))
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;
        // Bounds how long stop waits on a host that stopped reading
        let write_timeout = (config.write_timeout_ms > 0).then(|| Duration::from_millis(config.write_timeout_ms));
        stream
            .set_write_timeout(write_timeout)
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;
        let shutdown = stream
            .try_clone()
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

        tracing::info!("Input channel connected to {}", addr);

        let mut input = Self::start(stream, config, listener)?;
        input.socket = Some(shutdown);
        Ok(input)
    }

    /// Start sending framed packets to an arbitrary writer
    pub fn start<W>(writer: W, config: &InputConfig, listener: Arc<dyn ConnectionListener>) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let stopping = Arc::new(AtomicBool::new(false));
        let batching = Batching {
            mouse_moves: config.coalesce_mouse_moves,
            controller: config.batch_controller_input,
        };
        let thread_stopping = stopping.clone();

        let thread = thread::Builder::new()
            .name("input-sender".to_string())
            .spawn(move || run_sender(writer, rx, batching, &thread_stopping, listener.as_ref()))
            .map_err(|e| StreamError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            socket: None,
            stopping,
            server_generation: config.server_generation,
        })
    }

    /// Queue an event. Ignored once stopped.
    pub fn send(&self, event: InputEvent) {
        match self.tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!("Input sender has exited, dropping event");
                }
            }
            None => tracing::debug!("Input stream stopped, dropping event"),
        }
    }

    pub fn send_mouse_move(&self, delta_x: i16, delta_y: i16) {
        self.send(InputEvent::MouseMove(MouseMovePacket::new(delta_x, delta_y)));
    }

    pub fn send_mouse_button_down(&self, button: u8) {
        self.send(InputEvent::MouseButton(MouseButtonPacket::new(true, button)));
    }

    pub fn send_mouse_button_up(&self, button: u8) {
        self.send(InputEvent::MouseButton(MouseButtonPacket::new(false, button)));
    }

    /// Scroll by whole wheel clicks
    pub fn send_mouse_scroll(&self, clicks: i8) {
        self.send(InputEvent::MouseScroll(MouseScrollPacket::new(clicks)));
    }

    pub fn send_keyboard_input(&self, key_code: i16, direction: u8, modifiers: u8) {
        self.send(InputEvent::Keyboard(KeyboardPacket::new(key_code, direction, modifiers)));
    }

    pub fn send_controller_input(&self, state: ControllerState) {
        self.send(InputEvent::Controller(ControllerPacket::new(state)));
    }

    /// Send one gamepad's state; the header variant follows the host generation
    pub fn send_multi_controller_input(&self, controller_number: u16, active_mask: u16, state: ControllerState) {
        self.send(InputEvent::MultiController(MultiControllerPacket::new(
            self.server_generation,
            controller_number,
            active_mask,
            state,
        )));
    }

    /// Stop the sender thread. Events already queued are flushed first
    /// unless the connection is gone or a write times out. Safe to call more
    /// than once.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        // Disconnecting the queue ends the sender loop once it drains
        self.tx.lock().take();

        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                tracing::error!("Input sender thread panicked");
            }
        }

        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(Shutdown::Both);
        }

        tracing::debug!("Input stream stopped");
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Which queued events the sender may merge
#[derive(Debug, Clone, Copy)]
struct Batching {
    mouse_moves: bool,
    controller: bool,
}

fn run_sender<W: Write>(
    mut writer: W,
    rx: Receiver<InputEvent>,
    batching: Batching,
    stopping: &AtomicBool,
    listener: &dyn ConnectionListener,
) {
    let mut wire = BytesMut::with_capacity(64);
    let mut pending: VecDeque<InputEvent> = VecDeque::new();

    loop {
        let event = match pending.pop_front() {
            Some(event) => event,
            None => match rx.recv() {
                Ok(event) => event,
                Err(_) => return,
            },
        };

        let result = match event {
            InputEvent::MouseMove(first) if batching.mouse_moves => {
                pending.extend(rx.try_iter());
                send_coalesced_moves(&mut writer, &mut wire, first, &mut pending)
            }
            first @ (InputEvent::Controller(_) | InputEvent::MultiController(_)) if batching.controller => {
                pending.extend(rx.try_iter());
                let merged = batch_controller_states(first, &mut pending);
                write_framed(&mut writer, &mut wire, &merged)
            }
            other => write_framed(&mut writer, &mut wire, &other),
        };

        if let Err(e) = result {
            if !stopping.load(Ordering::SeqCst) {
                tracing::warn!("Input channel write failed: {}", e);
                listener.connection_terminated(&Error::Network(NetworkError::SendFailed(e.to_string())));
            }
            return;
        }
    }
}

/// Merge every queued mouse move into `first` and send the total, split into
/// as many packets as the 16-bit deltas need
fn send_coalesced_moves<W: Write>(
    writer: &mut W,
    wire: &mut BytesMut,
    first: MouseMovePacket,
    pending: &mut VecDeque<InputEvent>,
) -> io::Result<()> {
    let mut total_x = first.delta_x as i32;
    let mut total_y = first.delta_y as i32;

    pending.retain(|event| match event {
        InputEvent::MouseMove(next) => {
            total_x += next.delta_x as i32;
            total_y += next.delta_y as i32;
            false
        }
        _ => true,
    });

    loop {
        let part_x = clamp_delta(total_x);
        let part_y = clamp_delta(total_y);
        write_framed(writer, wire, &InputEvent::MouseMove(MouseMovePacket::new(part_x, part_y)))?;

        total_x -= part_x as i32;
        total_y -= part_y as i32;
        if total_x == 0 && total_y == 0 {
            return Ok(());
        }
    }
}

/// Gamepad a controller event drives, with the state it carries
fn controller_slot(event: &InputEvent) -> Option<(Option<(u32, u16, u16)>, ControllerState)> {
    match event {
        InputEvent::Controller(packet) => Some((None, packet.state)),
        InputEvent::MultiController(packet) => Some((
            Some((packet.header_code(), packet.controller_number, packet.active_mask)),
            packet.state,
        )),
        _ => None,
    }
}

/// Fold queued states for the same gamepad into `first`, stopping at the
/// first one that cannot be merged. Other events keep their place.
fn batch_controller_states(first: InputEvent, pending: &mut VecDeque<InputEvent>) -> InputEvent {
    let Some((slot, state)) = controller_slot(&first) else {
        return first;
    };
    let mut batch = ControllerBatch::new(state);

    let mut index = 0;
    while index < pending.len() {
        match controller_slot(&pending[index]) {
            None => index += 1,
            Some((next_slot, next)) if next_slot == slot && batch.submit(&next) => {
                pending.remove(index);
            }
            Some(_) => break,
        }
    }

    match first {
        InputEvent::Controller(mut packet) => {
            packet.state = batch.state;
            InputEvent::Controller(packet)
        }
        InputEvent::MultiController(mut packet) => {
            packet.state = batch.state;
            InputEvent::MultiController(packet)
        }
        other => other,
    }
}

/// Latest state of a run of gamepad updates that share buttons and keep
/// every axis moving one way
struct ControllerBatch {
    state: ControllerState,
    axis_dirs: [i8; 6],
}

impl ControllerBatch {
    fn new(state: ControllerState) -> Self {
        Self {
            state,
            axis_dirs: [0; 6],
        }
    }

    fn axes(state: &ControllerState) -> [i32; 6] {
        [
            state.left_trigger as i32,
            state.right_trigger as i32,
            state.left_stick_x as i32,
            state.left_stick_y as i32,
            state.right_stick_x as i32,
            state.right_stick_y as i32,
        ]
    }

    /// Take `next` as the batch state if it continues the run
    fn submit(&mut self, next: &ControllerState) -> bool {
        if next.buttons != self.state.buttons {
            return false;
        }

        let current = Self::axes(&self.state);
        let wanted = Self::axes(next);
        for (dir, (&from, &to)) in self.axis_dirs.iter_mut().zip(current.iter().zip(&wanted)) {
            if !continues_direction(dir, from, to) {
                return false;
            }
        }

        self.state = *next;
        true
    }
}

fn continues_direction(dir: &mut i8, current: i32, next: i32) -> bool {
    if next == current {
        return true;
    }
    // An axis returning to rest goes out on its own
    if next == 0 {
        return false;
    }

    let step = if next < current { -1 } else { 1 };
    if *dir == 0 {
        *dir = step;
    }
    *dir == step
}

fn clamp_delta(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn write_framed<W: Write>(writer: &mut W, wire: &mut BytesMut, event: &InputEvent) -> io::Result<()> {
    wire.clear();
    wire.put_u32(event.packet_length() as u32);
    event.write_wire(wire);
    writer.write_all(wire)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingListener {
        terminations: AtomicUsize,
    }

    impl ConnectionListener for CountingListener {
        fn connection_terminated(&self, _: &Error) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Split a byte stream back into packets
    fn frames(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            frames.push(rest[4..4 + len].to_vec());
            rest = &rest[4 + len..];
        }
        frames
    }

    fn move_deltas(frame: &[u8]) -> (i16, i16) {
        assert_eq!(&frame[..4], &[0, 0, 0, 0x08]);
        (
            i16::from_be_bytes([frame[8], frame[9]]),
            i16::from_be_bytes([frame[10], frame[11]]),
        )
    }

    /// Runs the sender loop to completion over events queued up front
    fn run_queued(events: &[InputEvent], merge: bool) -> Vec<Vec<u8>> {
        let (tx, rx) = unbounded();
        for event in events {
            tx.send(*event).unwrap();
        }
        drop(tx);

        let writer = SharedWriter::default();
        let listener = CountingListener::default();
        let batching = Batching {
            mouse_moves: merge,
            controller: merge,
        };
        run_sender(writer.clone(), rx, batching, &AtomicBool::new(false), &listener);
        assert_eq!(listener.terminations.load(Ordering::SeqCst), 0);

        let bytes = writer.0.lock().clone();
        frames(&bytes)
    }

    fn mouse_move(dx: i16, dy: i16) -> InputEvent {
        InputEvent::MouseMove(MouseMovePacket::new(dx, dy))
    }

    fn stick(buttons: u16, left_x: i16, left_trigger: u8) -> ControllerState {
        ControllerState {
            buttons,
            left_trigger,
            left_stick_x: left_x,
            ..Default::default()
        }
    }

    fn gamepad(state: ControllerState) -> InputEvent {
        InputEvent::Controller(ControllerPacket::new(state))
    }

    fn wire(event: InputEvent) -> Vec<u8> {
        event.to_wire().to_vec()
    }

    #[test]
    fn test_moves_are_merged_ahead_of_other_events() {
        let key = InputEvent::Keyboard(KeyboardPacket::new(0x41, KeyboardPacket::KEY_DOWN, 0));
        let frames = run_queued(&[mouse_move(10, -5), mouse_move(5, 5), key, mouse_move(1, 1)], true);

        assert_eq!(frames.len(), 2);
        assert_eq!(move_deltas(&frames[0]), (16, 1));
        assert_eq!(frames[1], key.to_wire().to_vec());
    }

    #[test]
    fn test_controller_states_are_batched() {
        let key = InputEvent::Keyboard(KeyboardPacket::new(0x41, KeyboardPacket::KEY_DOWN, 0));
        let frames = run_queued(
            &[
                gamepad(stick(0, 100, 10)),
                gamepad(stick(0, 200, 10)),
                key,
                gamepad(stick(0, 300, 40)),
            ],
            true,
        );

        assert_eq!(frames, vec![wire(gamepad(stick(0, 300, 40))), wire(key)]);
    }

    #[test]
    fn test_controller_batch_breaks_on_reversal() {
        let frames = run_queued(
            &[
                gamepad(stick(0, 100, 0)),
                gamepad(stick(0, 200, 0)),
                gamepad(stick(0, 150, 0)),
                gamepad(stick(0, 120, 0)),
            ],
            true,
        );

        assert_eq!(
            frames,
            vec![wire(gamepad(stick(0, 200, 0))), wire(gamepad(stick(0, 120, 0)))]
        );
    }

    #[test]
    fn test_controller_batch_breaks_on_buttons_and_rest() {
        let a = controller_button::A;
        let frames = run_queued(
            &[
                gamepad(stick(0, 100, 0)),
                gamepad(stick(a, 200, 0)),
                gamepad(stick(a, 0, 0)),
            ],
            true,
        );

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], wire(gamepad(stick(a, 0, 0))));
    }

    #[test]
    fn test_controller_batch_keeps_gamepads_apart() {
        let pad = |number: u16, x: i16| {
            InputEvent::MultiController(MultiControllerPacket::new(7, number, 0x3, stick(0, x, 0)))
        };
        let frames = run_queued(&[pad(0, 100), pad(1, 100), pad(0, 200), pad(0, 300)], true);

        assert_eq!(frames, vec![wire(pad(0, 100)), wire(pad(1, 100)), wire(pad(0, 300))]);
    }

    #[test]
    fn test_no_batching_keeps_every_controller_state() {
        let frames = run_queued(&[gamepad(stick(0, 100, 0)), gamepad(stick(0, 200, 0))], false);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_large_totals_are_split() {
        let frames = run_queued(&[mouse_move(30000, -20000), mouse_move(30000, -20000)], true);

        let deltas: Vec<_> = frames.iter().map(|f| move_deltas(f)).collect();
        assert_eq!(deltas, vec![(32767, -32768), (27233, -7232)]);
    }

    #[test]
    fn test_split_continues_while_either_axis_remains() {
        let frames = run_queued(&[mouse_move(i16::MAX, 0), mouse_move(i16::MAX, 3)], true);

        let deltas: Vec<_> = frames.iter().map(|f| move_deltas(f)).collect();
        assert_eq!(deltas, vec![(i16::MAX, 3), (i16::MAX, 0)]);
    }

    #[test]
    fn test_no_coalescing_keeps_every_move() {
        let frames = run_queued(&[mouse_move(1, 2), mouse_move(3, 4)], false);

        assert_eq!(frames.len(), 2);
        assert_eq!(move_deltas(&frames[0]), (1, 2));
        assert_eq!(move_deltas(&frames[1]), (3, 4));
    }

    #[test]
    fn test_zero_move_still_sent() {
        let frames = run_queued(&[mouse_move(0, 0)], true);
        assert_eq!(frames.len(), 1);
        assert_eq!(move_deltas(&frames[0]), (0, 0));
    }

    #[test]
    fn test_write_failure_reports_once() {
        let listener = Arc::new(CountingListener::default());
        let input = InputStream::start(BrokenWriter, &InputConfig::default(), listener.clone()).unwrap();

        input.send_mouse_button_down(mouse_button::LEFT);
        input.send_mouse_button_up(mouse_button::LEFT);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while listener.terminations.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        input.stop();

        assert_eq!(listener.terminations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_flushes_and_is_idempotent() {
        let writer = SharedWriter::default();
        let listener = Arc::new(CountingListener::default());
        let input = InputStream::start(writer.clone(), &InputConfig::default(), listener.clone()).unwrap();

        input.send_mouse_scroll(1);
        input.stop();
        input.stop();
        input.send_mouse_scroll(1);

        let frames = frames(&writer.0.lock());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], MouseScrollPacket::new(1).to_wire().to_vec());
        assert_eq!(listener.terminations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_multi_controller_uses_configured_generation() {
        let writer = SharedWriter::default();
        let config = InputConfig {
            server_generation: 3,
            ..Default::default()
        };
        let input = InputStream::start(writer.clone(), &config, Arc::new(CountingListener::default())).unwrap();

        input.send_multi_controller_input(0, 0x1, ControllerState::default());
        input.stop();

        let frames = frames(&writer.0.lock());
        assert_eq!(&frames[0][4..8], &[0x0D, 0, 0, 0]);
    }

    #[test]
    fn test_tcp_connect() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = InputConfig {
            port: server.local_addr().unwrap().port(),
            ..Default::default()
        };

        let input = InputStream::connect(
            IpAddr::from([127, 0, 0, 1]),
            &config,
            Arc::new(CountingListener::default()),
        )
        .unwrap();
        let (mut peer, _) = server.accept().unwrap();

        input.send_mouse_move(10, -5);
        input.stop();

        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        assert_eq!(
            received,
            vec![0, 0, 0, 12, 0, 0, 0, 0x08, 0x06, 0, 0, 0, 0x00, 0x0A, 0xFF, 0xFB]
        );
    }

    #[test]
    fn test_stop_returns_when_host_stops_reading() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = InputConfig {
            port: server.local_addr().unwrap().port(),
            write_timeout_ms: 200,
            ..Default::default()
        };
        let listener = Arc::new(CountingListener::default());

        let input = InputStream::connect(IpAddr::from([127, 0, 0, 1]), &config, listener.clone()).unwrap();
        // Accepted and kept open, never read
        let (_peer, _) = server.accept().unwrap();

        // Far more than the loopback socket buffers hold
        for _ in 0..2_000_000 {
            input.send_keyboard_input(0x41, KeyboardPacket::KEY_DOWN, 0);
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            input.stop();
            let _ = done_tx.send(());
        });

        assert!(done_rx.recv_timeout(Duration::from_secs(10)).is_ok());
        assert!(listener.terminations.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port with nothing listening
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = InputConfig {
            port,
            connect_timeout_ms: 500,
            ..Default::default()
        };

        let result = InputStream::connect(
            IpAddr::from([127, 0, 0, 1]),
            &config,
            Arc::new(CountingListener::default()),
        );
        assert!(matches!(result, Err(Error::Network(NetworkError::ConnectionFailed(_)))));
    }
}
