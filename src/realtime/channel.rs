//! Shared realtime connection with bounded automatic reconnection.
//!
//! One worker thread owns the transport. The shell talks to it through a
//! command queue and receives [`ChannelEvent`]s through an event queue; the
//! current [`ChannelState`] is shared behind a mutex.

use super::packet::{EnginePacket, Handshake, Packet, PacketKind};
use super::transport::{Connector, Transport};
use crate::preferences::{Preferences, ACCESS_TOKEN_KEY};
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reconnection behaviour after a lost or failed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt` (1-based), or `None` once
    /// the policy is exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.enabled && attempt >= 1 && attempt <= self.attempts {
            Some(self.delay)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub reconnect: ReconnectPolicy,
    /// Time allowed for the Engine.IO open and Socket.IO connect handshake
    pub connect_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected { sid: String },
    Reconnecting { attempt: u32 },
    /// Reconnection attempts exhausted
    Failed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected { sid } => write!(f, "connected (sid {})", sid),
            ChannelState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {})", attempt)
            }
            ChannelState::Failed => write!(f, "failed (reconnection attempts exhausted)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected { sid: String },
    ConnectError(String),
    Disconnected(String),
    ReconnectAttempt(u32),
    ReconnectFailed,
    Event { name: String, args: Vec<Value> },
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Connected { .. } => "connect",
            ChannelEvent::ConnectError(_) => "connect_error",
            ChannelEvent::Disconnected(_) => "disconnect",
            ChannelEvent::ReconnectAttempt(_) => "reconnect_attempt",
            ChannelEvent::ReconnectFailed => "reconnect_failed",
            ChannelEvent::Event { .. } => "event",
        }
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelEvent::Connected { sid } => write!(f, "connected (sid {})", sid),
            ChannelEvent::ConnectError(e) => write!(f, "connect error: {}", e),
            ChannelEvent::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            ChannelEvent::ReconnectAttempt(n) => write!(f, "reconnect attempt {}", n),
            ChannelEvent::ReconnectFailed => write!(f, "reconnection failed, giving up"),
            ChannelEvent::Event { name, args } => {
                write!(f, "{} {}", name, Value::Array(args.clone()))
            }
        }
    }
}

enum Command {
    Emit(Packet),
    Disconnect,
}

/// Why a connected session ended
enum Ended {
    /// Local disconnect or the handle went away
    Client,
    /// Server disconnected this socket on purpose; no reconnection
    Server,
    Lost(String),
}

/// The server refused the Socket.IO connect (e.g. auth middleware); not retried
#[derive(Debug)]
struct Rejected(String);

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Rejected {}

/// Auth payload for a connection attempt, read fresh from preferences
pub fn auth_payload(prefs: &dyn Preferences) -> Value {
    let token = match prefs.get(ACCESS_TOKEN_KEY) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("Realtime: failed to read access token: {}", e);
            None
        }
    };
    json!({ "accessToken": token })
}

struct Worker {
    connector: Arc<dyn Connector>,
    prefs: Arc<dyn Preferences>,
    settings: ChannelSettings,
    state: Arc<Mutex<ChannelState>>,
    commands: Receiver<Command>,
    events: Sender<ChannelEvent>,
    pending: VecDeque<Packet>,
    stopped: bool,
}

impl Worker {
    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn emit_event(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    fn run(mut self) {
        // Reconnection attempts since the last successful connection
        let mut attempt: u32 = 0;

        loop {
            self.set_state(if attempt == 0 {
                ChannelState::Connecting
            } else {
                ChannelState::Reconnecting { attempt }
            });

            let auth = auth_payload(self.prefs.as_ref());
            match self.establish(&auth) {
                Ok((transport, sid, handshake)) => {
                    attempt = 0;
                    self.set_state(ChannelState::Connected { sid: sid.clone() });
                    self.emit_event(ChannelEvent::Connected { sid });
                    match self.pump(transport, handshake) {
                        Ended::Client => {
                            self.emit_event(ChannelEvent::Disconnected(
                                "io client disconnect".to_string(),
                            ));
                            break;
                        }
                        Ended::Server => {
                            self.emit_event(ChannelEvent::Disconnected(
                                "io server disconnect".to_string(),
                            ));
                            break;
                        }
                        Ended::Lost(reason) => {
                            self.emit_event(ChannelEvent::Disconnected(reason));
                        }
                    }
                }
                Err(e) if !self.stopped => {
                    let rejected = e.downcast_ref::<Rejected>().is_some();
                    self.emit_event(ChannelEvent::ConnectError(e.to_string()));
                    if rejected {
                        break;
                    }
                }
                Err(_) => {}
            }

            if self.stopped {
                break;
            }
            if !self.settings.reconnect.enabled {
                break;
            }

            attempt += 1;
            let Some(delay) = self.settings.reconnect.delay_for(attempt) else {
                self.emit_event(ChannelEvent::ReconnectFailed);
                self.set_state(ChannelState::Failed);
                return;
            };
            self.set_state(ChannelState::Reconnecting { attempt });
            if !self.wait(delay) {
                break;
            }
            self.emit_event(ChannelEvent::ReconnectAttempt(attempt));
        }

        self.set_state(ChannelState::Disconnected);
    }

    /// Sleep for `delay` while still accepting commands. Returns false if a
    /// disconnect was requested.
    fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.commands.recv_timeout(remaining) {
                Ok(Command::Emit(packet)) => self.pending.push_back(packet),
                Ok(Command::Disconnect) | Err(RecvTimeoutError::Disconnected) => {
                    self.stopped = true;
                    return false;
                }
                Err(RecvTimeoutError::Timeout) => return true,
            }
        }
    }

    fn establish(&mut self, auth: &Value) -> Result<(Box<dyn Transport>, String, Handshake)> {
        let mut transport = self.connector.open()?;
        let deadline = Instant::now() + self.settings.connect_timeout;
        let mut handshake = None;

        let result = self.transport_loop(&mut *transport, deadline, |transport, packet| {
            handshake_step(transport, packet, auth, &mut handshake)
        });
        let sid = match result {
            Ok(sid) => sid,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        let handshake = handshake.ok_or_else(|| anyhow!("connected without an open packet"))?;
        Ok((transport, sid, handshake))
    }

    /// Buffer queued emits. Returns false once a disconnect was requested.
    fn poll_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Emit(packet)) => self.pending.push_back(packet),
                Ok(Command::Disconnect) | Err(TryRecvError::Disconnected) => {
                    self.stopped = true;
                    return false;
                }
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    /// Read frames until `handle` yields a value, fails, or the deadline passes
    fn transport_loop<T>(
        &mut self,
        transport: &mut dyn Transport,
        deadline: Instant,
        mut handle: impl FnMut(&mut dyn Transport, EnginePacket) -> Result<Option<T>>,
    ) -> Result<T> {
        loop {
            if !self.poll_commands() {
                return Err(anyhow!("disconnect requested"));
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("timeout"));
            }
            let Some(frame) = transport.recv()? else {
                continue;
            };
            let packet = EnginePacket::decode(&frame)?;
            if let Some(value) = handle(transport, packet)? {
                return Ok(value);
            }
        }
    }

    fn pump(&mut self, mut transport: Box<dyn Transport>, handshake: Handshake) -> Ended {
        let ping_deadline =
            Duration::from_millis(handshake.ping_interval_ms + handshake.ping_timeout_ms);
        let mut last_seen = Instant::now();

        while let Some(packet) = self.pending.pop_front() {
            if let Err(e) = transport.send(&packet.to_frame()) {
                return Ended::Lost(e.to_string());
            }
        }

        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(Command::Emit(packet)) => {
                        if let Err(e) = transport.send(&packet.to_frame()) {
                            return Ended::Lost(e.to_string());
                        }
                    }
                    Ok(Command::Disconnect) | Err(TryRecvError::Disconnected) => {
                        self.stopped = true;
                        let _ = transport.send(&Packet::disconnect().to_frame());
                        transport.close();
                        return Ended::Client;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            let frame = match transport.recv() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    if last_seen.elapsed() > ping_deadline {
                        transport.close();
                        return Ended::Lost("ping timeout".to_string());
                    }
                    continue;
                }
                Err(e) => return Ended::Lost(e.to_string()),
            };
            last_seen = Instant::now();

            let packet = match EnginePacket::decode(&frame) {
                Ok(packet) => packet,
                Err(e) => {
                    eprintln!("Realtime: dropping malformed frame: {}", e);
                    continue;
                }
            };
            match packet {
                EnginePacket::Ping(data) => {
                    if let Err(e) = transport.send(&EnginePacket::Pong(data).encode()) {
                        return Ended::Lost(e.to_string());
                    }
                }
                EnginePacket::Close => {
                    transport.close();
                    return Ended::Lost("transport close".to_string());
                }
                EnginePacket::Message(payload) => match Packet::decode(&payload) {
                    Ok(packet) if packet.nsp == "/" => match packet.kind {
                        PacketKind::Disconnect => {
                            transport.close();
                            return Ended::Server;
                        }
                        PacketKind::Event => {
                            if let Some((name, args)) = packet.as_event() {
                                self.emit_event(ChannelEvent::Event {
                                    name: name.to_string(),
                                    args: args.to_vec(),
                                });
                            }
                        }
                        _ => {}
                    },
                    Ok(_) => {}
                    Err(e) => eprintln!("Realtime: dropping malformed packet: {}", e),
                },
                _ => {}
            }
        }
    }
}

/// Handle one frame of the connect handshake; yields the socket id once connected
fn handshake_step(
    transport: &mut dyn Transport,
    packet: EnginePacket,
    auth: &Value,
    handshake: &mut Option<Handshake>,
) -> Result<Option<String>> {
    match packet {
        EnginePacket::Open(data) => {
            *handshake = Some(Handshake::from_open(&data));
            transport.send(&Packet::connect(auth.clone()).to_frame())?;
            Ok(None)
        }
        EnginePacket::Ping(data) => {
            transport.send(&EnginePacket::Pong(data).encode())?;
            Ok(None)
        }
        EnginePacket::Close => Err(anyhow!("server closed the connection during handshake")),
        EnginePacket::Message(payload) => {
            let packet = Packet::decode(&payload)?;
            if packet.nsp != "/" {
                return Ok(None);
            }
            match packet.kind {
                PacketKind::Connect => {
                    let sid = packet
                        .data
                        .as_ref()
                        .and_then(|d| d["sid"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(Some(sid))
                }
                PacketKind::ConnectError => {
                    let message = packet
                        .data
                        .as_ref()
                        .and_then(|d| d["message"].as_str().map(String::from))
                        .unwrap_or_else(|| "connection refused".to_string());
                    Err(Rejected(message).into())
                }
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

/// Handle to the application's single realtime connection
pub struct RealtimeChannel {
    connector: Arc<dyn Connector>,
    prefs: Arc<dyn Preferences>,
    settings: ChannelSettings,
    state: Arc<Mutex<ChannelState>>,
    commands: Option<Sender<Command>>,
    events: Option<Receiver<ChannelEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl RealtimeChannel {
    pub fn new(
        connector: Arc<dyn Connector>,
        prefs: Arc<dyn Preferences>,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            connector,
            prefs,
            settings,
            state: Arc::new(Mutex::new(ChannelState::Disconnected)),
            commands: None,
            events: None,
            worker: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start connecting. No-op while a worker is already running.
    pub fn connect(&mut self) {
        if self.is_running() {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let worker = Worker {
            connector: self.connector.clone(),
            prefs: self.prefs.clone(),
            settings: self.settings,
            state: self.state.clone(),
            commands: command_rx,
            events: event_tx,
            pending: VecDeque::new(),
            stopped: false,
        };
        self.set_state(ChannelState::Connecting);
        self.commands = Some(command_tx);
        self.events = Some(event_rx);
        self.worker = Some(thread::spawn(move || worker.run()));
    }

    /// Stop the worker and wait for it to exit
    pub fn disconnect(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Disconnect);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.set_state(ChannelState::Disconnected);
    }

    /// Restart from scratch with a fresh attempt budget
    pub fn reconnect(&mut self) {
        self.disconnect();
        self.connect();
    }

    /// Queue an event. Packets emitted before the connection is up are sent
    /// once it is established.
    pub fn emit(&self, name: &str, args: Vec<Value>) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .filter(|_| self.is_running())
            .ok_or_else(|| anyhow!("Realtime channel is not running (state: {})", self.state()))?;
        commands
            .send(Command::Emit(Packet::event(name, args)))
            .map_err(|_| anyhow!("Realtime channel worker has stopped"))
    }

    /// Events received since the last call
    pub fn drain_events(&self) -> Vec<ChannelEvent> {
        self.events
            .as_ref()
            .map(|events| events.try_iter().collect())
            .unwrap_or_default()
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferences;
    use crate::realtime::transport::{endpoint, WsConnector};
    use std::net::TcpListener;

    const OPEN: &str = r#"0{"sid":"eio","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    /// Replays a fixed list of inbound frames, then reports the connection lost
    struct ScriptedTransport {
        inbound: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
        hold_open: bool,
    }

    impl Transport for ScriptedTransport {
        fn recv(&mut self) -> Result<Option<String>> {
            match self.inbound.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.hold_open => {
                    thread::sleep(Duration::from_millis(5));
                    Ok(None)
                }
                None => Err(anyhow!("connection reset")),
            }
        }

        fn send(&mut self, frame: &str) -> Result<()> {
            self.sent.lock().unwrap().push(frame.to_string());
            Ok(())
        }

        fn close(&mut self) {}
    }

    /// Each `open` consumes the next script; `None` scripts refuse the connection
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Option<(Vec<String>, bool)>>>,
        opens: Mutex<Vec<Instant>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Option<(Vec<&str>, bool)>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|s| s.map(|(frames, hold)| {
                            (frames.into_iter().map(String::from).collect(), hold)
                        }))
                        .collect(),
                ),
                opens: Mutex::new(Vec::new()),
                sent: Arc::new(Mutex::new(Vec::new())),
            })
        }

        fn open_times(&self) -> Vec<Instant> {
            self.opens.lock().unwrap().clone()
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Connector for ScriptedConnector {
        fn open(&self) -> Result<Box<dyn Transport>> {
            self.opens.lock().unwrap().push(Instant::now());
            match self.scripts.lock().unwrap().pop_front().flatten() {
                Some((inbound, hold_open)) => Ok(Box::new(ScriptedTransport {
                    inbound: inbound.into(),
                    sent: self.sent.clone(),
                    hold_open,
                })),
                None => Err(anyhow!("connection refused")),
            }
        }
    }

    fn settings(attempts: u32, delay_ms: u64) -> ChannelSettings {
        ChannelSettings {
            reconnect: ReconnectPolicy {
                enabled: true,
                attempts,
                delay: Duration::from_millis(delay_ms),
            },
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn wait_until(done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for(channel: &RealtimeChannel, done: impl Fn(&ChannelState) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(&channel.state()) {
            assert!(Instant::now() < deadline, "timed out in state {}", channel.state());
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_default_policy_is_five_attempts_one_second_apart() {
        let policy = ReconnectPolicy::default();
        assert!(policy.enabled);
        let delays: Vec<_> = (1..=10).filter_map(|n| policy.delay_for(n)).collect();
        assert_eq!(delays, vec![Duration::from_millis(1000); 5]);
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(6), None);
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let policy = ReconnectPolicy {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), None);
    }

    #[test]
    fn test_auth_payload_reads_persisted_token() {
        let prefs = MemoryPreferences::new();
        assert_eq!(auth_payload(&prefs), json!({ "accessToken": null }));
        prefs.set(ACCESS_TOKEN_KEY, "tok").unwrap();
        assert_eq!(auth_payload(&prefs), json!({ "accessToken": "tok" }));
    }

    #[test]
    fn test_connect_sends_auth_and_delivers_events() {
        let connector = ScriptedConnector::new(vec![Some((
            vec![OPEN, r#"40{"sid":"s1"}"#, "2", r#"42["friendRequest",{"from":"bob"}]"#],
            true,
        ))]);
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set(ACCESS_TOKEN_KEY, "tok").unwrap();

        let mut channel = RealtimeChannel::new(connector.clone(), prefs, settings(5, 10));
        channel.connect();
        wait_for(&channel, |s| matches!(s, ChannelState::Connected { .. }));
        assert_eq!(
            channel.state(),
            ChannelState::Connected {
                sid: "s1".to_string()
            }
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while !events.iter().any(|e: &ChannelEvent| e.kind() == "event") {
            assert!(Instant::now() < deadline);
            events.extend(channel.drain_events());
            thread::sleep(Duration::from_millis(5));
        }
        assert!(events.contains(&ChannelEvent::Event {
            name: "friendRequest".to_string(),
            args: vec![json!({ "from": "bob" })],
        }));

        let sent = connector.sent();
        assert_eq!(sent[0], r#"40{"accessToken":"tok"}"#);
        assert!(sent.contains(&"3".to_string()));

        channel.disconnect();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(connector.sent().contains(&"41".to_string()));
    }

    #[test]
    fn test_reconnects_at_most_policy_attempts_then_stops() {
        // First connection succeeds and then drops; every retry is refused.
        let connector =
            ScriptedConnector::new(vec![Some((vec![OPEN, r#"40{"sid":"s1"}"#], false))]);
        let delay_ms = 30;
        let mut channel = RealtimeChannel::new(
            connector.clone(),
            Arc::new(MemoryPreferences::new()),
            settings(5, delay_ms),
        );
        channel.connect();
        wait_for(&channel, |s| *s == ChannelState::Failed);

        let opens = connector.open_times();
        assert_eq!(opens.len(), 1 + 5);
        for pair in opens.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(delay_ms));
        }

        let events = channel.drain_events();
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::ReconnectAttempt(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
        assert_eq!(events.last(), Some(&ChannelEvent::ReconnectFailed));

        thread::sleep(Duration::from_millis(3 * delay_ms));
        assert_eq!(connector.open_times().len(), 6);
        assert!(!channel.is_running());
        assert!(channel.emit("ping", vec![]).is_err());
    }

    #[test]
    fn test_explicit_reconnect_after_failure_gets_fresh_budget() {
        let connector = ScriptedConnector::new(vec![]);
        let mut channel = RealtimeChannel::new(
            connector.clone(),
            Arc::new(MemoryPreferences::new()),
            settings(2, 1),
        );
        channel.connect();
        wait_for(&channel, |s| *s == ChannelState::Failed);
        assert_eq!(connector.open_times().len(), 3);

        channel.reconnect();
        wait_for(&channel, |s| *s == ChannelState::Failed);
        assert_eq!(connector.open_times().len(), 6);
    }

    #[test]
    fn test_successful_connection_resets_attempt_budget() {
        let connector = ScriptedConnector::new(vec![
            None,
            Some((vec![OPEN, r#"40{"sid":"a"}"#], false)),
            None,
        ]);
        let mut channel = RealtimeChannel::new(
            connector.clone(),
            Arc::new(MemoryPreferences::new()),
            settings(2, 1),
        );
        channel.connect();
        wait_for(&channel, |s| *s == ChannelState::Failed);
        // refused, retry 1 connects, then two more refused retries
        assert_eq!(connector.open_times().len(), 4);
    }

    #[test]
    fn test_rejected_connect_is_reported_and_not_retried() {
        let connector = ScriptedConnector::new(vec![
            Some((vec![OPEN, r#"44{"message":"Not authorized"}"#], true)),
            Some((vec![OPEN, r#"40{"sid":"s"}"#], true)),
        ]);
        let mut channel = RealtimeChannel::new(
            connector.clone(),
            Arc::new(MemoryPreferences::new()),
            settings(5, 1),
        );
        channel.connect();
        wait_until(|| !channel.is_running());

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(connector.open_times().len(), 1);
        let events = channel.drain_events();
        assert_eq!(
            events[0],
            ChannelEvent::ConnectError("Not authorized".to_string())
        );
        assert!(!events.iter().any(|e| e.kind() == "reconnect_attempt"));
    }

    #[test]
    fn test_each_attempt_reads_current_token() {
        let connector = ScriptedConnector::new(vec![
            Some((vec![OPEN, r#"40{"sid":"a"}"#], false)),
            Some((vec![OPEN, r#"40{"sid":"b"}"#], false)),
            Some((vec![OPEN, r#"40{"sid":"c"}"#], true)),
        ]);
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set(ACCESS_TOKEN_KEY, "old").unwrap();
        let mut channel = RealtimeChannel::new(connector.clone(), prefs.clone(), settings(5, 200));
        let connect_frames = || -> Vec<String> {
            connector
                .sent()
                .into_iter()
                .filter(|f| f.starts_with("40"))
                .collect()
        };

        channel.connect();
        wait_until(|| connect_frames().len() == 1);
        prefs.set(ACCESS_TOKEN_KEY, "new").unwrap();

        wait_until(|| connect_frames().len() == 2);
        prefs.remove(ACCESS_TOKEN_KEY).unwrap();

        wait_for(&channel, |s| {
            *s == ChannelState::Connected {
                sid: "c".to_string(),
            }
        });
        assert_eq!(
            connect_frames(),
            vec![
                r#"40{"accessToken":"old"}"#.to_string(),
                r#"40{"accessToken":"new"}"#.to_string(),
                r#"40{"accessToken":null}"#.to_string(),
            ]
        );
        channel.disconnect();
    }

    #[test]
    fn test_stalled_server_counts_as_failed_attempt() {
        // Never accepted: the TCP connect completes in the backlog, the upgrade never does
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = endpoint(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
        let connector = Arc::new(WsConnector::new(
            url,
            Duration::from_millis(20),
            Duration::from_millis(200),
        ));
        let mut channel = RealtimeChannel::new(
            connector,
            Arc::new(MemoryPreferences::new()),
            settings(1, 1),
        );

        channel.connect();
        wait_for(&channel, |s| *s == ChannelState::Failed);
        let events = channel.drain_events();
        assert!(matches!(events[0], ChannelEvent::ConnectError(_)));
        assert!(events.contains(&ChannelEvent::ReconnectFailed));

        channel.reconnect();
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        channel.disconnect();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_server_disconnect_does_not_reconnect() {
        let connector =
            ScriptedConnector::new(vec![Some((vec![OPEN, r#"40{"sid":"s"}"#, "41"], true))]);
        let mut channel = RealtimeChannel::new(
            connector.clone(),
            Arc::new(MemoryPreferences::new()),
            settings(5, 1),
        );
        channel.connect();
        wait_for(&channel, |s| *s == ChannelState::Disconnected);
        let deadline = Instant::now() + Duration::from_secs(5);
        while channel.is_running() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(connector.open_times().len(), 1);
        assert!(channel
            .drain_events()
            .contains(&ChannelEvent::Disconnected("io server disconnect".to_string())));
    }

    #[test]
    fn test_emit_before_connect_is_flushed_on_connect() {
        let connector = ScriptedConnector::new(vec![
            None,
            Some((vec![OPEN, r#"40{"sid":"s"}"#], true)),
        ]);
        let mut channel = RealtimeChannel::new(
            connector.clone(),
            Arc::new(MemoryPreferences::new()),
            settings(3, 50),
        );
        channel.connect();
        channel.emit("hello", vec![json!(1)]).unwrap();
        wait_for(&channel, |s| matches!(s, ChannelState::Connected { .. }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !connector.sent().contains(&r#"42["hello",1]"#.to_string()) {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        channel.disconnect();
    }
}
