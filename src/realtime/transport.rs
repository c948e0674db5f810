//! WebSocket transport for the realtime channel.
//!
//! Only the `websocket` transport is used; there is no long-polling fallback.

use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;
use tungstenite::handshake::HandshakeError;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

/// An open text-frame connection
pub trait Transport: Send {
    /// Next text frame, or `None` if nothing arrived within the read timeout
    fn recv(&mut self) -> Result<Option<String>>;
    fn send(&mut self, frame: &str) -> Result<()>;
    fn close(&mut self);
}

/// Opens a fresh transport for each connection attempt
pub trait Connector: Send + Sync {
    fn open(&self) -> Result<Box<dyn Transport>>;
}

/// Build the Engine.IO websocket endpoint for a server URL.
/// http(s) schemes are mapped to ws(s); an empty path becomes `/socket.io/`.
pub fn endpoint(server: &str) -> Result<Url> {
    let mut url = Url::parse(server).with_context(|| format!("Invalid socket URL: {}", server))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(anyhow!("Unsupported socket URL scheme: {}", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot use scheme {} for {}", scheme, server))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

pub struct WsConnector {
    url: Url,
    read_timeout: Duration,
    connect_timeout: Duration,
}

impl WsConnector {
    /// `connect_timeout` bounds the TCP connect and each read or write of the
    /// TLS and websocket upgrade handshakes
    pub fn new(url: Url, read_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            url,
            read_timeout,
            connect_timeout,
        }
    }

    fn connect_tcp(&self) -> Result<TcpStream> {
        let addrs = self
            .url
            .socket_addrs(|| None)
            .with_context(|| format!("Failed to resolve {}", self.url))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => anyhow!("Failed to connect to {}: {}", self.url, e),
            None => anyhow!("No addresses found for {}", self.url),
        })
    }
}

impl Connector for WsConnector {
    fn open(&self) -> Result<Box<dyn Transport>> {
        let stream = self.connect_tcp()?;
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;

        let (mut socket, _response) =
            tungstenite::client_tls(self.url.as_str(), stream).map_err(|e| match e {
                HandshakeError::Interrupted(_) => {
                    anyhow!("Handshake with {} timed out", self.url)
                }
                HandshakeError::Failure(e) => anyhow!("Failed to connect to {}: {}", self.url, e),
            })?;
        set_read_timeout(&mut socket, self.read_timeout)?;
        Ok(Box::new(WsTransport { socket }))
    }
}

fn set_read_timeout(
    socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
) -> Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout))?,
        MaybeTlsStream::Rustls(stream) => stream.get_mut().set_read_timeout(Some(timeout))?,
        _ => {}
    }
    Ok(())
}

pub struct WsTransport {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    fn recv(&mut self) -> Result<Option<String>> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Close(frame)) => Err(anyhow!(
                "transport close{}",
                frame.map(|f| format!(": {}", f.reason)).unwrap_or_default()
            )),
            // Control frames are answered by tungstenite itself
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(e) => Err(anyhow!("transport error: {}", e)),
        }
    }

    fn send(&mut self, frame: &str) -> Result<()> {
        self.socket
            .send(Message::Text(frame.to_string()))
            .context("Failed to write to socket")
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}
