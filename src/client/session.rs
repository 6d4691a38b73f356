// Client Session: the foreground object the application holds. Owns the
// Router's lifecycle, exposes request/query methods, and is the only thing
// that ever mutates the caches in `state` - always synchronously, inside
// `process_messages` or the blocking helpers built on top of it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::client::config::ClientConfig;
use crate::client::error::{ConsoledError, ConsoledResult};
use crate::client::state::{SessionState, StreamDescriptor};
use crate::codec::{AckCommand, Message};
use crate::router::{InboundEvent, RouterHandle};

/// How long a cached general status is trusted before `available_streams`
/// requests a refresh.
const STATUS_LIFETIME: Duration = Duration::from_secs(120);

/// How long `check_server` waits for the TCP handshake to complete.
const CHECK_SERVER_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `read_stream` drains the inbound channel for.
const READ_STREAM_DRAIN: Duration = Duration::from_millis(300);

/// Per-attempt wait while polling for a condition (general status arriving,
/// a subscribe acknowledgement, ...). Awaits the inbound channel directly
/// rather than busy-polling on a sleep between attempts.
const POLL_RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Foreground client for a consoled server session.
pub struct Client {
    config: ClientConfig,
    router: Option<RouterHandle>,
    state: SessionState,
}

impl Client {
    /// Allocate session state and, unless `config.no_connect`, connect.
    pub async fn construct(config: ClientConfig) -> ConsoledResult<Self> {
        let mut client = Self {
            config,
            router: None,
            state: SessionState::default(),
        };
        if !client.config.no_connect {
            client.connect(None).await?;
        }
        Ok(client)
    }

    /// Open and immediately close a TCP connection to the server port, to
    /// check reachability without establishing a session.
    pub async fn check_server(host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(CHECK_SERVER_TIMEOUT, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    /// Start the Router and wait for the first general status, or time out.
    /// A no-op if already connected.
    pub async fn connect(&mut self, host: Option<&str>) -> ConsoledResult<()> {
        if self.connected() {
            return Ok(());
        }
        if let Some(host) = host {
            self.config.server = host.to_string();
        }

        let router =
            RouterHandle::connect(&self.config.server, self.config.port, self.config.debug)
                .await?;
        self.router = Some(router);
        info!(server = %self.config.server, "connected to consoled server");

        self.req_available_streams()?;

        let deadline = Instant::now() + self.config.timeout;
        while self.state.last_general_status.is_none() && Instant::now() < deadline {
            self.process_messages(Some(POLL_RECV_TIMEOUT)).await?;
        }
        if self.state.last_general_status.is_none() {
            self.state
                .push_error("connect: no general status received before timeout");
        }
        Ok(())
    }

    /// Close every subscribed stream, shut the Router down, and clear all
    /// caches. Safe to call when not connected.
    pub async fn disconnect(&mut self) -> ConsoledResult<()> {
        let subscribed: Vec<String> = self.state.subscribed.keys().cloned().collect();
        for stream in &subscribed {
            let _ = self.req_close_stream(stream);
        }
        if let Some(router) = self.router.take() {
            // Give the Router a chance to flush the close requests before
            // the socket goes away.
            let _ = self.process_messages(Some(POLL_RECV_TIMEOUT)).await;
            router.shutdown(self.config.timeout).await;
        }
        self.state.clear();
        self.state.buffers.clear();
        info!("disconnected");
        Ok(())
    }

    /// True iff the Router is alive and the socket is connected.
    pub fn connected(&self) -> bool {
        self.router.as_ref().is_some_and(RouterHandle::is_connected)
    }

    /// Drain all inbound frames currently queued, dispatching each by
    /// `identifier` and mutating caches accordingly. Returns the number of
    /// frames processed.
    pub async fn process_messages(&mut self, timeout: Option<Duration>) -> ConsoledResult<usize> {
        let Some(router) = self.router.as_mut() else {
            return Ok(0);
        };

        let mut next = match router.try_recv() {
            Some(event) => Some(event),
            None => match timeout {
                Some(wait) => router.recv_timeout(wait).await,
                None => None,
            },
        };

        let mut count = 0;
        while let Some(event) = next {
            count += 1;
            dispatch(&mut self.state, event);
            next = router.try_recv();
        }
        Ok(count)
    }

    /// Request a general status refresh (non-blocking).
    pub fn req_available_streams(&self) -> ConsoledResult<()> {
        self.router()?.send(Message::Status)
    }

    /// The cached list of stream names, as of the last general status.
    pub fn read_available_streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.streams.keys().cloned().collect();
        names.sort();
        names
    }

    /// Refresh the cached stream list if stale, then return it.
    pub async fn available_streams(&mut self) -> ConsoledResult<Vec<String>> {
        let stale = match self.state.last_general_status {
            None => true,
            Some(last) => last.elapsed() > STATUS_LIFETIME,
        };

        if stale && self.connected() {
            self.req_available_streams()?;
            let deadline = Instant::now() + self.config.timeout * 2;
            let before = self.state.last_general_status;
            while self.state.last_general_status == before && Instant::now() < deadline {
                self.process_messages(Some(POLL_RECV_TIMEOUT)).await?;
            }
            if self.state.last_general_status == before {
                self.state
                    .push_error("available_streams: status refresh did not arrive in time");
            }
        }

        Ok(self.read_available_streams())
    }

    /// Request a subscription (non-blocking). Rejects streams the cached
    /// status does not know about.
    pub fn req_open_stream(&mut self, name: &str, mode: Option<&str>) -> ConsoledResult<()> {
        let key = name.to_uppercase();
        if !self.state.streams.contains_key(&key) {
            let msg = format!("req_open_stream: unknown stream {key}");
            self.state.push_error(msg.clone());
            return Err(ConsoledError::Config(msg));
        }
        self.router()?.send(Message::Open {
            stream: key,
            mode: mode.unwrap_or("read").to_string(),
        })
    }

    /// Request to unsubscribe (non-blocking). A no-op if not subscribed.
    pub fn req_close_stream(&mut self, name: &str) -> ConsoledResult<()> {
        let key = name.to_uppercase();
        if !self.state.subscribed.contains_key(&key) {
            return Ok(());
        }
        self.router()?.send(Message::Close { stream: key })
    }

    /// Subscribe to `name` with `mode` (default `"read"`), waiting up to
    /// `timeout` for the server to confirm every requested permission.
    pub async fn subscribe(&mut self, name: &str, mode: Option<&str>) -> ConsoledResult<()> {
        let key = name.to_uppercase();
        self.available_streams().await?;

        let requested = mode.unwrap_or("read").to_string();
        self.req_open_stream(&key, Some(&requested))?;

        let deadline = Instant::now() + self.config.timeout;
        let errors_before = self.state.errors.len();

        while Instant::now() < deadline {
            self.process_messages(Some(POLL_RECV_TIMEOUT)).await?;

            if let Some(confirmed) = self.state.subscribed.get(&key).cloned() {
                let missing: Vec<&str> = requested
                    .split_whitespace()
                    .filter(|perm| !SessionState::mode_grants(&confirmed, perm))
                    .collect();
                if missing.is_empty() {
                    info!(stream = %key, mode = %confirmed, "subscribed");
                    return Ok(());
                }
                let msg = format!(
                    "subscribe: server granted '{confirmed}' for {key} but '{requested}' was requested"
                );
                self.state.push_error(msg.clone());
                return Err(ConsoledError::Subscribe(msg));
            }

            if self.state.errors.len() > errors_before {
                let msg = format!("subscribe: {key} was rejected");
                return Err(ConsoledError::Subscribe(msg));
            }
        }

        let msg = format!("subscribe: no acknowledgement for {key} within timeout");
        self.state.push_error(msg.clone());
        Err(ConsoledError::Subscribe(msg))
    }

    /// Drain pending frames and return (and clear) the stream's receive
    /// buffer. When `timestamp_data` is set, every line is prefixed with
    /// the current time in `timestamp_fmt`, with the prefix landing at the
    /// start of each line rather than trailing a final empty one.
    pub async fn read_stream(&mut self, name: &str) -> ConsoledResult<String> {
        let key = name.to_uppercase();
        self.process_messages(Some(READ_STREAM_DRAIN)).await?;
        let raw = self.state.buffers.remove(&key).unwrap_or_default();

        if raw.is_empty() || !self.config.timestamp_data {
            return Ok(raw);
        }

        let normalized = raw.replace("\r\r\n", "\n");
        let now = chrono::Local::now()
            .format(&self.config.timestamp_fmt)
            .to_string();

        let mut out = String::with_capacity(normalized.len() + 32);
        for line in normalized.split_inclusive('\n') {
            out.push_str(&now);
            out.push(' ');
            out.push_str(line);
        }
        Ok(out)
    }

    /// Write `data` to `name` (non-blocking). Rejected if the stream is not
    /// subscribed with write permission.
    pub fn write_stream(&mut self, name: &str, data: &str) -> ConsoledResult<()> {
        let key = name.to_uppercase();
        let has_write = self
            .state
            .subscribed
            .get(&key)
            .is_some_and(|mode| SessionState::mode_grants(mode, "write"));

        if !has_write {
            self.state
                .push_error(format!("write_stream: not subscribed for write on {key}"));
            return Err(ConsoledError::NotSubscribed(key));
        }

        self.router()?.send(Message::Write {
            stream: key,
            data: format!("{data}\r\n"),
        })
    }

    /// Return the concatenation of the most recent single-shot error and
    /// any queued `fail` strings, then clear both.
    pub fn get_error(&mut self) -> String {
        self.state.take_errors()
    }

    fn router(&self) -> ConsoledResult<&RouterHandle> {
        self.router.as_ref().ok_or(ConsoledError::ConnectionLost)
    }
}

/// Apply one inbound event to the session caches. Stream names are always
/// compared case-insensitively by upper-casing on the way in.
fn dispatch(state: &mut SessionState, event: InboundEvent) {
    match event {
        InboundEvent::ProtocolError(message) => {
            warn!("dropping malformed inbound frame: {message}");
            state.push_error(message);
        }
        InboundEvent::ConnectionLost => {
            warn!("connection to consoled server lost");
            state.push_error("connection lost");
        }
        InboundEvent::Frame(frame) => dispatch_message(state, frame.message),
    }
}

fn dispatch_message(state: &mut SessionState, message: Message) {
    match message {
        Message::Data { stream, data } => {
            let key = stream.to_uppercase();
            if let Some(buffer) = state.buffers.get_mut(&key) {
                buffer.push_str(&data);
            } else {
                debug!(stream = %key, "dropping data frame for unsubscribed stream");
            }
        }

        Message::Ok {
            command,
            stream,
            mode,
            listener_count,
            writer,
            streams,
            uptime,
            client_count,
        } => match command {
            AckCommand::Open => {
                let Some(stream) = stream else {
                    warn!("ok/open acknowledgement missing stream field");
                    return;
                };
                let key = stream.to_uppercase();
                state
                    .subscribed
                    .insert(key.clone(), mode.unwrap_or_else(|| "read".to_string()));
                state.buffers.entry(key).or_default();
            }
            AckCommand::Close => {
                let Some(stream) = stream else {
                    warn!("ok/close acknowledgement missing stream field");
                    return;
                };
                let key = stream.to_uppercase();
                state.subscribed.remove(&key);
                state.buffers.remove(&key);
            }
            AckCommand::Status => match stream {
                Some(stream) => {
                    let key = stream.to_uppercase();
                    let descriptor = state.streams.entry(key).or_default();
                    descriptor.listener_count = listener_count.unwrap_or(0);
                    descriptor.writer = writer.unwrap_or_default();
                    descriptor.last_update = Some(Instant::now());
                }
                None => {
                    state.last_general_status = Some(Instant::now());
                    state.uptime = uptime;
                    state.client_count = client_count;
                    let names: HashSet<String> = streams
                        .unwrap_or_default()
                        .into_iter()
                        .map(|s| s.to_uppercase())
                        .collect();
                    state.streams.retain(|key, _| names.contains(key));
                    for name in names {
                        state.streams.entry(name).or_insert_with(StreamDescriptor::default);
                    }
                }
            },
            AckCommand::Write => {
                // acknowledgement only, nothing to cache.
            }
        },

        Message::Fail { command, error } => {
            let message = match command {
                Some(command) => format!("{command}: {error}"),
                None => error,
            };
            state.push_error(message);
        }

        other => {
            debug!(?other, "ignoring unexpected inbound frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::InboundFrame;

    fn frame(message: Message) -> InboundEvent {
        InboundEvent::Frame(InboundFrame {
            message,
            remaining: 0,
        })
    }

    #[test]
    fn dispatch_data_appends_to_existing_buffer_only() {
        let mut state = SessionState::default();
        state.buffers.insert("A".to_string(), String::new());

        dispatch(
            &mut state,
            frame(Message::Data {
                stream: "a".to_string(),
                data: "hello\n".to_string(),
            }),
        );
        dispatch(
            &mut state,
            frame(Message::Data {
                stream: "b".to_string(),
                data: "dropped".to_string(),
            }),
        );

        assert_eq!(state.buffers.get("A").unwrap(), "hello\n");
        assert!(!state.buffers.contains_key("B"));
    }

    #[test]
    fn dispatch_open_ack_creates_subscription_and_buffer() {
        let mut state = SessionState::default();
        dispatch(
            &mut state,
            frame(Message::Ok {
                command: AckCommand::Open,
                stream: Some("a".to_string()),
                mode: Some("read".to_string()),
                listener_count: None,
                writer: None,
                streams: None,
                uptime: None,
                client_count: None,
            }),
        );

        assert_eq!(state.subscribed.get("A").unwrap(), "read");
        assert!(state.buffers.contains_key("A"));
    }

    #[test]
    fn dispatch_close_ack_removes_subscription_and_buffer() {
        let mut state = SessionState::default();
        state.subscribed.insert("A".to_string(), "read".to_string());
        state.buffers.insert("A".to_string(), "leftover".to_string());

        dispatch(
            &mut state,
            frame(Message::Ok {
                command: AckCommand::Close,
                stream: Some("a".to_string()),
                mode: None,
                listener_count: None,
                writer: None,
                streams: None,
                uptime: None,
                client_count: None,
            }),
        );

        assert!(!state.subscribed.contains_key("A"));
        assert!(!state.buffers.contains_key("A"));
    }

    #[test]
    fn dispatch_general_status_drops_absent_streams() {
        let mut state = SessionState::default();
        state.streams.insert("STALE".to_string(), StreamDescriptor::default());

        dispatch(
            &mut state,
            frame(Message::Ok {
                command: AckCommand::Status,
                stream: None,
                mode: None,
                listener_count: None,
                writer: None,
                streams: Some(vec!["A".to_string(), "B".to_string()]),
                uptime: Some(10.0),
                client_count: Some(1),
            }),
        );

        assert!(!state.streams.contains_key("STALE"));
        assert!(state.streams.contains_key("A"));
        assert!(state.streams.contains_key("B"));
        assert_eq!(state.uptime, Some(10.0));
        assert_eq!(state.client_count, Some(1));
        assert!(state.last_general_status.is_some());
    }

    #[test]
    fn dispatch_per_stream_status_upserts_descriptor() {
        let mut state = SessionState::default();
        dispatch(
            &mut state,
            frame(Message::Ok {
                command: AckCommand::Status,
                stream: Some("a".to_string()),
                mode: None,
                listener_count: Some(3),
                writer: Some("alice".to_string()),
                streams: None,
                uptime: None,
                client_count: None,
            }),
        );

        let descriptor = state.streams.get("A").unwrap();
        assert_eq!(descriptor.listener_count, 3);
        assert_eq!(descriptor.writer, "alice");
    }

    #[test]
    fn dispatch_fail_with_command_formats_message() {
        let mut state = SessionState::default();
        dispatch(
            &mut state,
            frame(Message::Fail {
                command: Some("open".to_string()),
                error: "no such stream".to_string(),
            }),
        );
        assert_eq!(state.take_errors(), "open: no such stream");
    }

    #[test]
    fn dispatch_fail_without_command_uses_error_only() {
        let mut state = SessionState::default();
        dispatch(
            &mut state,
            frame(Message::Fail {
                command: None,
                error: "generic failure".to_string(),
            }),
        );
        assert_eq!(state.take_errors(), "generic failure");
    }

    #[test]
    fn dispatch_connection_lost_records_error() {
        let mut state = SessionState::default();
        dispatch(&mut state, InboundEvent::ConnectionLost);
        assert_eq!(state.take_errors(), "connection lost");
    }
}
