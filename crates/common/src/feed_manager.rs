//! Upstream feed connection manager.
//!
//! Owns the single WebSocket connection to the external market-data feed and
//! drives its lifecycle: connect, authenticate, keepalive pings, idle-read
//! timeout, and reconnection with capped backoff. Subscription changes arrive
//! as [`ControlCommand`]s and are serviced through the handler, which buffers
//! them while the session is not ready.

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::{Error, Result};
use crate::feed_handler::FeedHandler;
use crate::messages::ControlCommand;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Configuration for the feed manager.
#[derive(Debug, Clone)]
pub struct FeedManagerConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// How long a read may idle before the connection is considered dead.
    pub read_timeout: Duration,
    /// Bound on the TCP connect + WebSocket handshake.
    pub connect_timeout: Duration,
    /// How long to wait for the upstream to acknowledge authentication.
    pub auth_timeout: Duration,
    /// Reconnect pacing.
    pub backoff: BackoffConfig,
    /// Label for metrics (e.g., "polygon").
    pub feed_label: String,
}

impl Default for FeedManagerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            feed_label: "unknown".to_string(),
        }
    }
}

/// Upstream WebSocket connection manager.
/// Reconnects on failure until shutdown, auth rejection, or attempt exhaustion.
pub struct FeedManager<H: FeedHandler> {
    handler: Arc<H>,
    config: FeedManagerConfig,
    command_rx: mpsc::Receiver<ControlCommand>,
}

impl<H: FeedHandler> FeedManager<H> {
    pub fn new(
        handler: Arc<H>,
        config: FeedManagerConfig,
        command_rx: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        Self {
            handler,
            config,
            command_rx,
        }
    }

    /// Run the feed manager until shutdown or a terminal failure.
    ///
    /// `Err(AuthFailed)` and `Err(AttemptsExhausted)` leave the session
    /// permanently disconnected; the caller decides whether to restart it.
    pub async fn run(mut self) -> Result<()> {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            match self.connect_and_run(&mut backoff).await {
                Ok(()) => {
                    info!("[{}] upstream session closed gracefully", self.config.feed_label);
                    gauge!("feed_connected", "feed" => self.config.feed_label.clone()).set(0.0);
                    return Ok(());
                }
                Err(e) if e.is_terminal() => {
                    counter!("feed_terminal_failures_total", "feed" => self.config.feed_label.clone())
                        .increment(1);
                    gauge!("feed_connected", "feed" => self.config.feed_label.clone()).set(0.0);
                    error!("[{}] upstream session terminated: {}", self.config.feed_label, e);
                    return Err(e);
                }
                Err(e) => {
                    counter!("feed_disconnects_total", "feed" => self.config.feed_label.clone())
                        .increment(1);
                    gauge!("feed_connected", "feed" => self.config.feed_label.clone()).set(0.0);
                    self.handler.on_disconnect().await;

                    let Some(delay) = backoff.next_delay() else {
                        return Err(Error::AttemptsExhausted(self.config.backoff.max_attempts));
                    };
                    warn!(
                        "[{}] upstream disconnected: {:?}, reconnecting in {:?} (attempt {})",
                        self.config.feed_label,
                        e,
                        delay,
                        backoff.attempt()
                    );
                    if self.wait_backoff(delay).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep out the backoff delay while still servicing control commands, so
    /// subscription changes made during an outage are buffered by the handler
    /// rather than lost. Returns true if shutdown was requested.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                cmd = self.command_rx.recv() => match cmd {
                    Some(ControlCommand::Shutdown) | None => return true,
                    Some(cmd) => {
                        // Not ready, so the handler buffers and returns no frame.
                        let _ = self.handler.handle_command(cmd).await;
                    }
                }
            }
        }
    }

    async fn connect_and_run(&mut self, backoff: &mut Backoff) -> Result<()> {
        let url_str = self.handler.url().to_string();
        info!("[{}] connecting to {}", self.config.feed_label, url_str);

        // Parse URL to get host and port
        let url = Url::parse(&url_str)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Generic("no host in URL".to_string()))?;
        let secure = url.scheme() == "wss";
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });
        let addr_str = format!("{}:{}", host, port);

        // Resolve DNS and prefer IPv4 to avoid IPv6 timeout issues
        let addrs: Vec<SocketAddr> = addr_str
            .to_socket_addrs()
            .map_err(|e| Error::Generic(format!("DNS resolution failed: {}", e)))?
            .collect();
        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        let mut tcp_stream = None;
        for addr in &sorted_addrs {
            debug!("[{}] trying {}", self.config.feed_label, addr);
            match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    tcp_stream = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("[{}] TCP connect to {} failed: {}", self.config.feed_label, addr, e);
                }
                Err(_) => {
                    debug!("[{}] TCP connect to {} timed out", self.config.feed_label, addr);
                }
            }
        }
        let tcp_stream = tcp_stream
            .ok_or_else(|| Error::Generic("all connection attempts failed".to_string()))?;

        // WebSocket handshake over the TCP connection, TLS for wss
        let connector = if secure {
            let mut root_store = rustls::RootCertStore::empty();
            let certs = rustls_native_certs::load_native_certs();
            for cert in certs.certs {
                let _ = root_store.add(cert);
            }
            Some(Connector::Rustls(Arc::new(
                rustls::ClientConfig::builder_with_provider(Arc::new(
                    rustls::crypto::ring::default_provider(),
                ))
                .with_safe_default_protocol_versions()
                .map_err(|e| Error::Generic(format!("TLS config error: {}", e)))?
                .with_root_certificates(root_store)
                .with_no_client_auth(),
            )))
        } else {
            Some(Connector::Plain)
        };

        let (ws_stream, response) = timeout(
            self.config.connect_timeout,
            client_async_tls_with_config(url_str.as_str(), tcp_stream, None, connector),
        )
        .await
        .map_err(|_| Error::Generic("WebSocket handshake timed out".to_string()))??;

        debug!(
            "[{}] handshake complete, status: {:?}",
            self.config.feed_label,
            response.status()
        );
        let (mut write, mut read) = ws_stream.split();
        gauge!("feed_connected", "feed" => self.config.feed_label.clone()).set(1.0);

        // Send the credential frame and start the auth clock
        if let Some(frame) = self.handler.on_connect_message() {
            write.send(Message::Text(frame.into())).await?;
        }
        let auth_timer = sleep(self.config.auth_timeout);
        tokio::pin!(auth_timer);
        let mut authed = self.handler.is_ready();

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping_interval.reset();

        loop {
            tokio::select! {
                // Idle reads mean a dead peer; reconnect
                res = timeout(self.config.read_timeout, read.next()) => {
                    let msg = match res {
                        Ok(m) => m,
                        Err(_) => {
                            warn!("[{}] read timeout after {:?}", self.config.feed_label, self.config.read_timeout);
                            counter!("feed_read_timeouts_total", "feed" => self.config.feed_label.clone()).increment(1);
                            return Err(Error::ConnectionClosed);
                        }
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            counter!("feed_frames_received_total", "feed" => self.config.feed_label.clone()).increment(1);
                            let replies = self.handler.on_message(&text).await?;
                            for frame in replies {
                                write.send(Message::Text(frame.into())).await?;
                            }
                            if !authed && self.handler.is_ready() {
                                authed = true;
                                backoff.reset();
                                info!("[{}] upstream session ready", self.config.feed_label);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("[{}] pong", self.config.feed_label);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[{}] close frame: {:?}", self.config.feed_label, frame);
                            return Err(Error::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Binary or raw frame, the feed never sends these
                        }
                        Some(Err(e)) => {
                            warn!("[{}] WebSocket error: {:?}", self.config.feed_label, e);
                            return Err(Error::WebSocket(e));
                        }
                        None => {
                            info!("[{}] stream ended", self.config.feed_label);
                            return Err(Error::ConnectionClosed);
                        }
                    }
                }

                () = &mut auth_timer, if !authed => {
                    warn!("[{}] no auth acknowledgement within {:?}", self.config.feed_label, self.config.auth_timeout);
                    return Err(Error::AuthTimeout);
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::Shutdown) => {
                            info!("[{}] shutdown requested", self.config.feed_label);
                            let close_frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "shutdown".into(),
                            };
                            let _ = write.send(Message::Close(Some(close_frame))).await;
                            return Ok(());
                        }
                        Some(cmd) => {
                            if let Some(frame) = self.handler.handle_command(cmd).await {
                                debug!("[{}] subscription update: {}", self.config.feed_label, frame);
                                write.send(Message::Text(frame.into())).await?;
                            }
                        }
                        None => {
                            info!("[{}] command channel closed", self.config.feed_label);
                            return Ok(());
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
    }
}
