//! A short-lived, line-oriented session with the bouncer.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

use common::config::BouncerConfig;
use common::{Result, SweepError};

use crate::listing::check_logon_reply;
use crate::tls;

const READ_CHUNK: usize = 8192;

/// Byte stream the session runs over: plain TCP, TLS, or an in-memory pipe.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// What a read saw before it stopped.
struct Collected {
    text: String,
    /// The server closed the connection after sending `text`.
    closed: bool,
}

pub struct BouncerSession {
    stream: Box<dyn Transport>,
    idle: Duration,
}

impl BouncerSession {
    /// Open a TCP connection, wrapping it in TLS when configured.
    pub async fn connect(config: &BouncerConfig) -> Result<Self> {
        let endpoint = format!("{}:{}", config.host, config.port);
        log::debug!("Connecting to bouncer at {endpoint}");

        let tcp = timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| {
            SweepError::disconnected(format!(
                "Timed out after {:?} connecting to {endpoint}",
                config.connect_timeout
            ))
        })?
        .map_err(|e| SweepError::connection(format!("Failed to connect to {endpoint}"), e))?;

        let stream: Box<dyn Transport> = if config.tls.enabled {
            Box::new(tls::connect(&config.host, &config.tls, tcp).await?)
        } else {
            Box::new(tcp)
        };

        Ok(Self {
            stream,
            idle: config.idle_timeout,
        })
    }

    pub fn from_stream(stream: impl Transport + 'static, idle: Duration) -> Self {
        Self {
            stream: Box::new(stream),
            idle,
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        if line.contains(['\r', '\n']) {
            return Err(SweepError::Configuration(
                "refusing to send a command containing a line break".to_string(),
            ));
        }
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| SweepError::connection("Failed to write to bouncer", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| SweepError::connection("Failed to flush bouncer connection", e))
    }

    /// Collect everything the server sends in answer to the last request.
    ///
    /// The answer is complete once a full idle period passes after the last
    /// received byte, or once twice the idle period passes with nothing
    /// received at all. The latter yields an empty string, leaving it to the
    /// caller to decide whether silence is acceptable.
    ///
    /// The server never closes the session while answering, so an EOF at
    /// any point is a broken exchange. A partial answer is discarded.
    pub async fn receive(&mut self) -> Result<String> {
        let collected = self.collect().await?;
        if collected.closed {
            return Err(SweepError::disconnected(format!(
                "Bouncer closed the connection mid-response after {} bytes",
                collected.text.len()
            )));
        }
        Ok(collected.text)
    }

    async fn collect(&mut self) -> Result<Collected> {
        let issued = Instant::now();
        let mut received = Vec::new();
        let mut last_byte_at: Option<Instant> = None;
        let mut closed = false;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let deadline = match last_byte_at {
                Some(at) => at + self.idle,
                None => issued + self.idle * 2,
            };

            match timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) if received.is_empty() => {
                    return Err(SweepError::disconnected(
                        "Bouncer closed the connection before responding",
                    ));
                }
                Ok(Ok(0)) => {
                    closed = true;
                    break;
                }
                Ok(Ok(n)) => {
                    received.extend_from_slice(&chunk[..n]);
                    last_byte_at = Some(Instant::now());
                }
                Ok(Err(e)) => {
                    return Err(SweepError::connection("Failed to read from bouncer", e));
                }
            }
        }

        log::trace!(
            "Received {} bytes in {:?}",
            received.len(),
            issued.elapsed()
        );
        Ok(Collected {
            text: String::from_utf8_lossy(&received).into_owned(),
            closed,
        })
    }

    /// Send one request line and collect its answer.
    pub async fn request(&mut self, line: &str) -> Result<String> {
        self.send_line(line).await?;
        self.receive().await
    }

    /// Register with the bouncer using `user:password` as server password.
    pub async fn logon(&mut self, username: &str, password: &str) -> Result<()> {
        self.send_line(&format!("NICK {username}")).await?;
        self.send_line(&format!("PASS {username}:{password}")).await?;
        self.send_line(&format!("USER {username} 0 * :{username}"))
            .await?;
        // A rejected password is answered and then hung up on, so look at
        // the reply before treating the close as a broken connection
        let reply = self.collect().await?;
        check_logon_reply(&reply.text)?;
        if reply.closed {
            return Err(SweepError::disconnected(
                "Bouncer closed the connection during logon",
            ));
        }
        Ok(())
    }

    /// Say goodbye and close. Failures here do not matter any more.
    pub async fn quit(mut self) {
        if let Err(e) = self.send_line("QUIT").await {
            log::debug!("Ignoring error while closing bouncer session: {e}");
        }
        if let Err(e) = self.stream.shutdown().await {
            log::debug!("Ignoring error while shutting down bouncer connection: {e}");
        }
    }
}
