//! UDP runtime around a [`Dispatcher`].

use std::io::ErrorKind as IoErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::message::{encode, Packet};

/// Largest datagram accepted from clients.
pub const MAX_DATAGRAM: usize = 333_072;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_listen")]
    pub listen: SocketAddr,
    /// Synthesis server receiving node and buffer commands.
    #[serde(default = "ServerConfig::default_synth")]
    pub synth: SocketAddr,
    /// Language host receiving definition sources.
    #[serde(default = "ServerConfig::default_language")]
    pub language: SocketAddr,
    #[serde(default = "ServerConfig::default_score_dir")]
    pub score_dir: PathBuf,
    /// How long a recording waits for the language host to confirm its render.
    #[serde(default = "ServerConfig::default_render_timeout_ms")]
    pub render_timeout_ms: u64,
    #[serde(default = "ServerConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on how long worker threads sleep between shutdown checks.
    #[serde(default = "ServerConfig::default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "ServerConfig::default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ServerConfig {
    fn default_listen() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 13331))
    }

    fn default_synth() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 13337))
    }

    fn default_language() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 13336))
    }

    fn default_score_dir() -> PathBuf {
        PathBuf::from("scores")
    }

    fn default_render_timeout_ms() -> u64 {
        10_000
    }

    fn default_queue_capacity() -> usize {
        1024
    }

    fn default_poll_ms() -> u64 {
        50
    }

    fn default_log_filter() -> String {
        "info".to_owned()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            synth: Self::default_synth(),
            language: Self::default_language(),
            score_dir: Self::default_score_dir(),
            render_timeout_ms: Self::default_render_timeout_ms(),
            queue_capacity: Self::default_queue_capacity(),
            poll_ms: Self::default_poll_ms(),
            log_filter: Self::default_log_filter(),
            engine: EngineConfig::default(),
        }
    }
}

type Datagram = (Vec<u8>, SocketAddr);

/// Running server. Dropping the handle stops all threads.
pub struct ServerHandle {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Binds the socket and starts the receive, dispatch and timer threads.
    pub fn start(config: &ServerConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen)
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let poll = config.poll_interval();
        socket
            .set_read_timeout(Some(poll))
            .context("failed to set socket read timeout")?;
        let local_addr = socket.local_addr()?;
        let reply_socket = socket.try_clone().context("failed to clone socket")?;

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel::bounded::<Datagram>(config.queue_capacity.max(1));
        let mut threads = Vec::with_capacity(3);

        let recv_running = Arc::clone(&running);
        threads.push(
            thread::Builder::new()
                .name("cantor-recv".into())
                .spawn(move || receive_loop(socket, tx, recv_running))
                .context("failed to spawn receive thread")?,
        );

        let dispatch_running = Arc::clone(&running);
        let dispatch_target = Arc::clone(&dispatcher);
        threads.push(
            thread::Builder::new()
                .name("cantor-dispatch".into())
                .spawn(move || {
                    dispatch_loop(dispatch_target, reply_socket, rx, dispatch_running, poll)
                })
                .context("failed to spawn dispatch thread")?,
        );

        let timer_running = Arc::clone(&running);
        let timer_target = Arc::clone(&dispatcher);
        threads.push(
            thread::Builder::new()
                .name("cantor-timer".into())
                .spawn(move || timer_loop(timer_target, timer_running, poll))
                .context("failed to spawn timer thread")?,
        );

        tracing::info!(%local_addr, synth = %config.synth, "cantor listening");
        Ok(Self {
            local_addr,
            running,
            dispatcher,
            threads,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Shared flag; storing `false` asks every worker thread to exit.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.dispatcher.scheduler().notify();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("server thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: UdpSocket, tx: Sender<Datagram>, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((size, from)) => {
                if tx.send((buf[..size].to_vec(), from)).is_err() {
                    break;
                }
            }
            Err(err) if matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {}
            Err(err) => tracing::warn!(?err, "receive failed"),
        }
    }
}

fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    socket: UdpSocket,
    rx: Receiver<Datagram>,
    running: Arc<AtomicBool>,
    poll: Duration,
) {
    while running.load(Ordering::Acquire) {
        let (bytes, from) = match rx.recv_timeout(poll) {
            Ok(datagram) => datagram,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let report = dispatcher.handle_bytes(&bytes);
        for reply in report.replies {
            let sent = encode(&Packet::Message(reply))
                .map_err(anyhow::Error::from)
                .and_then(|bytes| Ok(socket.send_to(&bytes, from)?));
            if let Err(err) = sent {
                tracing::warn!(%from, ?err, "failed to send reply");
            }
        }
    }
}

fn timer_loop(dispatcher: Arc<Dispatcher>, running: Arc<AtomicBool>, poll: Duration) {
    while running.load(Ordering::Acquire) {
        dispatcher.scheduler().wait(poll);
        dispatcher.run_due();
    }
}
