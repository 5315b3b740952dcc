use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::Config;
use super::error::ClientError;
use super::registry::Registry;
use super::scheduler::Scheduler;
use crate::metainfo::Metainfo;
use crate::peer::{PeerId, PeerSession, SessionContext};
use crate::store::PieceStore;
use crate::tracker::{Announce, AnnounceResponse, PeerEntry, TrackerClient, TrackerError, TrackerEvent};

/// Fallback announce cadence until the tracker supplies one.
const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);
/// How long shutdown waits for sessions to wind down on their own
/// before aborting their tasks outright.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// The client orchestrator.
///
/// Owns the store, scheduler, registry, and tracker client, and runs the
/// announce loop, the inbound listener, and the outbound dialer. One
/// `watch` channel fans the shutdown signal out to every session.
pub struct Client {
    config: Config,
    metainfo: Arc<Metainfo>,
    store: Arc<PieceStore>,
    scheduler: Arc<Scheduler>,
    registry: Arc<Registry>,
    tracker: TrackerClient,
    uploaded: Arc<AtomicU64>,
    completed_sent: AtomicBool,
    shutdown: watch::Sender<bool>,
    /// Handles of spawned session tasks, so shutdown can abort any that
    /// outlive the drain window.
    session_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Loads the descriptor, opens the store (running startup
    /// verification), and prepares the tracker client.
    pub async fn new(config: Config) -> Result<Self, ClientError> {
        let raw = tokio::fs::read(&config.metainfo_path).await?;
        let metainfo = Arc::new(Metainfo::from_bytes(&raw)?);
        let tracker = TrackerClient::new(&metainfo.announce)?;

        let store = Arc::new(
            PieceStore::open(metainfo.clone(), &config.download_dir, config.block_size).await?,
        );
        let scheduler = Arc::new(Scheduler::new(store.clone()));
        let registry = Arc::new(Registry::new(PeerId::generate(), config.max_sessions));

        tracing::info!(
            name = %metainfo.name,
            info_hash = %metainfo.info_hash,
            pieces = metainfo.piece_count(),
            have = store.verified_count(),
            "torrent loaded"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            completed_sent: AtomicBool::new(store.is_complete()),
            config,
            metainfo,
            store,
            scheduler,
            registry,
            tracker,
            uploaded: Arc::new(AtomicU64::new(0)),
            shutdown,
            session_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Arc<PieceStore> {
        &self.store
    }

    /// Raises the global shutdown signal; `run` then winds everything
    /// down and returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Runs until the shutdown signal fires: announce loop, inbound
    /// listener, and a session per reachable peer. On shutdown, stops
    /// accepting, waits briefly for sessions to drain, sends the final
    /// `stopped` announce, and flushes the store.
    pub async fn run(self: Arc<Self>) -> Result<(), ClientError> {
        let listener =
            TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        tracing::info!(port = self.config.listen_port, "listening for peers");

        let accepter = tokio::spawn(self.clone().accept_loop(listener));
        let announcer = tokio::spawn(self.clone().announce_loop());

        let mut shutdown = self.shutdown.subscribe();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        accepter.abort();
        announcer.abort();
        self.drain_sessions().await;

        if let Err(e) = self.announce(TrackerEvent::Stopped).await {
            tracing::warn!(error = %e, "final announce failed");
        }
        self.store.flush().await?;
        tracing::info!("clean shutdown");
        Ok(())
    }

    async fn announce_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut verified = self.store.subscribe();
        let mut interval = DEFAULT_ANNOUNCE_INTERVAL;
        let mut backoff = Duration::from_secs(1);
        let mut first = true;

        loop {
            let event = if std::mem::take(&mut first) {
                TrackerEvent::Started
            } else if self.store.is_complete()
                && !self.completed_sent.swap(true, Ordering::SeqCst)
            {
                tracing::info!("download complete");
                TrackerEvent::Completed
            } else {
                TrackerEvent::None
            };

            let pause = match self.announce(event).await {
                Ok(response) => {
                    backoff = Duration::from_secs(1);
                    interval = Duration::from_secs(response.interval.max(1));
                    tracing::debug!(peers = response.peers.len(), ?event, "announce ok");
                    for peer in response.peers {
                        self.dial(peer);
                    }
                    interval
                }
                Err(e) => {
                    // Exponential backoff bounded by the last-known
                    // interval; the swarm keeps moving on known peers.
                    tracing::warn!(error = %e, "announce failed");
                    let pause = backoff;
                    backoff = (backoff * 2).min(interval);
                    pause
                }
            };

            let sleep = tokio::time::sleep(pause);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    _ = shutdown.changed() => return,
                    result = verified.recv() => {
                        // Announce `completed` promptly on the transition
                        // instead of waiting out the interval.
                        if result.is_ok()
                            && self.store.is_complete()
                            && !self.completed_sent.load(Ordering::SeqCst)
                        {
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if !self.registry.try_begin(addr) {
                        continue;
                    }
                    let this = self.clone();
                    let task = tokio::spawn(async move {
                        let ctx = this.session_context();
                        match PeerSession::accept(stream, addr, ctx).await {
                            Ok(session) => {
                                if let Err(e) = session.run().await {
                                    tracing::debug!(%addr, error = %e, "inbound session ended");
                                }
                            }
                            Err(e) => tracing::debug!(%addr, error = %e, "inbound handshake failed"),
                        }
                        this.registry.end(addr);
                    });
                    self.track_session(task);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Starts an outbound session toward an announced peer unless it is
    /// ourselves, already connected, or the session cap is reached.
    fn dial(self: &Arc<Self>, peer: PeerEntry) {
        if peer.peer_id == Some(self.registry.local_id()) {
            return;
        }
        if !self.registry.try_begin(peer.addr) {
            return;
        }
        let this = self.clone();
        let addr = peer.addr;
        let task = tokio::spawn(async move {
            let ctx = this.session_context();
            match PeerSession::connect(addr, ctx).await {
                Ok(session) => {
                    if let Err(e) = session.run().await {
                        tracing::debug!(%addr, error = %e, "session ended");
                    }
                }
                Err(e) => tracing::debug!(%addr, error = %e, "dial failed"),
            }
            this.registry.end(addr);
        });
        self.track_session(task);
    }

    async fn announce(&self, event: TrackerEvent) -> Result<AnnounceResponse, TrackerError> {
        self.tracker
            .announce(&Announce {
                info_hash: self.metainfo.info_hash,
                peer_id: self.registry.local_id(),
                port: self.config.listen_port,
                uploaded: self.uploaded.load(Ordering::Relaxed),
                downloaded: self.store.bytes_verified(),
                left: self.store.bytes_left(),
                event,
            })
            .await
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            metainfo: self.metainfo.clone(),
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            registry: self.registry.clone(),
            uploaded: self.uploaded.clone(),
            pipeline_depth: self.config.pipeline_depth,
            request_timeout: self.config.request_timeout,
            keepalive_interval: self.config.keepalive_interval,
            shutdown: self.shutdown.subscribe(),
        }
    }

    /// Remembers a session task for shutdown, dropping handles of tasks
    /// that already finished.
    fn track_session(&self, task: JoinHandle<()>) {
        let mut tasks = self.session_tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Sessions observe the shutdown watch themselves; wait briefly for
    /// them to release their reservations, then abort and join whatever
    /// is left so no session can touch the store after the final flush.
    async fn drain_sessions(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.registry.session_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let tasks: Vec<JoinHandle<()>> = self.session_tasks.lock().drain(..).collect();
        let mut aborted = 0usize;
        for task in &tasks {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::warn!(aborted, "sessions did not drain in time, aborted");
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}
