use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{BlockRequest, Handshake, Message, MAX_BLOCK_LEN};
use super::peer_id::PeerId;
use super::transport::Transport;
use crate::client::{Registry, Scheduler};
use crate::metainfo::Metainfo;
use crate::store::{Delivery, PieceStore, StoreError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Cap on queued inbound requests; a flood beyond this is dropped.
const MAX_PENDING_UPLOADS: usize = 64;

/// Shared handles a session needs from the orchestrator.
#[derive(Clone)]
pub struct SessionContext {
    pub metainfo: Arc<Metainfo>,
    pub store: Arc<PieceStore>,
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<Registry>,
    /// Total bytes served to peers, shared with the announce loop.
    pub uploaded: Arc<AtomicU64>,
    pub pipeline_depth: usize,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub shutdown: watch::Receiver<bool>,
}

enum Event {
    Shutdown,
    Frame(Message),
    KeepaliveTick,
    SweepTick,
    Verified(u32),
    Skip,
}

/// One peer connection: the handshake, the four choke/interest booleans,
/// the remote bitfield, and the bounded pipeline of outstanding block
/// requests. The state machine is identical for inbound and outbound
/// connections.
pub struct PeerSession {
    transport: Transport,
    addr: SocketAddr,
    remote_id: PeerId,
    ctx: SessionContext,
    am_choking: bool,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
    remote_bitfield: Bitfield,
    outstanding: HashMap<BlockRequest, Instant>,
    pending_uploads: VecDeque<BlockRequest>,
    received_first: bool,
    last_sent: Instant,
}

impl PeerSession {
    /// Dials a peer and performs the handshake, ours first.
    pub async fn connect(addr: SocketAddr, ctx: SessionContext) -> Result<Self, PeerError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;
        let mut transport = Transport::new(stream, ctx.keepalive_interval * 2);
        transport
            .send_handshake(&Handshake::new(ctx.metainfo.info_hash, ctx.registry.local_id()))
            .await?;
        let theirs = transport.receive_handshake().await?;
        Self::establish(transport, addr, theirs, ctx)
    }

    /// Completes the handshake on an accepted connection, theirs first.
    pub async fn accept(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: SessionContext,
    ) -> Result<Self, PeerError> {
        let mut transport = Transport::new(stream, ctx.keepalive_interval * 2);
        let theirs = transport.receive_handshake().await?;
        transport
            .send_handshake(&Handshake::new(ctx.metainfo.info_hash, ctx.registry.local_id()))
            .await?;
        Self::establish(transport, addr, theirs, ctx)
    }

    fn establish(
        transport: Transport,
        addr: SocketAddr,
        theirs: Handshake,
        ctx: SessionContext,
    ) -> Result<Self, PeerError> {
        if theirs.info_hash != ctx.metainfo.info_hash {
            return Err(PeerError::BadHandshake);
        }
        // Connections to ourselves or to an already-connected peer.
        ctx.registry.claim_id(theirs.peer_id)?;

        let piece_count = ctx.metainfo.piece_count();
        Ok(Self {
            transport,
            addr,
            remote_id: theirs.peer_id,
            ctx,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            remote_bitfield: Bitfield::new(piece_count),
            outstanding: HashMap::new(),
            pending_uploads: VecDeque::new(),
            received_first: false,
            last_sent: Instant::now(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn remote_id(&self) -> PeerId {
        self.remote_id
    }

    /// Runs the session to completion. Always releases reservations, the
    /// scheduler's availability counts, and the registry claim on the way
    /// out; a close caused by the global shutdown signal is not an error.
    pub async fn run(mut self) -> Result<(), PeerError> {
        tracing::debug!(addr = %self.addr, peer = ?self.remote_id, "session open");
        let result = self.drive().await;
        let graceful = matches!(result, Err(PeerError::Shutdown));
        self.teardown(graceful).await;
        match &result {
            Err(PeerError::Shutdown) => Ok(()),
            _ => result,
        }
    }

    async fn drive(&mut self) -> Result<(), PeerError> {
        let mut verified_events = self.ctx.store.subscribe();
        let mut shutdown = self.ctx.shutdown.clone();

        // Bitfield snapshot goes out first, before any other message.
        let ours = self.ctx.store.bitfield_snapshot();
        if !ours.is_empty() {
            self.send(Message::Bitfield(ours.to_bytes())).await?;
        }

        let mut keepalive = tokio::time::interval(tick_period(self.ctx.keepalive_interval));
        let mut sweep = tokio::time::interval(tick_period(self.ctx.request_timeout));
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                return Err(PeerError::Shutdown);
            }
            self.update_interest().await?;
            self.fill_pipeline().await?;

            // Serve queued uploads before blocking on the socket again.
            if let Some(request) = self.pending_uploads.pop_front() {
                self.serve(request).await?;
                continue;
            }

            let event = tokio::select! {
                _ = shutdown.changed() => Event::Shutdown,
                message = self.transport.receive() => Event::Frame(message?),
                _ = keepalive.tick() => Event::KeepaliveTick,
                _ = sweep.tick() => Event::SweepTick,
                verified = verified_events.recv() => match verified {
                    Ok(piece) => Event::Verified(piece),
                    Err(broadcast::error::RecvError::Lagged(_)) => Event::Skip,
                    Err(broadcast::error::RecvError::Closed) => Event::Skip,
                },
            };

            match event {
                Event::Shutdown => return Err(PeerError::Shutdown),
                Event::Frame(message) => self.handle(message).await?,
                Event::KeepaliveTick => {
                    if self.last_sent.elapsed() >= self.ctx.keepalive_interval {
                        self.send(Message::KeepAlive).await?;
                    }
                }
                Event::SweepTick => self.expire_requests(),
                Event::Verified(piece) => self.send(Message::Have(piece)).await?,
                Event::Skip => {}
            }
        }
    }

    async fn handle(&mut self, message: Message) -> Result<(), PeerError> {
        let was_first = !self.received_first;
        if message != Message::KeepAlive {
            self.received_first = true;
        }

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                self.peer_choking = true;
                // Everything in flight toward this peer goes back to the
                // store for other sessions to pick up.
                self.release_outstanding();
            }
            Message::Unchoke => {
                self.peer_choking = false;
            }
            Message::Interested => {
                self.peer_interested = true;
                // No tit-for-tat: an interested peer gets unchoked.
                if self.am_choking {
                    self.am_choking = false;
                    self.send(Message::Unchoke).await?;
                }
            }
            Message::NotInterested => {
                self.peer_interested = false;
            }
            Message::Have(piece) => {
                self.remote_bitfield.set(piece);
                self.ctx.scheduler.peer_has(piece);
            }
            Message::Bitfield(payload) => {
                if !was_first {
                    return Err(PeerError::ProtocolViolation(
                        "bitfield after first message".into(),
                    ));
                }
                let bitfield =
                    Bitfield::from_wire(&payload, self.ctx.metainfo.piece_count()).ok_or_else(
                        || PeerError::ProtocolViolation("bitfield length mismatch".into()),
                    )?;
                self.ctx.scheduler.peer_joined(&bitfield);
                self.remote_bitfield = bitfield;
            }
            Message::Request(request) => {
                if self.am_choking
                    || request.length == 0
                    || request.length > MAX_BLOCK_LEN
                    || !self.ctx.store.have(request.piece)
                {
                    tracing::debug!(addr = %self.addr, ?request, "ignoring request");
                } else if self.pending_uploads.len() < MAX_PENDING_UPLOADS {
                    self.pending_uploads.push_back(request);
                }
            }
            Message::Piece {
                piece,
                offset,
                data,
            } => {
                let request = BlockRequest::new(piece, offset, data.len() as u32);
                if self.outstanding.remove(&request).is_none() {
                    tracing::debug!(addr = %self.addr, piece, offset, "unsolicited block");
                    return Ok(());
                }
                match self.ctx.store.deliver_block(piece, offset, &data).await {
                    Ok(Delivery::AcceptedVerified) | Ok(Delivery::AcceptedPartial) => {}
                    Ok(Delivery::AcceptedRejected) => {
                        tracing::warn!(addr = %self.addr, piece, "piece rejected");
                    }
                    Err(StoreError::InvalidBlock { .. }) => {
                        return Err(PeerError::ProtocolViolation("bad block geometry".into()));
                    }
                    Err(e) => {
                        tracing::error!(piece, error = %e, "block delivery failed");
                        return Err(PeerError::Io(std::io::Error::other(e)));
                    }
                }
            }
            Message::Cancel(request) => {
                self.pending_uploads.retain(|pending| *pending != request);
            }
        }
        Ok(())
    }

    /// Keeps up to `pipeline_depth` requests outstanding while unchoked
    /// and interested.
    pub(super) async fn fill_pipeline(&mut self) -> Result<(), PeerError> {
        if self.peer_choking || !self.am_interested {
            return Ok(());
        }
        while self.outstanding.len() < self.ctx.pipeline_depth {
            let Some(request) = self.ctx.scheduler.next_request(&self.remote_bitfield) else {
                break;
            };
            self.outstanding.insert(request, Instant::now());
            self.send(Message::Request(request)).await?;
        }
        Ok(())
    }

    /// Sends `interested`/`not-interested` when the remote bitfield and
    /// our own diverge from the current flag.
    async fn update_interest(&mut self) -> Result<(), PeerError> {
        let ours = self.ctx.store.bitfield_snapshot();
        let interested = self.remote_bitfield.missing_from(&ours).next().is_some();
        if interested != self.am_interested {
            self.am_interested = interested;
            let message = if interested {
                Message::Interested
            } else {
                Message::NotInterested
            };
            self.send(message).await?;
        }
        Ok(())
    }

    /// Answers one queued request from a verified piece on disk.
    async fn serve(&mut self, request: BlockRequest) -> Result<(), PeerError> {
        match self
            .ctx
            .store
            .read_block(request.piece, request.offset, request.length)
            .await
        {
            Ok(data) => {
                self.ctx
                    .uploaded
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                self.send(Message::Piece {
                    piece: request.piece,
                    offset: request.offset,
                    data,
                })
                .await
            }
            Err(StoreError::NotAvailable(_)) | Err(StoreError::InvalidBlock { .. }) => {
                tracing::debug!(addr = %self.addr, ?request, "dropping unservable request");
                Ok(())
            }
            Err(e) => Err(PeerError::Io(std::io::Error::other(e))),
        }
    }

    /// Releases reservations for requests older than the request timeout
    /// so other sessions can pick the blocks up.
    fn expire_requests(&mut self) {
        let deadline = self.ctx.request_timeout;
        let expired: Vec<BlockRequest> = self
            .outstanding
            .iter()
            .filter(|(_, sent)| sent.elapsed() > deadline)
            .map(|(request, _)| *request)
            .collect();
        for request in expired {
            tracing::debug!(addr = %self.addr, ?request, "request timed out");
            self.outstanding.remove(&request);
            self.ctx
                .store
                .release_block(request.piece, request.offset, request.length);
        }
    }

    fn release_outstanding(&mut self) {
        for (request, _) in self.outstanding.drain() {
            self.ctx
                .store
                .release_block(request.piece, request.offset, request.length);
        }
    }

    async fn teardown(&mut self, graceful: bool) {
        if graceful {
            // Best-effort cancels on a clean shutdown; the socket may
            // already be gone on error paths.
            let pending: Vec<BlockRequest> = self.outstanding.keys().copied().collect();
            for request in pending {
                let _ = self.transport.send(&Message::Cancel(request)).await;
            }
        }
        self.release_outstanding();
        self.ctx.scheduler.peer_left(&self.remote_bitfield);
        self.ctx.registry.release_id(self.remote_id);
        tracing::debug!(addr = %self.addr, peer = ?self.remote_id, "session closed");
    }

    async fn send(&mut self, message: Message) -> Result<(), PeerError> {
        self.transport.send(&message).await?;
        self.last_sent = Instant::now();
        Ok(())
    }
}

/// Timers fire at a fraction of their window so deadlines are observed
/// promptly without busy-ticking.
fn tick_period(window: Duration) -> Duration {
    (window / 4).max(Duration::from_millis(100))
}

#[cfg(test)]
impl PeerSession {
    /// Test hook: skip the message exchange and enter the requesting
    /// state directly.
    pub(super) fn assume_unchoked(&mut self, remote: Bitfield) {
        self.peer_choking = false;
        self.am_interested = true;
        self.remote_bitfield = remote;
    }

    pub(super) fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Test hook: drop one outstanding request as if its block had been
    /// answered, without touching the store.
    pub(super) fn forget_one_outstanding(&mut self) -> Option<BlockRequest> {
        let request = self.outstanding.keys().next().copied()?;
        self.outstanding.remove(&request);
        Some(request)
    }
}
