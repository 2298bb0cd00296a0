//! Per-connection channel state machine.
//!
//! One channel per accepted stream. The inbound side is a single task that
//! reads framed messages, absorbs control documents and queues everything
//! else for the consumer; the outbound side is callable from any task and
//! serialized by a send-side lock. The state machine is generic over the
//! stream halves so QUIC streams and in-memory duplexes run the same code.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use omt_core::{
    max_frame_len, read_header, ChannelStatistics, ControlDocument, Frame, FrameKind, FramePool,
    KindMask, PooledBuffer, Quality, SenderInfo, Tally, FRAME_HEADER_SIZE, METADATA_QUEUE_LIMIT,
};

use crate::error::{Result, TransportError};
use crate::events::ChannelEvent;

/// One connected peer: send gate, receive loop state, tally and hints.
pub struct Channel<W> {
    writer: tokio::sync::Mutex<W>,
    pool: Arc<FramePool>,

    subscription: Mutex<KindMask>,
    tally: Mutex<Tally>,
    preview: AtomicBool,
    quality: Mutex<Quality>,
    sender_info: Mutex<Option<SenderInfo>>,
    redirect: Mutex<Option<String>>,
    stats: Mutex<ChannelStatistics>,

    frames: Mutex<VecDeque<Frame>>,
    metadata: Mutex<VecDeque<Frame>>,
    frame_ready: Notify,
    metadata_ready: Notify,

    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
    disconnect_emitted: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<W> Channel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a channel over a stream's write half. The receive loop is
    /// started separately with [`Channel::run_receive_loop`].
    pub fn new(
        writer: W,
        pool: Arc<FramePool>,
        events: mpsc::UnboundedSender<ChannelEvent>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            writer: tokio::sync::Mutex::new(writer),
            pool,
            subscription: Mutex::new(KindMask::NONE),
            tally: Mutex::new(Tally::NONE),
            preview: AtomicBool::new(false),
            quality: Mutex::new(Quality::Default),
            sender_info: Mutex::new(None),
            redirect: Mutex::new(None),
            stats: Mutex::new(ChannelStatistics::default()),
            frames: Mutex::new(VecDeque::new()),
            metadata: Mutex::new(VecDeque::new()),
            frame_ready: Notify::new(),
            metadata_ready: Notify::new(),
            events,
            cancel,
            disconnect_emitted: AtomicBool::new(false),
        })
    }

    /// Write one frame to the peer, returning the bytes put on the wire.
    ///
    /// Non-metadata frames are gated by the subscription mask (returns 0
    /// when masked out and counts nothing); metadata always goes through.
    /// The channel's preview flag is stamped into the wire image before
    /// writing.
    pub async fn send(&self, frame: &mut Frame) -> Result<usize> {
        if frame.kind() != FrameKind::Metadata && !lock(&self.subscription).contains(frame.kind())
        {
            return Ok(0);
        }

        frame.set_preview(self.preview.load(Ordering::Relaxed));

        let len = frame.wire_len();
        if len - FRAME_HEADER_SIZE > max_frame_len(frame.kind()) {
            lock(&self.stats).record_dropped();
            return Ok(0);
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(frame.wire_bytes()).await {
            drop(writer);
            self.emit_disconnected();
            return Err(e.into());
        }
        drop(writer);

        lock(&self.stats).record_sent(len as u64);
        Ok(len)
    }

    /// Build a metadata frame from an arbitrary payload and send it.
    pub async fn send_metadata(&self, payload: &[u8]) -> Result<usize> {
        let mut frame = Frame::build_metadata(&self.pool, 0, payload)?;
        self.send(&mut frame).await
    }

    /// Build a metadata frame for a control document and send it.
    pub async fn send_control(&self, doc: &ControlDocument) -> Result<usize> {
        self.send_metadata(doc.to_xml().as_bytes()).await
    }

    /// Run the inbound loop until cancellation, stream end or a protocol
    /// error. Emits [`ChannelEvent::Disconnected`] exactly once on every
    /// exit that was not a local shutdown.
    pub async fn run_receive_loop<R>(self: Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Unpin + Send,
    {
        match self.receive_frames(&mut reader).await {
            Ok(()) => debug!("Channel stream ended"),
            Err(e) => warn!("Channel receive loop failed: {}", e),
        }
        if !self.cancel.is_cancelled() {
            self.emit_disconnected();
        }
    }

    async fn receive_frames<R>(&self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let mut pending: Option<PooledBuffer> = None;

        loop {
            // Header first. A read of 0 before any header byte is a clean
            // close; EOF mid-header is not.
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                n = reader.read(&mut header) => n?,
            };
            if n == 0 {
                return Ok(());
            }
            if n < FRAME_HEADER_SIZE {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    r = reader.read_exact(&mut header[n..]) => { r?; }
                }
            }

            let common = read_header(&mut &header[..])?;
            let rest = common.frame_len() - FRAME_HEADER_SIZE;

            let mut buf = match pending.take().or_else(|| self.pool.acquire()) {
                Some(buf) => buf,
                None => {
                    discard_exact(reader, rest).await?;
                    lock(&self.stats).record_dropped();
                    debug!("Pool exhausted, dropped inbound {} frame", common.kind);
                    continue;
                }
            };

            buf.clear();
            if !buf.ensure_capacity(common.frame_len()) {
                discard_exact(reader, rest).await?;
                lock(&self.stats).record_dropped();
                debug!("Oversize {} frame for fixed pool buffer, dropped", common.kind);
                pending = Some(buf);
                continue;
            }

            buf.extend_from_slice(&header);
            buf.resize(common.frame_len(), 0);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                r = reader.read_exact(&mut buf[FRAME_HEADER_SIZE..]) => { r?; }
            }

            let frame = Frame::from_wire(buf)?;
            lock(&self.stats).record_received(frame.wire_len() as u64);

            if frame.kind() == FrameKind::Metadata {
                pending = self.process_metadata(frame)?;
            } else {
                lock(&self.frames).push_back(frame);
                self.frame_ready.notify_one();
            }
        }
    }

    /// Absorb control documents; queue everything else for the consumer.
    /// Returns the reusable buffer when the frame was absorbed.
    fn process_metadata(&self, frame: Frame) -> Result<Option<PooledBuffer>> {
        if frame.payload().is_empty() {
            return Err(TransportError::Protocol(omt_core::Error::InvalidControl(
                "empty metadata payload".into(),
            )));
        }

        if let Some(doc) = ControlDocument::parse(frame.payload()) {
            self.apply_control(doc);
            return Ok(Some(frame.into_buffer()));
        }

        let mut queue = lock(&self.metadata);
        if queue.len() >= METADATA_QUEUE_LIMIT {
            queue.pop_front();
            lock(&self.stats).record_dropped();
        }
        queue.push_back(frame);
        drop(queue);
        self.metadata_ready.notify_one();
        Ok(None)
    }

    fn apply_control(&self, doc: ControlDocument) {
        match doc {
            ControlDocument::SubscribeVideo => {
                lock(&self.subscription).insert(FrameKind::Video);
                debug!("Peer subscribed to video");
            }
            ControlDocument::SubscribeAudio => {
                lock(&self.subscription).insert(FrameKind::Audio);
                debug!("Peer subscribed to audio");
            }
            ControlDocument::SubscribeMetadata => {
                lock(&self.subscription).insert(FrameKind::Metadata);
                debug!("Peer subscribed to metadata");
            }
            ControlDocument::Tally(tally) => {
                let changed = {
                    let mut current = lock(&self.tally);
                    let changed = *current != tally;
                    *current = tally;
                    changed
                };
                if changed {
                    debug!(
                        "Tally changed: preview={} program={}",
                        tally.preview, tally.program
                    );
                    let _ = self.events.send(ChannelEvent::TallyChanged(tally));
                }
            }
            ControlDocument::PreviewVideo(on) => {
                self.preview.store(on, Ordering::Relaxed);
                debug!("Preview video {}", if on { "on" } else { "off" });
            }
            ControlDocument::SuggestedQuality(quality) => {
                *lock(&self.quality) = quality;
                debug!("Peer suggested {} quality", quality.as_name());
            }
            ControlDocument::SenderInfo(info) => {
                *lock(&self.sender_info) = Some(info);
            }
            ControlDocument::Redirect(address) => {
                *lock(&self.redirect) = Some(address.clone());
                let _ = self.events.send(ChannelEvent::RedirectChanged(address));
            }
        }
    }

    fn emit_disconnected(&self) {
        if !self.disconnect_emitted.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent::Disconnected);
        }
    }

    /// Stop the inbound loop and refuse further work.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the channel has been closed or lost.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.disconnect_emitted.load(Ordering::SeqCst)
    }

    /// The peer's current subscription mask.
    pub fn subscription(&self) -> KindMask {
        *lock(&self.subscription)
    }

    /// Current tally state set by the peer.
    pub fn tally(&self) -> Tally {
        *lock(&self.tally)
    }

    /// Whether the peer asked for preview-fidelity video.
    pub fn preview(&self) -> bool {
        self.preview.load(Ordering::Relaxed)
    }

    /// The peer's quality hint.
    pub fn suggested_quality(&self) -> Quality {
        *lock(&self.quality)
    }

    /// Identity advertised by the peer, if any.
    pub fn sender_info(&self) -> Option<SenderInfo> {
        lock(&self.sender_info).clone()
    }

    /// Redirect address set by the peer, if any.
    pub fn redirect(&self) -> Option<String> {
        lock(&self.redirect).clone()
    }

    /// Snapshot the statistics, resetting the since-last deltas.
    pub fn statistics(&self) -> ChannelStatistics {
        lock(&self.stats).snapshot()
    }

    /// Count a frame the owner had to discard (codec failure etc.).
    pub(crate) fn record_drop(&self) {
        lock(&self.stats).record_dropped();
    }

    /// Dequeue the next completed video/audio frame, if any.
    pub fn try_next_frame(&self) -> Option<Frame> {
        lock(&self.frames).pop_front()
    }

    /// Dequeue the next consumer-visible metadata frame, if any.
    pub fn try_next_metadata(&self) -> Option<Frame> {
        lock(&self.metadata).pop_front()
    }

    /// Signal handle pulsed when a media frame is queued.
    pub fn frame_ready(&self) -> &Notify {
        &self.frame_ready
    }

    /// Signal handle pulsed when a metadata frame is queued.
    pub fn metadata_ready(&self) -> &Notify {
        &self.metadata_ready
    }
}

async fn discard_exact<R>(reader: &mut R, mut remaining: usize) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 4096];
    while remaining > 0 {
        let take = remaining.min(scratch.len());
        let n = reader.read(&mut scratch[..take]).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        remaining -= n;
    }
    Ok(())
}
