//! Sending endpoint: QUIC listener, codec lifecycle and frame fan-out.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use omt_core::{
    AudioHeader, ChannelStatistics, Codec, ColorSpace, ControlDocument, Frame, FrameRate,
    FramePool, Quality, SenderInfo, VideoFlags, VideoHeader,
};
use omt_ptp::{ClockAdapter, LocalTimeSource, TimeSource};

use crate::channel::Channel;
use crate::codec::{AudioEncoder, CodecFactory, VideoEncoder};
use crate::config::{PoolConfig, SenderConfig};
use crate::error::{Result, TransportError};
use crate::events::ChannelEvent;
use crate::tls;
use crate::{CONNECTION_CLOSE_CODE, DEFAULT_PORT, PORT_RANGE_END};

/// One raw or pre-compressed video frame handed to [`Sender::send_video`].
#[derive(Debug, Clone, Copy)]
pub struct OutboundVideo<'a> {
    /// Format description; `header.codec` is the wire codec
    pub header: VideoHeader,
    /// Pixel data, or the compressed bitstream when `compressed`
    pub data: &'a [u8],
    /// Source row pitch in bytes (ignored for compressed input)
    pub stride: usize,
    /// Whether `data` is already in the wire codec's bitstream form
    pub compressed: bool,
    /// Per-frame metadata appended after the media payload
    pub frame_metadata: &'a [u8],
}

/// One audio chunk handed to [`Sender::send_audio`].
#[derive(Debug, Clone, Copy)]
pub struct OutboundAudio<'a> {
    /// Format description; `header.codec` is the wire codec
    pub header: AudioHeader,
    /// Planar-float samples, or the compressed bitstream when `compressed`
    pub data: &'a [u8],
    /// Whether `data` is already in the wire codec's bitstream form
    pub compressed: bool,
    /// Per-frame metadata appended after the media payload
    pub frame_metadata: &'a [u8],
}

/// Parameters whose change forces a video encoder rebuild.
#[derive(Debug, Clone, Copy, PartialEq)]
struct VideoParams {
    codec: Codec,
    width: u32,
    height: u32,
    frame_rate: FrameRate,
    colorspace: ColorSpace,
}

impl From<&VideoHeader> for VideoParams {
    fn from(header: &VideoHeader) -> Self {
        Self {
            codec: header.codec,
            width: header.width,
            height: header.height,
            frame_rate: header.frame_rate,
            colorspace: header.colorspace,
        }
    }
}

/// Parameters whose change forces an audio encoder rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioParams {
    codec: Codec,
    sample_rate: u32,
    channels: u32,
}

impl From<&AudioHeader> for AudioParams {
    fn from(header: &AudioHeader) -> Self {
        Self {
            codec: header.codec,
            sample_rate: header.sample_rate,
            channels: header.channels,
        }
    }
}

struct VideoEncoderSlot {
    params: VideoParams,
    quality: Quality,
    encoder: Box<dyn VideoEncoder>,
    scratch: BytesMut,
}

struct AudioEncoderSlot {
    params: AudioParams,
    encoder: Box<dyn AudioEncoder>,
    scratch: BytesMut,
}

type QuicChannel = Channel<quinn::SendStream>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A logical media source: one QUIC listener, one channel per accepted
/// stream, shared codec instances and a common time base.
pub struct Sender {
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
    channels: Arc<Mutex<Vec<Arc<QuicChannel>>>>,

    video_pool: Arc<FramePool>,
    audio_pool: Arc<FramePool>,
    metadata_pool: Arc<FramePool>,

    factory: Arc<dyn CodecFactory>,
    video_encoder: Mutex<Option<VideoEncoderSlot>>,
    audio_encoder: Mutex<Option<AudioEncoderSlot>>,

    time_source: RwLock<Arc<dyn TimeSource>>,
    video_clock: Mutex<ClockAdapter>,
    audio_clock: Mutex<ClockAdapter>,

    info: Mutex<Option<SenderInfo>>,
    local_stats: Mutex<ChannelStatistics>,

    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Sender {
    /// Bind the listener and start accepting connections. With no
    /// configured port the dynamic range 6400-6600 is scanned.
    pub async fn bind(config: SenderConfig, factory: Arc<dyn CodecFactory>) -> Result<Sender> {
        let (cert, key) = match &config.certificate {
            Some((cert, key)) => (
                rustls::Certificate(cert.clone()),
                rustls::PrivateKey(key.clone()),
            ),
            None => tls::generate_self_signed()?,
        };
        let server_config = tls::server_config(cert, key)?;
        let (endpoint, local_addr) = bind_endpoint(server_config, &config)?;
        info!("Sender listening on {}", local_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let channels: Arc<Mutex<Vec<Arc<QuicChannel>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_task = tokio::spawn(accept_loop(
            endpoint.clone(),
            Arc::clone(&channels),
            config.metadata_pool,
            config.info.clone(),
            events_tx,
            cancel.clone(),
        ));

        Ok(Sender {
            endpoint,
            local_addr,
            channels,
            video_pool: FramePool::new(
                config.video_pool.frames,
                config.video_pool.initial_size,
                config.video_pool.growable,
            ),
            audio_pool: FramePool::new(
                config.audio_pool.frames,
                config.audio_pool.initial_size,
                config.audio_pool.growable,
            ),
            metadata_pool: FramePool::new(
                config.metadata_pool.frames,
                config.metadata_pool.initial_size,
                config.metadata_pool.growable,
            ),
            factory,
            video_encoder: Mutex::new(None),
            audio_encoder: Mutex::new(None),
            time_source: RwLock::new(Arc::new(LocalTimeSource::new()) as Arc<dyn TimeSource>),
            video_clock: Mutex::new(ClockAdapter::new(0)),
            audio_clock: Mutex::new(ClockAdapter::new(0)),
            info: Mutex::new(config.info),
            local_stats: Mutex::new(ChannelStatistics::default()),
            events_rx: tokio::sync::Mutex::new(events_rx),
            cancel,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Swap the time source that stamps outbound frames (e.g. for a
    /// PTP-disciplined source).
    pub fn set_time_source(&self, source: Arc<dyn TimeSource>) {
        *self.time_source.write().unwrap_or_else(|e| e.into_inner()) = source;
    }

    /// Encode (or pass through) a video frame and fan it out. Returns the
    /// number of channels the frame was written to.
    pub async fn send_video(&self, video: OutboundVideo<'_>) -> Result<usize> {
        let timestamp = {
            let source = Arc::clone(&self.time_source.read().unwrap_or_else(|e| e.into_inner()));
            let mut clock = lock(&self.video_clock);
            clock.set_interval(video.header.frame_rate.interval_100ns());
            clock.stamp(&*source)
        };

        let frame = if video.compressed || video.header.codec == Codec::Raw {
            self.build_video_frame(&video.header, timestamp, video.data, video.frame_metadata)
        } else {
            self.encode_video_frame(&video, timestamp)
        };
        let mut frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                lock(&self.local_stats).record_dropped();
                debug!("Dropped outbound video frame: {}", e);
                return Err(e);
            }
        };

        Ok(self.fan_out(&mut frame).await)
    }

    /// Encode (or pass through) an audio chunk and fan it out.
    pub async fn send_audio(&self, audio: OutboundAudio<'_>) -> Result<usize> {
        let timestamp = {
            let source = Arc::clone(&self.time_source.read().unwrap_or_else(|e| e.into_inner()));
            let mut clock = lock(&self.audio_clock);
            if audio.header.sample_rate > 0 {
                clock.set_interval(
                    audio.header.samples_per_channel as i64 * 10_000_000
                        / audio.header.sample_rate as i64,
                );
            }
            clock.stamp(&*source)
        };

        let frame = if audio.compressed || audio.header.codec == Codec::Raw
            || audio.header.codec == Codec::PlanarFloat
        {
            Frame::build_audio(
                &self.audio_pool,
                &audio.header,
                timestamp,
                audio.data,
                audio.frame_metadata,
            )
            .map_err(TransportError::from)
        } else {
            self.encode_audio_frame(&audio, timestamp)
        };
        let mut frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                lock(&self.local_stats).record_dropped();
                debug!("Dropped outbound audio frame: {}", e);
                return Err(e);
            }
        };

        Ok(self.fan_out(&mut frame).await)
    }

    /// Fan a metadata payload (XML document or typed item stream) out to
    /// every channel. Metadata bypasses subscription masks.
    pub async fn send_metadata(&self, payload: &[u8]) -> Result<usize> {
        let timestamp = self
            .time_source
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .now_100ns();
        let mut frame = Frame::build_metadata(&self.metadata_pool, timestamp, payload)?;
        Ok(self.fan_out(&mut frame).await)
    }

    fn build_video_frame(
        &self,
        header: &VideoHeader,
        timestamp: i64,
        payload: &[u8],
        frame_metadata: &[u8],
    ) -> Result<Frame> {
        Frame::build_video(&self.video_pool, header, timestamp, payload, frame_metadata)
            .map_err(TransportError::from)
    }

    fn encode_video_frame(&self, video: &OutboundVideo<'_>, timestamp: i64) -> Result<Frame> {
        let quality = self.suggested_quality();
        let params = VideoParams::from(&video.header);
        let mut slot = lock(&self.video_encoder);

        let rebuild = match slot.as_ref() {
            Some(slot) => slot.params != params,
            None => true,
        };
        if rebuild {
            debug!(
                "Creating {:?} video encoder {}x{} @{}/{}",
                params.codec,
                params.width,
                params.height,
                params.frame_rate.num,
                params.frame_rate.den
            );
            *slot = Some(VideoEncoderSlot {
                params,
                quality,
                encoder: self.factory.video_encoder(&video.header, quality)?,
                scratch: BytesMut::new(),
            });
        }

        let slot = slot.as_mut().expect("encoder slot just filled");
        if slot.quality != quality {
            slot.encoder.set_quality(quality);
            slot.quality = quality;
        }

        slot.scratch.clear();
        let interlaced = video.header.flags.contains(VideoFlags::INTERLACED);
        slot.encoder
            .encode(
                &video.header,
                video.data,
                video.stride,
                &mut slot.scratch,
                interlaced,
            )
            .map_err(|e| TransportError::Codec(e.to_string()))?;

        self.build_video_frame(&video.header, timestamp, &slot.scratch, video.frame_metadata)
    }

    fn encode_audio_frame(&self, audio: &OutboundAudio<'_>, timestamp: i64) -> Result<Frame> {
        let params = AudioParams::from(&audio.header);
        let mut slot = lock(&self.audio_encoder);

        let rebuild = match slot.as_ref() {
            Some(slot) => slot.params != params,
            None => true,
        };
        if rebuild {
            debug!(
                "Creating {:?} audio encoder {} Hz x{}",
                params.codec, params.sample_rate, params.channels
            );
            *slot = Some(AudioEncoderSlot {
                params,
                encoder: self.factory.audio_encoder(&audio.header)?,
                scratch: BytesMut::new(),
            });
        }

        let slot = slot.as_mut().expect("encoder slot just filled");
        slot.scratch.clear();
        slot.encoder
            .encode(&audio.header, audio.data, &mut slot.scratch)
            .map_err(|e| TransportError::Codec(e.to_string()))?;

        Frame::build_audio(
            &self.audio_pool,
            &audio.header,
            timestamp,
            &slot.scratch,
            audio.frame_metadata,
        )
        .map_err(TransportError::from)
    }

    async fn fan_out(&self, frame: &mut Frame) -> usize {
        let channels: Vec<_> = lock(&self.channels).iter().cloned().collect();
        let mut delivered = 0;
        for channel in &channels {
            if channel.is_closed() {
                continue;
            }
            match channel.send(frame).await {
                Ok(0) => {}
                Ok(_) => delivered += 1,
                Err(e) => debug!("Channel write failed, will prune: {}", e),
            }
        }
        lock(&self.channels).retain(|c| !c.is_closed());
        delivered
    }

    /// Highest quality hint received across all connected channels.
    pub fn suggested_quality(&self) -> Quality {
        lock(&self.channels)
            .iter()
            .map(|c| c.suggested_quality())
            .max()
            .unwrap_or(Quality::Default)
    }

    /// Combined tally: a source is on preview/program when any channel
    /// says so.
    pub fn tally(&self) -> omt_core::Tally {
        let mut combined = omt_core::Tally::NONE;
        for channel in lock(&self.channels).iter() {
            let tally = channel.tally();
            combined.preview |= tally.preview;
            combined.program |= tally.program;
        }
        combined
    }

    /// Advertise (and remember, for late joiners) this source's identity.
    pub async fn set_sender_info(&self, info: SenderInfo) {
        *lock(&self.info) = Some(info.clone());
        let doc = ControlDocument::SenderInfo(info);
        let channels: Vec<_> = lock(&self.channels).iter().cloned().collect();
        for channel in channels {
            if let Err(e) = channel.send_control(&doc).await {
                debug!("Failed to advertise sender info: {}", e);
            }
        }
    }

    /// Tell every connected receiver to reconnect elsewhere.
    pub async fn redirect_receivers(&self, address: &str) {
        let doc = ControlDocument::Redirect(address.to_string());
        let channels: Vec<_> = lock(&self.channels).iter().cloned().collect();
        for channel in channels {
            if let Err(e) = channel.send_control(&doc).await {
                debug!("Failed to send redirect: {}", e);
            }
        }
    }

    /// Number of live channels.
    pub fn connection_count(&self) -> usize {
        lock(&self.channels).iter().filter(|c| !c.is_closed()).count()
    }

    /// Aggregate statistics across all channels plus local encode-side
    /// drops. Reading resets the since-last deltas everywhere.
    pub fn statistics(&self) -> ChannelStatistics {
        let mut total = lock(&self.local_stats).snapshot();
        for channel in lock(&self.channels).iter() {
            total.merge(&channel.statistics());
        }
        total
    }

    /// Next channel event, if the sender is still running.
    pub async fn next_event(&self) -> Option<ChannelEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// Stop accepting, close every channel and tear the endpoint down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for channel in lock(&self.channels).drain(..) {
            channel.close();
        }
        self.endpoint
            .close(CONNECTION_CLOSE_CODE.into(), b"shutdown");
        if let Some(task) = lock(&self.accept_task).take() {
            let _ = task.await;
        }
        self.endpoint.wait_idle().await;
        self.video_pool.dispose();
        self.audio_pool.dispose();
        self.metadata_pool.dispose();
    }
}

fn bind_endpoint(
    server_config: quinn::ServerConfig,
    config: &SenderConfig,
) -> Result<(quinn::Endpoint, SocketAddr)> {
    match config.port {
        Some(port) => {
            let addr = SocketAddr::new(config.bind_addr, port);
            let endpoint = quinn::Endpoint::server(server_config, addr)?;
            let local = endpoint.local_addr()?;
            Ok((endpoint, local))
        }
        None => {
            for port in DEFAULT_PORT..=PORT_RANGE_END {
                let addr = SocketAddr::new(config.bind_addr, port);
                match quinn::Endpoint::server(server_config.clone(), addr) {
                    Ok(endpoint) => {
                        let local = endpoint.local_addr()?;
                        return Ok((endpoint, local));
                    }
                    Err(e) => debug!("Port {} unavailable: {}", port, e),
                }
            }
            Err(TransportError::PortRangeExhausted {
                start: DEFAULT_PORT,
                end: PORT_RANGE_END,
            })
        }
    }
}

async fn accept_loop(
    endpoint: quinn::Endpoint,
    channels: Arc<Mutex<Vec<Arc<QuicChannel>>>>,
    channel_pool: PoolConfig,
    info: Option<SenderInfo>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
) {
    loop {
        let connecting = tokio::select! {
            _ = cancel.cancelled() => break,
            connecting = endpoint.accept() => match connecting {
                Some(connecting) => connecting,
                None => break,
            },
        };

        let channels = Arc::clone(&channels);
        let events = events.clone();
        let cancel = cancel.clone();
        let info = info.clone();
        tokio::spawn(async move {
            let connection = match connecting.await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Handshake failed: {}", e);
                    return;
                }
            };
            info!("Accepted connection from {}", connection.remote_address());
            serve_connection(connection, channels, channel_pool, info, events, cancel).await;
        });
    }
    debug!("Accept loop exiting");
}

/// Accept one bidirectional stream after another on a connection, wiring
/// each up as a channel.
async fn serve_connection(
    connection: quinn::Connection,
    channels: Arc<Mutex<Vec<Arc<QuicChannel>>>>,
    channel_pool: PoolConfig,
    info: Option<SenderInfo>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
) {
    loop {
        let (send, recv) = tokio::select! {
            _ = cancel.cancelled() => {
                connection.close(CONNECTION_CLOSE_CODE.into(), b"shutdown");
                break;
            }
            stream = connection.accept_bi() => match stream {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("Connection from {} ended: {}", connection.remote_address(), e);
                    break;
                }
            },
        };

        let pool = FramePool::new(
            channel_pool.frames,
            channel_pool.initial_size,
            channel_pool.growable,
        );
        let channel = Channel::new(send, pool, events.clone(), cancel.child_token());
        tokio::spawn(Arc::clone(&channel).run_receive_loop(recv));

        // Late joiners learn the source identity right away
        if let Some(info) = &info {
            if let Err(e) = channel
                .send_control(&ControlDocument::SenderInfo(info.clone()))
                .await
            {
                debug!("Failed to advertise sender info on new channel: {}", e);
            }
        }

        lock(&channels).push(channel);
    }
}
