//! Receiving endpoint: connect, subscribe, decode, surface.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use omt_core::{
    AudioHeader, ChannelStatistics, Codec, ControlDocument, Frame, FrameKind, FramePool, Quality,
    SenderInfo, Tally, VideoHeader,
};

use crate::channel::Channel;
use crate::codec::{AudioDecoder, CodecFactory, VideoDecoder};
use crate::config::ReceiverConfig;
use crate::error::Result;
use crate::events::ChannelEvent;
use crate::tls;
use crate::CONNECTION_CLOSE_CODE;

/// A decoded frame surfaced to the consumer.
#[derive(Debug)]
pub enum MediaFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
    Metadata(MetadataFrame),
}

/// Decoded video frame.
#[derive(Debug)]
pub struct VideoFrame {
    /// Format description from the extended header
    pub header: VideoHeader,
    /// Timestamp in 100 ns units
    pub timestamp: i64,
    /// Decoded pixel data
    pub data: Bytes,
    /// Per-frame metadata trailer recorded by the sender
    pub frame_metadata: Bytes,
}

/// Decoded audio chunk.
#[derive(Debug)]
pub struct AudioFrame {
    /// Format description from the extended header
    pub header: AudioHeader,
    /// Timestamp in 100 ns units
    pub timestamp: i64,
    /// Decoded planar samples
    pub data: Bytes,
    /// Per-frame metadata trailer recorded by the sender
    pub frame_metadata: Bytes,
}

/// Consumer-visible metadata frame (XML document or typed item stream).
#[derive(Debug)]
pub struct MetadataFrame {
    /// Timestamp in 100 ns units
    pub timestamp: i64,
    /// Raw payload
    pub data: Bytes,
}

/// Decoder instances cached per format, re-created when the format
/// changes mid-stream.
struct DecoderCache {
    factory: Arc<dyn CodecFactory>,
    video: Option<(VideoKey, Box<dyn VideoDecoder>)>,
    audio: Option<(AudioKey, Box<dyn AudioDecoder>)>,
    scratch: BytesMut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VideoKey {
    codec: Codec,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioKey {
    codec: Codec,
    sample_rate: u32,
    channels: u32,
}

impl DecoderCache {
    fn new(factory: Arc<dyn CodecFactory>) -> Self {
        Self {
            factory,
            video: None,
            audio: None,
            scratch: BytesMut::new(),
        }
    }

    /// Decode a video frame; `None` means the frame must be dropped.
    fn decode_video(&mut self, frame: &Frame) -> Result<Option<VideoFrame>> {
        let header = *frame.video().ok_or_else(|| {
            omt_core::Error::InvalidParameter("video frame without extended header".into())
        })?;

        let data = if header.codec == Codec::Raw {
            Bytes::copy_from_slice(frame.media())
        } else {
            let key = VideoKey {
                codec: header.codec,
                width: header.width,
                height: header.height,
            };
            if self.video.as_ref().map(|(k, _)| *k) != Some(key) {
                debug!(
                    "Creating {:?} video decoder {}x{}",
                    key.codec, key.width, key.height
                );
                self.video = Some((key, self.factory.video_decoder(&header)?));
            }
            let DecoderCache { video, scratch, .. } = self;
            let (_, decoder) = video.as_mut().expect("decoder just cached");

            scratch.clear();
            // Stride 0 requests the codec's native tight packing; format
            // conversion for the caller happens outside the core.
            if !decoder.decode(&header, frame.media(), scratch, 0)? {
                return Ok(None);
            }
            Bytes::copy_from_slice(scratch)
        };

        Ok(Some(VideoFrame {
            header,
            timestamp: frame.timestamp(),
            data,
            frame_metadata: Bytes::copy_from_slice(frame.frame_metadata()),
        }))
    }

    /// Decode an audio frame; `None` means the frame must be dropped.
    fn decode_audio(&mut self, frame: &Frame) -> Result<Option<AudioFrame>> {
        let header = *frame.audio().ok_or_else(|| {
            omt_core::Error::InvalidParameter("audio frame without extended header".into())
        })?;

        let data = if header.codec == Codec::Raw || header.codec == Codec::PlanarFloat {
            Bytes::copy_from_slice(frame.media())
        } else {
            let key = AudioKey {
                codec: header.codec,
                sample_rate: header.sample_rate,
                channels: header.channels,
            };
            if self.audio.as_ref().map(|(k, _)| *k) != Some(key) {
                debug!(
                    "Creating {:?} audio decoder {} Hz x{}",
                    key.codec, key.sample_rate, key.channels
                );
                self.audio = Some((key, self.factory.audio_decoder(&header)?));
            }
            let DecoderCache { audio, scratch, .. } = self;
            let (_, decoder) = audio.as_mut().expect("decoder just cached");

            scratch.clear();
            if !decoder.decode(&header, frame.media(), scratch)? {
                return Ok(None);
            }
            Bytes::copy_from_slice(scratch)
        };

        Ok(Some(AudioFrame {
            header,
            timestamp: frame.timestamp(),
            data,
            frame_metadata: Bytes::copy_from_slice(frame.frame_metadata()),
        }))
    }
}

type QuicChannel = Channel<quinn::SendStream>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A connected consumer of one remote source. Opens one stream for video
/// and metadata and a second for audio, subscribes, and decodes inbound
/// frames on demand.
pub struct Receiver {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
    video_channel: Arc<QuicChannel>,
    audio_channel: Arc<QuicChannel>,
    decoders: Mutex<DecoderCache>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
    cancel: CancellationToken,
}

impl Receiver {
    /// Connect to a sender and subscribe.
    pub async fn connect(
        addr: SocketAddr,
        config: ReceiverConfig,
        factory: Arc<dyn CodecFactory>,
    ) -> Result<Receiver> {
        let mut endpoint =
            quinn::Endpoint::client(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))?;
        endpoint.set_default_client_config(tls::client_config());

        let connection = endpoint.connect(addr, &config.server_name)?.await?;
        info!("Connected to sender at {}", addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        // First stream carries video and metadata
        let (send, recv) = connection.open_bi().await?;
        let video_pool = FramePool::new(
            config.video_pool.frames,
            config.video_pool.initial_size,
            config.video_pool.growable,
        );
        let video_channel = Channel::new(send, video_pool, events_tx.clone(), cancel.child_token());
        tokio::spawn(Arc::clone(&video_channel).run_receive_loop(recv));

        video_channel
            .send_control(&ControlDocument::SubscribeVideo)
            .await?;
        video_channel
            .send_control(&ControlDocument::SubscribeMetadata)
            .await?;
        if config.preview {
            video_channel
                .send_control(&ControlDocument::PreviewVideo(true))
                .await?;
        }
        if let Some(quality) = config.quality {
            video_channel
                .send_control(&ControlDocument::SuggestedQuality(quality))
                .await?;
        }

        // Second stream carries audio
        let (send, recv) = connection.open_bi().await?;
        let audio_pool = FramePool::new(
            config.audio_pool.frames,
            config.audio_pool.initial_size,
            config.audio_pool.growable,
        );
        let audio_channel = Channel::new(send, audio_pool, events_tx, cancel.child_token());
        tokio::spawn(Arc::clone(&audio_channel).run_receive_loop(recv));
        audio_channel
            .send_control(&ControlDocument::SubscribeAudio)
            .await?;

        Ok(Receiver {
            endpoint,
            connection,
            video_channel,
            audio_channel,
            decoders: Mutex::new(DecoderCache::new(factory)),
            events_rx: tokio::sync::Mutex::new(events_rx),
            cancel,
        })
    }

    /// Wait up to `timeout` for the next frame, polling the ready queues
    /// in priority order: video, audio, metadata. Returns `None` on
    /// timeout. Undecodable frames are dropped and counted, and the wait
    /// continues.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<MediaFrame>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(frame) = self.video_channel.try_next_frame() {
                match self.decode(&frame)? {
                    Some(media) => return Ok(Some(media)),
                    None => {
                        self.video_channel.record_drop();
                        continue;
                    }
                }
            }
            if let Some(frame) = self.audio_channel.try_next_frame() {
                match self.decode(&frame)? {
                    Some(media) => return Ok(Some(media)),
                    None => {
                        self.audio_channel.record_drop();
                        continue;
                    }
                }
            }
            if let Some(frame) = self
                .video_channel
                .try_next_metadata()
                .or_else(|| self.audio_channel.try_next_metadata())
            {
                return Ok(Some(MediaFrame::Metadata(MetadataFrame {
                    timestamp: frame.timestamp(),
                    data: Bytes::copy_from_slice(frame.payload()),
                })));
            }

            tokio::select! {
                _ = self.video_channel.frame_ready().notified() => {}
                _ = self.audio_channel.frame_ready().notified() => {}
                _ = self.video_channel.metadata_ready().notified() => {}
                _ = self.audio_channel.metadata_ready().notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                _ = self.cancel.cancelled() => return Ok(None),
            }
        }
    }

    fn decode(&self, frame: &Frame) -> Result<Option<MediaFrame>> {
        let mut decoders = lock(&self.decoders);
        match frame.kind() {
            FrameKind::Video => Ok(decoders.decode_video(frame)?.map(MediaFrame::Video)),
            FrameKind::Audio => Ok(decoders.decode_audio(frame)?.map(MediaFrame::Audio)),
            FrameKind::Metadata => Ok(Some(MediaFrame::Metadata(MetadataFrame {
                timestamp: frame.timestamp(),
                data: Bytes::copy_from_slice(frame.payload()),
            }))),
        }
    }

    /// Set this source's tally state at the sender.
    pub async fn set_tally(&self, tally: Tally) -> Result<()> {
        self.video_channel
            .send_control(&ControlDocument::Tally(tally))
            .await?;
        Ok(())
    }

    /// Advertise an encoder quality hint to the sender.
    pub async fn set_suggested_quality(&self, quality: Quality) -> Result<()> {
        self.video_channel
            .send_control(&ControlDocument::SuggestedQuality(quality))
            .await?;
        Ok(())
    }

    /// Toggle preview-fidelity video.
    pub async fn set_preview(&self, on: bool) -> Result<()> {
        self.video_channel
            .send_control(&ControlDocument::PreviewVideo(on))
            .await?;
        Ok(())
    }

    /// Send an application metadata payload upstream to the sender.
    pub async fn send_metadata(&self, payload: &[u8]) -> Result<usize> {
        self.video_channel.send_metadata(payload).await
    }

    /// Identity advertised by the sender, once received.
    pub fn sender_info(&self) -> Option<SenderInfo> {
        self.video_channel.sender_info()
    }

    /// Redirect address set by the sender, if any.
    pub fn redirect(&self) -> Option<String> {
        self.video_channel.redirect()
    }

    /// Aggregate statistics across both streams. Reading resets the
    /// since-last deltas.
    pub fn statistics(&self) -> ChannelStatistics {
        let mut total = self.video_channel.statistics();
        total.merge(&self.audio_channel.statistics());
        total
    }

    /// Next channel event, if the receiver is still running.
    pub async fn next_event(&self) -> Option<ChannelEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// Close both streams and the connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.video_channel.close();
        self.audio_channel.close();
        self.connection
            .close(CONNECTION_CLOSE_CODE.into(), b"shutdown");
        self.endpoint.wait_idle().await;
    }
}
