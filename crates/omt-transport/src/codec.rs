//! Codec interfaces consumed by the sender and receiver.
//!
//! Real encoders (VMX1, SVT-AV1, Opus, ...) live outside this crate
//! behind these traits; they take borrowed input and write owned output so
//! unsafe FFI stays localized in the implementing crate. The passthrough
//! factory ships here for pre-compressed and raw flows and doubles as the
//! test codec.

use bytes::BytesMut;

use omt_core::{AudioHeader, Codec, Quality, VideoHeader};

use crate::error::{Result, TransportError};

/// Video encoder instance, created per `(codec, width, height, fps,
/// colorspace)` and re-created when any of those change.
pub trait VideoEncoder: Send {
    /// Codec this encoder produces
    fn codec(&self) -> Codec;

    /// Apply a new quality profile without recreating the encoder
    fn set_quality(&mut self, quality: Quality);

    /// Encode one raw frame into `dst`, returning the bytes written.
    /// `src_stride` is the source row pitch in bytes.
    fn encode(
        &mut self,
        header: &VideoHeader,
        src: &[u8],
        src_stride: usize,
        dst: &mut BytesMut,
        interlaced: bool,
    ) -> Result<usize>;

    /// Length of the preview-sized encode of the last frame, when the
    /// codec embeds a separately decodable preview image.
    fn encoded_preview_len(&self) -> Option<usize> {
        None
    }
}

/// Video decoder instance, cached per `(codec, width, height)`.
pub trait VideoDecoder: Send {
    /// Decode one frame into `dst` with the given row pitch. Returns
    /// false when the frame could not be decoded (caller drops it).
    fn decode(
        &mut self,
        header: &VideoHeader,
        src: &[u8],
        dst: &mut BytesMut,
        dst_stride: usize,
    ) -> Result<bool>;
}

/// Audio encoder over planar-float input.
pub trait AudioEncoder: Send {
    /// Codec this encoder produces
    fn codec(&self) -> Codec;

    /// Encode one chunk of planar samples into `dst`, returning the bytes
    /// written.
    fn encode(&mut self, header: &AudioHeader, samples: &[u8], dst: &mut BytesMut)
        -> Result<usize>;
}

/// Audio decoder back to planar-float output.
pub trait AudioDecoder: Send {
    /// Decode one chunk into `dst`. Returns false when the chunk could
    /// not be decoded.
    fn decode(&mut self, header: &AudioHeader, src: &[u8], dst: &mut BytesMut) -> Result<bool>;
}

/// Creates codec instances on demand. Implemented externally for real
/// codecs; [`PassthroughFactory`] covers raw and pre-compressed flows.
pub trait CodecFactory: Send + Sync {
    fn video_encoder(&self, header: &VideoHeader, quality: Quality) -> Result<Box<dyn VideoEncoder>>;
    fn video_decoder(&self, header: &VideoHeader) -> Result<Box<dyn VideoDecoder>>;
    fn audio_encoder(&self, header: &AudioHeader) -> Result<Box<dyn AudioEncoder>>;
    fn audio_decoder(&self, header: &AudioHeader) -> Result<Box<dyn AudioDecoder>>;
}

/// Factory whose codecs copy bytes through unchanged. Suitable when the
/// producer already delivers compressed bitstreams (VMX1/AV1/Opus
/// passthrough) or when raw media should travel uncompressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

struct PassthroughVideo {
    codec: Codec,
}

impl VideoEncoder for PassthroughVideo {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn set_quality(&mut self, _quality: Quality) {}

    fn encode(
        &mut self,
        _header: &VideoHeader,
        src: &[u8],
        _src_stride: usize,
        dst: &mut BytesMut,
        _interlaced: bool,
    ) -> Result<usize> {
        dst.extend_from_slice(src);
        Ok(src.len())
    }
}

impl VideoDecoder for PassthroughVideo {
    fn decode(
        &mut self,
        _header: &VideoHeader,
        src: &[u8],
        dst: &mut BytesMut,
        _dst_stride: usize,
    ) -> Result<bool> {
        dst.clear();
        dst.extend_from_slice(src);
        Ok(true)
    }
}

struct PassthroughAudio {
    codec: Codec,
}

impl AudioEncoder for PassthroughAudio {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn encode(
        &mut self,
        _header: &AudioHeader,
        samples: &[u8],
        dst: &mut BytesMut,
    ) -> Result<usize> {
        dst.extend_from_slice(samples);
        Ok(samples.len())
    }
}

impl AudioDecoder for PassthroughAudio {
    fn decode(&mut self, _header: &AudioHeader, src: &[u8], dst: &mut BytesMut) -> Result<bool> {
        dst.clear();
        dst.extend_from_slice(src);
        Ok(true)
    }
}

impl CodecFactory for PassthroughFactory {
    fn video_encoder(
        &self,
        header: &VideoHeader,
        _quality: Quality,
    ) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(PassthroughVideo { codec: header.codec }))
    }

    fn video_decoder(&self, header: &VideoHeader) -> Result<Box<dyn VideoDecoder>> {
        match header.codec {
            Codec::Raw | Codec::Vmx1 | Codec::Av1 => {
                Ok(Box::new(PassthroughVideo { codec: header.codec }))
            }
            other => Err(TransportError::Codec(format!(
                "no passthrough video decoder for {other:?}"
            ))),
        }
    }

    fn audio_encoder(&self, header: &AudioHeader) -> Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(PassthroughAudio { codec: header.codec }))
    }

    fn audio_decoder(&self, header: &AudioHeader) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(PassthroughAudio { codec: header.codec }))
    }
}
