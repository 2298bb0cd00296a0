//! Endpoint configuration.

use std::net::IpAddr;

use omt_core::{Quality, SenderInfo};

/// Frame-pool sizing for one kind.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of buffers
    pub frames: usize,
    /// Initial buffer size in bytes
    pub initial_size: usize,
    /// Whether buffers may grow up to the kind cap
    pub growable: bool,
}

impl PoolConfig {
    /// Default sizing for video buffers.
    pub fn video() -> Self {
        Self {
            frames: 8,
            initial_size: 512 * 1024,
            growable: true,
        }
    }

    /// Default sizing for audio buffers.
    pub fn audio() -> Self {
        Self {
            frames: 16,
            initial_size: 32 * 1024,
            growable: true,
        }
    }

    /// Default sizing for metadata buffers.
    pub fn metadata() -> Self {
        Self {
            frames: 16,
            initial_size: 4 * 1024,
            growable: true,
        }
    }
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Address to bind the QUIC listener on
    pub bind_addr: IpAddr,
    /// Listen port; `None` scans the dynamic range 6400-6600
    pub port: Option<u16>,
    /// Identity advertised to every accepted channel
    pub info: Option<SenderInfo>,
    /// DER certificate and private key; a self-signed pair is generated
    /// when absent
    pub certificate: Option<(Vec<u8>, Vec<u8>)>,
    /// Outbound video buffer pool
    pub video_pool: PoolConfig,
    /// Outbound audio buffer pool
    pub audio_pool: PoolConfig,
    /// Outbound metadata buffer pool, also backing per-channel receive
    /// buffers (a sender only ever receives control traffic)
    pub metadata_pool: PoolConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: None,
            info: None,
            certificate: None,
            video_pool: PoolConfig::video(),
            audio_pool: PoolConfig::audio(),
            metadata_pool: PoolConfig::metadata(),
        }
    }
}

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// TLS server name presented on connect (certificate checking is
    /// disabled, but QUIC requires one)
    pub server_name: String,
    /// Ask the sender for preview-fidelity video
    pub preview: bool,
    /// Quality hint advertised on connect
    pub quality: Option<Quality>,
    /// Inbound video buffer pool (video + metadata stream)
    pub video_pool: PoolConfig,
    /// Inbound audio buffer pool
    pub audio_pool: PoolConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            preview: false,
            quality: None,
            video_pool: PoolConfig::video(),
            audio_pool: PoolConfig::audio(),
        }
    }
}
