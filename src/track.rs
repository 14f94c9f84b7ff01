//! Track descriptors and media packets
//!
//! A live stream carries at most one video and one audio track. Track
//! descriptors are declared once by the stream's publisher and are read-only
//! afterwards; packets flow separately, one sequence per track, with
//! non-decreasing millisecond timestamps.

use bytes::Bytes;

/// FLV video codec identifier (lower 4 bits of the first video data byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Sorenson H.263
    SorensonH263 = 2,
    /// Screen video
    ScreenVideo = 3,
    /// VP6
    Vp6 = 4,
    /// VP6 with alpha
    Vp6Alpha = 5,
    /// Screen video v2
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265) - enhanced RTMP extension
    Hevc = 12,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            _ => None,
        }
    }

    /// FLV codec id as carried in `onMetaData`
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Whether this codec sends a one-time decoder configuration record
    /// before the first data frame
    pub fn has_sequence_header(&self) -> bool {
        matches!(self, VideoCodec::Avc | VideoCodec::Hevc)
    }
}

/// FLV audio codec identifier (upper 4 bits of the first audio data byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// Linear PCM, platform endian
    LinearPcm = 0,
    /// ADPCM
    Adpcm = 1,
    /// MP3
    Mp3 = 2,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    /// AAC
    Aac = 10,
    /// Speex
    Speex = 11,
}

impl AudioCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioCodec::LinearPcm),
            1 => Some(AudioCodec::Adpcm),
            2 => Some(AudioCodec::Mp3),
            7 => Some(AudioCodec::G711ALaw),
            8 => Some(AudioCodec::G711MuLaw),
            10 => Some(AudioCodec::Aac),
            11 => Some(AudioCodec::Speex),
            _ => None,
        }
    }

    /// FLV codec id as carried in `onMetaData`
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Whether this codec sends a one-time configuration payload (an AAC
    /// AudioSpecificConfig) before the first data frame
    pub fn has_sequence_header(&self) -> bool {
        matches!(self, AudioCodec::Aac)
    }
}

/// Video track descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// One-time decoder configuration, written as a timestamp-0 video tag
    /// before any data tag. Empty for codecs without one.
    pub extradata: Bytes,
}

/// Audio track descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    /// Sample size in bits (8 or 16)
    pub sample_size: u32,
    pub channels: u8,
    /// One-time decoder configuration, present only for codecs that carry
    /// one (AAC).
    pub extradata: Option<Bytes>,
}

impl AudioTrack {
    pub fn is_stereo(&self) -> bool {
        self.channels == 2
    }
}

/// One timestamped media payload, cheap to clone via `Bytes`
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Track-relative timestamp in milliseconds, non-decreasing per track
    pub timestamp: u32,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn new(timestamp: u32, payload: Bytes) -> Self {
        Self { timestamp, payload }
    }
}
