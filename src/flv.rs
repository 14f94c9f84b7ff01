//! FLV container framing
//!
//! FLV multiplexes timestamped audio/video/script tags into one byte
//! stream: a fixed 9-byte file header plus an initial zero previous-tag
//! size, then a sequence of tags. Each tag is an 11-byte header (type,
//! 3-byte payload size, 3-byte timestamp plus one extended-timestamp byte,
//! 3-byte stream id of zero), the payload, and a 4-byte big-endian
//! previous-tag-size trailer covering the header and payload.
//!
//! The writer side feeds the muxer; the incremental [`TagReader`] feeds the
//! relay puller, which consumes an upstream HTTP-FLV response in arbitrary
//! chunk sizes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FlvError;
use crate::track::{AudioCodec, VideoCodec};

/// FLV file header: signature, version 1, audio+video flags, data offset 9,
/// followed by PreviousTagSize0.
pub const FLV_HEADER: [u8; 13] = [
    b'F', b'L', b'V', 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
];

/// Size of the per-tag header preceding the payload
pub const TAG_HEADER_SIZE: usize = 11;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Audio = 8,
    Video = 9,
    Script = 18,
}

impl TagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            8 => Some(TagType::Audio),
            9 => Some(TagType::Video),
            18 => Some(TagType::Script),
            _ => None,
        }
    }
}

/// One parsed FLV tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: TagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    pub data: Bytes,
}

impl FlvTag {
    /// For video tags, the codec carried in the first payload byte
    pub fn video_codec(&self) -> Option<VideoCodec> {
        if self.tag_type == TagType::Video && !self.data.is_empty() {
            VideoCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// For audio tags, the codec carried in the first payload byte
    pub fn audio_codec(&self) -> Option<AudioCodec> {
        if self.tag_type == TagType::Audio && !self.data.is_empty() {
            AudioCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// Whether this is a video decoder configuration record (AVC/HEVC
    /// packet type 0)
    pub fn is_video_sequence_header(&self) -> bool {
        match self.video_codec() {
            Some(codec) if codec.has_sequence_header() => self.data.len() >= 2 && self.data[1] == 0,
            _ => false,
        }
    }

    /// Whether this is an AAC AudioSpecificConfig (packet type 0)
    pub fn is_audio_sequence_header(&self) -> bool {
        match self.audio_codec() {
            Some(codec) if codec.has_sequence_header() => self.data.len() >= 2 && self.data[1] == 0,
            _ => false,
        }
    }
}

/// Append one framed tag to `buf`
pub fn write_tag(buf: &mut BytesMut, tag_type: TagType, timestamp: u32, payload: &[u8]) {
    buf.reserve(TAG_HEADER_SIZE + payload.len() + 4);
    buf.put_u8(tag_type as u8);
    put_u24(buf, payload.len() as u32);
    put_u24(buf, timestamp & 0x00FF_FFFF);
    buf.put_u8((timestamp >> 24) as u8);
    put_u24(buf, 0); // stream id
    buf.put_slice(payload);
    buf.put_u32(TAG_HEADER_SIZE as u32 + payload.len() as u32);
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

fn get_u24(buf: &mut BytesMut) -> u32 {
    let hi = buf.get_u8() as u32;
    let mid = buf.get_u8() as u32;
    let lo = buf.get_u8() as u32;
    (hi << 16) | (mid << 8) | lo
}

/// Track presence flags from the FLV file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFlags {
    pub has_audio: bool,
    pub has_video: bool,
}

/// Incremental FLV tag reader.
///
/// Feed bytes into an external `BytesMut` and call [`TagReader::next`]
/// until it returns `Ok(None)`, meaning more input is needed. The reader
/// never consumes a partial tag.
#[derive(Debug, Default)]
pub struct TagReader {
    flags: Option<HeaderFlags>,
}

impl TagReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header flags, available once the 13-byte file header has been read
    pub fn header_flags(&self) -> Option<HeaderFlags> {
        self.flags
    }

    /// Try to decode the next tag from `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete tag.
    pub fn next(&mut self, buf: &mut BytesMut) -> Result<Option<FlvTag>, FlvError> {
        if self.flags.is_none() {
            if buf.len() < FLV_HEADER.len() {
                return Ok(None);
            }
            if &buf[0..3] != b"FLV" {
                return Err(FlvError::InvalidSignature);
            }
            if buf[3] != 1 {
                return Err(FlvError::UnsupportedVersion(buf[3]));
            }
            let type_flags = buf[4];
            self.flags = Some(HeaderFlags {
                has_audio: type_flags & 0x04 != 0,
                has_video: type_flags & 0x01 != 0,
            });
            // Data offset is 9 for version 1; skip it plus PreviousTagSize0.
            buf.advance(FLV_HEADER.len());
        }

        if buf.len() < TAG_HEADER_SIZE {
            return Ok(None);
        }
        let data_size =
            ((buf[1] as usize) << 16) | ((buf[2] as usize) << 8) | buf[3] as usize;
        if buf.len() < TAG_HEADER_SIZE + data_size + 4 {
            return Ok(None);
        }

        let type_byte = buf.get_u8();
        let tag_type = TagType::from_byte(type_byte).ok_or(FlvError::UnknownTagType(type_byte))?;
        let _ = get_u24(buf); // data size, already known
        let ts_low = get_u24(buf);
        let ts_ext = buf.get_u8() as u32;
        let _ = get_u24(buf); // stream id
        let data = buf.split_to(data_size).freeze();
        let _ = buf.get_u32(); // previous tag size

        Ok(Some(FlvTag {
            tag_type,
            timestamp: (ts_ext << 24) | ts_low,
            data,
        }))
    }
}
