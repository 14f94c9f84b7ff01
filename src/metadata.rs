//! `onMetaData` construction
//!
//! The first tag every player receives is a script tag whose payload is the
//! AMF0 string `"onMetaData"` followed by an ECMA array describing the
//! stream. The array is built as an explicit ordered list of pairs so the
//! output bytes are deterministic and the declared entry count always
//! equals the number of pairs written.

use bytes::{Bytes, BytesMut};

use crate::amf::{put_ecma_array, put_string, AmfValue};
use crate::track::{AudioTrack, VideoTrack};

/// Value of the `MetaDataCreator` entry
pub const METADATA_CREATOR: &str = "hdl-server";

/// Name of the script tag handler
pub const ON_METADATA: &str = "onMetaData";

/// Build the ordered metadata entries for a stream.
///
/// Ten entries are always present; a resolved video track adds three more
/// and a resolved audio track four.
pub fn build_metadata(
    video: Option<&VideoTrack>,
    audio: Option<&AudioTrack>,
) -> Vec<(String, AmfValue)> {
    let mut entries = vec![
        entry("MetaDataCreator", AmfValue::String(METADATA_CREATOR.into())),
        entry("hasVideo", AmfValue::Boolean(video.is_some())),
        entry("hasAudio", AmfValue::Boolean(audio.is_some())),
        entry("hasMetadata", AmfValue::Boolean(true)),
        entry("canSeekToEnd", AmfValue::Boolean(false)),
        entry("duration", AmfValue::Number(0.0)),
        entry("hasKeyFrames", AmfValue::Number(0.0)),
        entry("framerate", AmfValue::Number(0.0)),
        entry("videodatarate", AmfValue::Number(0.0)),
        entry("filesize", AmfValue::Number(0.0)),
    ];
    if let Some(v) = video {
        entries.push(entry("videocodecid", AmfValue::Number(v.codec.id() as f64)));
        entries.push(entry("width", AmfValue::Number(v.width as f64)));
        entries.push(entry("height", AmfValue::Number(v.height as f64)));
    }
    if let Some(a) = audio {
        entries.push(entry("audiocodecid", AmfValue::Number(a.codec.id() as f64)));
        entries.push(entry(
            "audiosamplerate",
            AmfValue::Number(a.sample_rate as f64),
        ));
        entries.push(entry(
            "audiosamplesize",
            AmfValue::Number(a.sample_size as f64),
        ));
        entries.push(entry("stereo", AmfValue::Boolean(a.is_stereo())));
    }
    entries
}

/// Encode the complete script tag payload for a stream
pub fn encode_metadata_payload(
    video: Option<&VideoTrack>,
    audio: Option<&AudioTrack>,
) -> Bytes {
    let entries = build_metadata(video, audio);
    let mut buf = BytesMut::new();
    put_string(&mut buf, ON_METADATA);
    put_ecma_array(&mut buf, &entries);
    buf.freeze()
}

fn entry(name: &str, value: AmfValue) -> (String, AmfValue) {
    (name.to_string(), value)
}
