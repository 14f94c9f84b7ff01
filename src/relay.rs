//! Pull relays
//!
//! A pull relay makes this server a downstream consumer of another HTTP-FLV
//! source and re-serves it locally: the puller issues a streaming GET,
//! decodes the incoming FLV tags, declares tracks on first sight, and
//! republishes packets through the registry. Registered pulls can be
//! persisted and are re-established once at startup.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio_stream::StreamExt;

use crate::amf::{decode_value, AmfValue};
use crate::error::{HdlError, Result};
use crate::flv::{FlvTag, TagReader, TagType};
use crate::metadata::ON_METADATA;
use crate::registry::Publisher;
use crate::state::AppState;
use crate::track::{AudioCodec, AudioTrack, MediaPacket, VideoCodec, VideoTrack};

/// Delay between reconnect attempts for a dropped upstream
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Timeout for establishing the upstream connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the upstream to produce response headers. The body itself
/// is unbounded; a live stream is read for as long as it lasts.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Start pulling `target` and republishing it as `stream_path`.
///
/// The upstream GET is issued before the stream is registered, so a dead
/// source fails the request instead of leaving a silent empty stream; the
/// connect and the wait for response headers are both bounded, so a
/// black-holed upstream fails promptly instead of stalling the caller. On
/// success the decode loop runs in a background task until the upstream
/// ends (or indefinitely when reconnect is configured).
pub async fn start_pull(state: &Arc<AppState>, stream_path: &str, target: &str) -> Result<()> {
    let url = reqwest::Url::parse(target)
        .map_err(|e| HdlError::RelayPull(format!("invalid target {target}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HdlError::RelayPull(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| HdlError::RelayPull(e.to_string()))?;
    let response = fetch_source(&client, &url).await?;

    let publisher = state
        .registry
        .publish(stream_path, Some(target.to_string()))?;
    let reconnect = state.reconnect();

    tracing::info!(stream = %stream_path, target = %target, reconnect, "relay pull started");
    tokio::spawn(run_pull(publisher, client, url, response, reconnect));
    Ok(())
}

/// Re-establish every persisted pull mapping once. Individual failures are
/// logged and never abort startup.
pub async fn auto_pull(state: &Arc<AppState>) {
    for (stream_path, target) in state.pull_entries() {
        match start_pull(state, &stream_path, &target).await {
            Ok(()) => tracing::info!(stream = %stream_path, target = %target, "auto pull established"),
            Err(e) => tracing::warn!(stream = %stream_path, target = %target, error = %e, "auto pull failed"),
        }
    }
}

async fn run_pull(
    publisher: Publisher,
    client: reqwest::Client,
    url: reqwest::Url,
    first_response: reqwest::Response,
    reconnect: bool,
) {
    let mut response = Some(first_response);
    loop {
        if let Some(response) = response.take() {
            if let Err(e) = consume_stream(&publisher, response).await {
                tracing::warn!(stream = %publisher.path(), error = %e, "relay pull interrupted");
            }
        }
        if !reconnect {
            break;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
        match fetch_source(&client, &url).await {
            Ok(r) => {
                tracing::info!(stream = %publisher.path(), "relay pull reconnected");
                response = Some(r);
            }
            Err(e) => {
                tracing::warn!(stream = %publisher.path(), error = %e, "relay reconnect failed");
            }
        }
    }
    tracing::info!(stream = %publisher.path(), "relay pull ended");
    // Dropping the publisher closes the local stream.
}

/// Issue the upstream GET and wait for its response headers, bounded so a
/// silent upstream cannot stall the caller.
async fn fetch_source(
    client: &reqwest::Client,
    url: &reqwest::Url,
) -> Result<reqwest::Response> {
    let response = tokio::time::timeout(RESPONSE_TIMEOUT, client.get(url.clone()).send())
        .await
        .map_err(|_| HdlError::RelayPull(format!("{url}: no response headers")))?
        .and_then(|r| r.error_for_status())
        .map_err(|e| HdlError::RelayPull(e.to_string()))?;
    Ok(response)
}

/// Decode one upstream response body into track declarations and packets.
async fn consume_stream(publisher: &Publisher, response: reqwest::Response) -> Result<()> {
    let mut body = response.bytes_stream();
    let mut reader = TagReader::new();
    let mut buf = BytesMut::new();

    let mut flags_handled = false;
    let mut video_declared = false;
    let mut audio_declared = false;
    let mut upstream_meta: Option<AmfValue> = None;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| HdlError::RelayPull(e.to_string()))?;
        buf.extend_from_slice(&chunk);

        while let Some(tag) = reader.next(&mut buf)? {
            if !flags_handled {
                if let Some(flags) = reader.header_flags() {
                    // The header already knows which tracks can never
                    // appear; resolve those immediately so downstream
                    // rendezvous does not stall.
                    if !flags.has_video {
                        publisher.set_no_video();
                    }
                    if !flags.has_audio {
                        publisher.set_no_audio();
                    }
                    flags_handled = true;
                }
            }
            match tag.tag_type {
                TagType::Script => {
                    if upstream_meta.is_none() {
                        upstream_meta = decode_script_metadata(&tag);
                    }
                }
                TagType::Video => {
                    if !video_declared {
                        video_declared = true;
                        if declare_video(publisher, &tag, upstream_meta.as_ref()) {
                            // Sequence header consumed as extradata, not a
                            // data packet.
                            continue;
                        }
                    }
                    publisher.push_video(MediaPacket::new(tag.timestamp, tag.data));
                }
                TagType::Audio => {
                    if !audio_declared {
                        audio_declared = true;
                        if declare_audio(publisher, &tag) {
                            continue;
                        }
                    }
                    publisher.push_audio(MediaPacket::new(tag.timestamp, tag.data));
                }
            }
        }
    }
    Ok(())
}

/// Decode the `onMetaData` payload of an upstream script tag
fn decode_script_metadata(tag: &FlvTag) -> Option<AmfValue> {
    let mut bytes = tag.data.clone();
    let name = decode_value(&mut bytes).ok()?;
    if name != AmfValue::String(ON_METADATA.to_string()) {
        return None;
    }
    decode_value(&mut bytes).ok()
}

/// Declare the video track from its first tag. Returns true when the tag
/// was a sequence header and must not be forwarded as a packet.
fn declare_video(publisher: &Publisher, tag: &FlvTag, meta: Option<&AmfValue>) -> bool {
    let Some(codec) = tag.video_codec() else {
        tracing::warn!(stream = %publisher.path(), "unknown upstream video codec");
        return false;
    };
    let dimension = |key| {
        meta.and_then(|m| m.get(key))
            .and_then(AmfValue::as_number)
            .unwrap_or(0.0) as u32
    };
    let is_header = tag.is_video_sequence_header();
    publisher.set_video_track(VideoTrack {
        codec,
        width: dimension("width"),
        height: dimension("height"),
        extradata: if is_header {
            tag.data.clone()
        } else {
            bytes::Bytes::new()
        },
    });
    is_header
}

/// Declare the audio track from its first tag; see [`declare_video`]
fn declare_audio(publisher: &Publisher, tag: &FlvTag) -> bool {
    let Some(codec) = tag.audio_codec() else {
        tracing::warn!(stream = %publisher.path(), "unknown upstream audio codec");
        return false;
    };
    let header_byte = tag.data[0];
    let sample_rate = match (header_byte >> 2) & 0x03 {
        0 => 5512,
        1 => 11025,
        2 => 22050,
        _ => 44100,
    };
    let is_header = tag.is_audio_sequence_header();
    publisher.set_audio_track(AudioTrack {
        codec,
        sample_rate,
        sample_size: if header_byte & 0x02 != 0 { 16 } else { 8 },
        channels: (header_byte & 0x01) + 1,
        extradata: is_header.then(|| tag.data.clone()),
    });
    is_header
}
