//! Live FLV muxing session
//!
//! One session per accepted playback connection. The session is the only
//! writer to its connection's byte sink: packets from the registry's
//! producer contexts funnel through a `select!` loop here, so tag bytes can
//! never interleave. Frames are handed to the HTTP layer over a bounded
//! mpsc channel; hyper streams them to the client as chunked transfer.
//!
//! Tag order per connection: FLV file header, exactly one script tag
//! (timestamp 0), then per resolved track an optional timestamp-0 init tag
//! followed by that track's data tags in arrival order.

use std::convert::Infallible;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::flv::{write_tag, TagType, FLV_HEADER};
use crate::metadata::encode_metadata_payload;
use crate::registry::Subscriber;
use crate::track::MediaPacket;

/// Body frames buffered between the session and hyper
const BODY_CHANNEL_CAPACITY: usize = 64;

/// Start a muxing session for a subscribed stream and return the response
/// body it feeds.
///
/// The session ends when the stream closes or the client disconnects;
/// dropping the body cancels the session at its next suspension point.
pub fn start(subscriber: Subscriber) -> Body {
    let (tx, rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
    tokio::spawn(run(subscriber, tx));
    Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
}

/// Drive one connection's muxing state machine.
pub(crate) async fn run(mut subscriber: Subscriber, tx: mpsc::Sender<Bytes>) {
    // Header bytes go out as soon as the subscription holds, before the
    // track rendezvous.
    if tx.send(Bytes::from_static(&FLV_HEADER)).await.is_err() {
        return;
    }

    // Track rendezvous. Either wait may suspend indefinitely for a live
    // stream that has not produced the track yet; a client disconnect
    // unblocks it.
    let video = tokio::select! {
        _ = tx.closed() => return,
        v = subscriber.wait_video_track() => v,
    };
    let audio = tokio::select! {
        _ = tx.closed() => return,
        a = subscriber.wait_audio_track() => a,
    };

    // Open packet receivers before writing the metadata tag so no packet
    // published after the tag is lost.
    let mut video_rx = video.as_ref().and_then(|_| subscriber.video_packets());
    let mut audio_rx = audio.as_ref().and_then(|_| subscriber.audio_packets());

    let mut buf = BytesMut::new();
    let metadata = encode_metadata_payload(video.as_ref(), audio.as_ref());
    write_tag(&mut buf, TagType::Script, 0, &metadata);
    if let Some(v) = &video {
        if !v.extradata.is_empty() {
            write_tag(&mut buf, TagType::Video, 0, &v.extradata);
        }
    }
    if let Some(a) = &audio {
        if let Some(extradata) = &a.extradata {
            write_tag(&mut buf, TagType::Audio, 0, extradata);
        }
    }
    if tx.send(buf.split().freeze()).await.is_err() {
        return;
    }

    tracing::debug!(
        stream = %subscriber.path(),
        subscriber = %subscriber.id(),
        has_video = video.is_some(),
        has_audio = audio.is_some(),
        "flv playback started"
    );

    let stream_path = subscriber.path().to_string();
    loop {
        if video_rx.is_none() && audio_rx.is_none() {
            // Stream ended; terminating the body completes the response.
            break;
        }
        let (tag_type, packet) = tokio::select! {
            _ = tx.closed() => break,
            p = next_packet(&mut video_rx, &stream_path) => match p {
                Some(p) => (TagType::Video, p),
                None => continue,
            },
            p = next_packet(&mut audio_rx, &stream_path) => match p {
                Some(p) => (TagType::Audio, p),
                None => continue,
            },
        };
        write_tag(&mut buf, tag_type, packet.timestamp, &packet.payload);
        if tx.send(buf.split().freeze()).await.is_err() {
            // Client disconnected mid-stream: normal termination.
            break;
        }
    }

    tracing::debug!(stream = %stream_path, subscriber = %subscriber.id(), "flv session ended");
}

/// Receive the next packet from an optional channel.
///
/// Pends forever on `None` so a closed or absent track drops out of the
/// `select!` without busy-looping; on channel close the slot is cleared and
/// `None` returned.
async fn next_packet(
    rx: &mut Option<broadcast::Receiver<MediaPacket>>,
    stream_path: &str,
) -> Option<MediaPacket> {
    loop {
        let result = match rx {
            Some(r) => r.recv().await,
            None => std::future::pending().await,
        };
        match result {
            Ok(packet) => return Some(packet),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(stream = %stream_path, skipped, "slow subscriber dropped packets");
            }
            Err(broadcast::error::RecvError::Closed) => {
                *rx = None;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{decode_value, AmfValue};
    use crate::flv::{FlvTag, TagReader};
    use crate::registry::StreamRegistry;
    use crate::track::{AudioCodec, AudioTrack, VideoCodec, VideoTrack};
    use std::time::Duration;

    fn video_track() -> VideoTrack {
        VideoTrack {
            codec: VideoCodec::Avc,
            width: 1920,
            height: 1080,
            extradata: Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00]),
        }
    }

    fn audio_track() -> AudioTrack {
        AudioTrack {
            codec: AudioCodec::Aac,
            sample_rate: 44100,
            sample_size: 16,
            channels: 2,
            extradata: Some(Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10])),
        }
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<Bytes>) -> Bytes {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("body closed early")
    }

    async fn collect_remaining(rx: &mut mpsc::Receiver<Bytes>) -> BytesMut {
        let mut all = BytesMut::new();
        while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            all.extend_from_slice(&frame);
        }
        all
    }

    fn parse_tags(bytes: &mut BytesMut) -> Vec<FlvTag> {
        let mut reader = TagReader::new();
        let mut tags = Vec::new();
        while let Some(tag) = reader.next(bytes).unwrap() {
            tags.push(tag);
        }
        tags
    }

    /// Decode the metadata script payload into (declared count, entries).
    fn decode_metadata(tag: &FlvTag) -> Vec<(String, AmfValue)> {
        let mut bytes = tag.data.clone();
        let name = decode_value(&mut bytes).unwrap();
        assert_eq!(name, AmfValue::String("onMetaData".into()));
        match decode_value(&mut bytes).unwrap() {
            AmfValue::EcmaArray(entries) => entries,
            other => panic!("expected ECMA array, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_with_both_tracks() {
        let registry = StreamRegistry::new();
        let publisher = registry.publish("live/a", None).unwrap();
        publisher.set_video_track(video_track());
        publisher.set_audio_track(audio_track());

        let subscriber = registry.subscribe("live/a").unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = tokio::spawn(run(subscriber, tx));

        let header = recv_frame(&mut rx).await;
        assert_eq!(&header[..], &FLV_HEADER);

        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&header);
        // Receipt of the metadata frame means the packet receivers are
        // registered; packets pushed from here on are delivered.
        bytes.extend_from_slice(&recv_frame(&mut rx).await);

        publisher.push_video(MediaPacket::new(40, Bytes::from_static(&[0x17, 0x01, 0x01])));
        publisher.push_video(MediaPacket::new(80, Bytes::from_static(&[0x27, 0x01, 0x02])));
        publisher.push_audio(MediaPacket::new(46, Bytes::from_static(&[0xAF, 0x01, 0x03])));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(publisher);

        bytes.extend_from_slice(&collect_remaining(&mut rx).await);
        session.await.unwrap();

        let tags = parse_tags(&mut bytes);
        // script, video init, audio init, then three data tags
        assert_eq!(tags.len(), 6);
        assert_eq!(tags[0].tag_type, TagType::Script);
        assert_eq!(tags[0].timestamp, 0);

        let entries = decode_metadata(&tags[0]);
        assert_eq!(entries.len(), 17);

        assert_eq!(tags[1].tag_type, TagType::Video);
        assert_eq!(tags[1].timestamp, 0);
        assert_eq!(tags[1].data, video_track().extradata);
        assert!(tags[1].is_video_sequence_header());

        assert_eq!(tags[2].tag_type, TagType::Audio);
        assert_eq!(tags[2].timestamp, 0);
        assert!(tags[2].is_audio_sequence_header());

        // Data tags keep per-track order; first data tag of each type comes
        // after that type's init tag.
        let video_data: Vec<_> = tags[3..]
            .iter()
            .filter(|t| t.tag_type == TagType::Video)
            .collect();
        assert_eq!(video_data.len(), 2);
        assert_eq!(video_data[0].timestamp, 40);
        assert_eq!(video_data[1].timestamp, 80);
        let audio_data: Vec<_> = tags[3..]
            .iter()
            .filter(|t| t.tag_type == TagType::Audio)
            .collect();
        assert_eq!(audio_data.len(), 1);
        assert_eq!(audio_data[0].timestamp, 46);
    }

    #[tokio::test]
    async fn test_audio_only_stream_never_emits_video() {
        let registry = StreamRegistry::new();
        let publisher = registry.publish("radio", None).unwrap();
        publisher.set_no_video();
        publisher.set_audio_track(AudioTrack {
            codec: AudioCodec::Mp3,
            sample_rate: 44100,
            sample_size: 16,
            channels: 1,
            extradata: None,
        });

        let subscriber = registry.subscribe("radio").unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let session = tokio::spawn(run(subscriber, tx));

        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&recv_frame(&mut rx).await);
        bytes.extend_from_slice(&recv_frame(&mut rx).await);

        publisher.push_audio(MediaPacket::new(26, Bytes::from_static(&[0x2F, 0xAA])));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(publisher);

        bytes.extend_from_slice(&collect_remaining(&mut rx).await);
        session.await.unwrap();

        let tags = parse_tags(&mut bytes);
        assert!(tags.iter().all(|t| t.tag_type != TagType::Video));
        // MP3 has no init tag: script then one data tag.
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].tag_type, TagType::Audio);

        let entries = decode_metadata(&tags[0]);
        assert_eq!(entries.len(), 14);
        let has_video = entries.iter().find(|(k, _)| k == "hasVideo").unwrap();
        assert_eq!(has_video.1, AmfValue::Boolean(false));
    }

    #[tokio::test]
    async fn test_cancellation_stops_one_session_only() {
        let registry = StreamRegistry::new();
        let publisher = registry.publish("live/a", None).unwrap();
        publisher.set_video_track(video_track());
        publisher.set_no_audio();

        let sub1 = registry.subscribe("live/a").unwrap();
        let sub2 = registry.subscribe("live/a").unwrap();
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);
        let session1 = tokio::spawn(run(sub1, tx1));
        let _session2 = tokio::spawn(run(sub2, tx2));

        // Drain both preambles.
        recv_frame(&mut rx1).await;
        recv_frame(&mut rx1).await;
        recv_frame(&mut rx2).await;
        recv_frame(&mut rx2).await;

        // First client disconnects.
        drop(rx1);
        publisher.push_video(MediaPacket::new(40, Bytes::from_static(&[0x27, 0x01])));

        // The cancelled session terminates promptly.
        tokio::time::timeout(Duration::from_secs(2), session1)
            .await
            .expect("cancelled session did not stop")
            .unwrap();

        // The surviving session still receives tags.
        let frame = recv_frame(&mut rx2).await;
        assert!(!frame.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_during_track_rendezvous() {
        let registry = StreamRegistry::new();
        let _publisher = registry.publish("live/a", None).unwrap();
        let subscriber = registry.subscribe("live/a").unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let session = tokio::spawn(run(subscriber, tx));
        recv_frame(&mut rx).await; // FLV header

        // No tracks ever declared; client gives up.
        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session stuck in rendezvous")
            .unwrap();
    }
}
