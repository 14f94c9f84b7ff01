//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{health_check, list_streams, play_stream, pull_stream, version_check};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config().cors_enabled;

    let router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        // Control plane
        .route("/api/hdl/list", get(list_streams))
        .route("/api/hdl/pull", get(pull_stream))
        // Playback wildcard; explicit routes above take precedence
        .route("/{*path}", get(play_stream))
        // Middleware
        .layer(TraceLayer::new_for_http());

    // The control plane is called from browser dashboards and playback is
    // embedded by players, so permissive CORS is the default; locked-down
    // deployments turn it off in the configuration.
    let router = if cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    };

    router.with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS, Method::HEAD])
        .allow_headers([header::ACCEPT, header::RANGE, header::ORIGIN])
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::track::{AudioCodec, AudioTrack, MediaPacket, VideoCodec, VideoTrack};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use tower::util::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(ServerConfig::default(), None))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_stream_is_404_with_empty_body() {
        let app = create_router(test_state());
        for uri in ["/nope", "/hdl/nope.flv", "/hdl/"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert!(body.is_empty(), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_playback_served_with_flv_content_type() {
        let state = test_state();
        let publisher = state.registry.publish("live/a", None).unwrap();
        publisher.set_video_track(VideoTrack {
            codec: VideoCodec::Avc,
            width: 640,
            height: 480,
            extradata: Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00]),
        });
        publisher.set_audio_track(AudioTrack {
            codec: AudioCodec::Aac,
            sample_rate: 44100,
            sample_size: 16,
            channels: 2,
            extradata: Some(Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10])),
        });

        // End the stream shortly after start so the body completes.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            publisher.push_video(MediaPacket::new(40, Bytes::from_static(&[0x27, 0x01])));
            drop(publisher);
        });

        let app = create_router(state);
        let response = app.oneshot(get("/hdl/live/a.flv")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/x-flv"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..13], &crate::flv::FLV_HEADER);
        // Script tag follows the file header.
        assert_eq!(body[13], 18);
    }

    #[tokio::test]
    async fn test_list_json_snapshot() {
        let state = test_state();
        let _pulled = state
            .registry
            .publish("live/a", Some("http://up/a.flv".into()))
            .unwrap();
        let _local = state.registry.publish("live/b", None).unwrap();

        let app = create_router(state);
        let response = app.oneshot(get("/api/hdl/list?json=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["streamPath"], "live/a");
        assert_eq!(listed[0]["source"], "http://up/a.flv");
    }

    #[tokio::test]
    async fn test_list_continuous_pushes_snapshots() {
        use tokio_stream::StreamExt;

        let state = test_state();
        let _pulled = state
            .registry
            .publish("live/a", Some("http://up/a.flv".into()))
            .unwrap();

        let app = create_router(state);
        let response = app.oneshot(get("/api/hdl/list")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let mut frames = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .expect("no push within interval")
            .unwrap()
            .unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("data:"));
        assert!(text.contains("live/a"));

        // Pushes keep coming, one per interval, until the client leaves.
        let started = tokio::time::Instant::now();
        let second = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .expect("no second push within interval")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        let text = String::from_utf8(second.to_vec()).unwrap();
        assert!(text.contains("live/a"));
    }

    #[tokio::test]
    async fn test_pull_with_invalid_target_is_500() {
        let app = create_router(test_state());
        let response = app
            .oneshot(get("/api/hdl/pull?target=rtmp://x/y&streamPath=a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_pull_missing_params_rejected() {
        let app = create_router(test_state());
        let response = app.oneshot(get("/api/hdl/pull?save=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_disabled_by_config() {
        let mut config = ServerConfig::default();
        config.cors_enabled = false;
        let state = Arc::new(AppState::new(config, None));
        let app = create_router(state);

        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:8080")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let state = test_state();
        let app = create_router(state);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/hdl/list")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }
}
