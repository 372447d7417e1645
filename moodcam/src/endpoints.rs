//! Endpoints of the status page.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{preview::Preview, report::SharedText};

const PART_HEADER: &str = "--frame\r\nContent-Type: image/jpeg\r\n\r\n";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>moodcam</title>
  <style>
    body { font-family: sans-serif; background: #111; color: #eee; text-align: center; }
    #status { font-size: 2em; margin: 0.5em; }
    #debug { font-family: monospace; color: #999; min-height: 1.2em; }
    img { max-width: 90vw; }
  </style>
</head>
<body>
  <div id="status"></div>
  <img src="/stream" alt="camera preview">
  <div id="debug"></div>
  <script>
    async function poll() {
      try {
        const resp = await fetch('/status', { cache: 'no-store' });
        const state = await resp.json();
        document.getElementById('status').textContent = state.status;
        document.getElementById('debug').textContent = state.debug;
      } catch (e) {
        document.getElementById('debug').textContent = 'status unavailable';
      }
    }
    poll();
    setInterval(poll, 250);
  </script>
</body>
</html>
"#;

/// Receivers the endpoints read from.
pub struct UiState {
    status: watch::Receiver<String>,
    debug: watch::Receiver<String>,
    preview: watch::Receiver<Option<Arc<RgbImage>>>,
}

impl UiState {
    pub fn new(status: &SharedText, debug: &SharedText, preview: &Preview) -> Self {
        Self {
            status: status.subscribe(),
            debug: debug.subscribe(),
            preview: preview.subscribe(),
        }
    }
}

/// Both text regions at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub debug: String,
}

pub fn router(state: Arc<UiState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/stream", get(preview_stream))
        .route("/healthcheck", get(healthcheck))
        .layer(Extension(state))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn status(Extension(state): Extension<Arc<UiState>>) -> Json<StatusSnapshot> {
    Json(StatusSnapshot {
        status: state.status.borrow().clone(),
        debug: state.debug.borrow().clone(),
    })
}

/// Annotated camera frames as a multipart JPEG stream.
pub async fn preview_stream(Extension(state): Extension<Arc<UiState>>) -> impl IntoResponse {
    log::info!("Preview stream requested");

    let stream = WatchStream::new(state.preview.clone()).filter_map(|frame| async move {
        let frame = frame?;
        match turbojpeg::compress_image(&*frame, 80, turbojpeg::Subsamp::Sub2x2) {
            Ok(jpeg) => Some(Ok::<_, String>(as_jpeg_stream_item(&jpeg))),
            Err(err) => {
                log::warn!("Failed to encode preview frame: {err}");
                None
            }
        }
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            PART_HEADER.as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {
    use std::net::{SocketAddr, TcpListener};

    use anyhow::Result;
    use facenet::FaceDetection;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::report::PresentationSink;

    struct Page {
        status: SharedText,
        debug: SharedText,
        preview: Preview,
        addr: SocketAddr,
        cancel: CancellationToken,
    }

    fn serve() -> Result<Page> {
        let status = SharedText::new();
        let debug = SharedText::new();
        let preview = Preview::new();
        let state = Arc::new(UiState::new(&status, &debug, &preview));

        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let server = axum::Server::from_tcp(listener)?
            .serve(router(state).into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        tokio::spawn(server);

        Ok(Page {
            status,
            debug,
            preview,
            addr,
            cancel,
        })
    }

    #[test]
    fn jpeg_items_are_framed() {
        let item = as_jpeg_stream_item(&[0xff, 0xd8, 0xff, 0xd9]);
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8"));
        assert!(item.ends_with(b"\xff\xd9\r\n\r\n"));
    }

    #[tokio::test]
    async fn status_shows_both_regions() -> Result<()> {
        let page = serve()?;
        page.status.report("HAPPY (90%)");
        page.debug.report("Detection error: boom");

        let body = reqwest::get(format!("http://{}/status", page.addr))
            .await?
            .error_for_status()?
            .text()
            .await?;
        let snapshot: StatusSnapshot = serde_json::from_str(&body)?;
        assert_eq!(
            snapshot,
            StatusSnapshot {
                status: "HAPPY (90%)".into(),
                debug: "Detection error: boom".into(),
            }
        );

        let health = reqwest::get(format!("http://{}/healthcheck", page.addr))
            .await?
            .text()
            .await?;
        assert_eq!(health, "healthy");

        let index = reqwest::get(format!("http://{}/", page.addr)).await?.text().await?;
        assert!(index.contains("/stream"));

        page.cancel.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn stream_sends_jpeg_parts() -> Result<()> {
        let page = serve()?;
        let frame = RgbImage::from_pixel(32, 24, image::Rgb([40, 80, 120]));
        let detection = FaceDetection {
            bbox: [0.1, 0.1, 0.5, 0.5],
            score: 0.9,
            landmarks: None,
            expressions: None,
        };
        page.preview.publish(&frame, Some(&detection));

        let mut resp = reqwest::get(format!("http://{}/stream", page.addr)).await?;
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        let mut part = Vec::new();
        while part.len() <= PART_HEADER.len() + 4 || !part.ends_with(b"\r\n\r\n") {
            match resp.chunk().await? {
                Some(chunk) => part.extend_from_slice(&chunk),
                None => break,
            }
        }
        assert!(part.starts_with(PART_HEADER.as_bytes()));

        let jpeg = &part[PART_HEADER.len()..part.len() - 4];
        let decoded: RgbImage = turbojpeg::decompress_image(jpeg)?;
        assert_eq!(decoded.dimensions(), (32, 24));

        page.cancel.cancel();
        Ok(())
    }
}
