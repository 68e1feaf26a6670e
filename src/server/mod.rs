//! Multipart MJPEG over HTTP.
//!
//! One route, `GET /`, answers with an endless `multipart/x-mixed-replace`
//! body. Each connection subscribes to the broadcaster for as long as its
//! body stream lives; hyper drops the stream when the client goes away or a
//! write fails, and the subscription goes with it.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pipeline::broadcast::{Broadcaster, EncodedFrame, Subscription};

#[derive(Clone)]
struct StreamState {
    broadcaster: Arc<Broadcaster>,
    boundary: Arc<str>,
}

pub fn router(broadcaster: Arc<Broadcaster>, boundary: &str) -> Router {
    Router::new().route("/", get(stream)).with_state(StreamState {
        broadcaster,
        boundary: Arc::from(boundary),
    })
}

/// Serve the stream until `shutdown` resolves.
///
/// Close the broadcaster alongside the shutdown signal, otherwise open
/// viewer responses keep the graceful shutdown waiting.
pub async fn serve<F>(
    listener: TcpListener,
    broadcaster: Arc<Broadcaster>,
    boundary: String,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().map_err(Error::Server)?;
    info!("Streaming on http://{}/", addr);

    axum::serve(
        listener,
        router(broadcaster, &boundary).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(Error::Server)
}

pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace;boundary={}", boundary)
}

/// One multipart section carrying one JPEG
pub fn part(boundary: &str, frame: &EncodedFrame) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        boundary,
        frame.data.len()
    );
    let mut buf = BytesMut::with_capacity(head.len() + frame.data.len() + 2);
    buf.put_slice(head.as_bytes());
    buf.put_slice(&frame.data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Parts for every frame the subscription receives, until the broadcaster closes
pub fn parts(
    mut subscription: Subscription,
    boundary: Arc<str>,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        while let Some(frame) = subscription.next().await {
            yield Ok(part(&boundary, &frame));
        }
        debug!("Viewer {} stream ended", subscription.id());
    }
}

async fn stream(
    State(state): State<StreamState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let subscription = state.broadcaster.subscribe_owned(peer);
    info!(
        "Viewer {} connected from {:?} ({} watching)",
        subscription.id(),
        peer,
        state.broadcaster.viewer_count()
    );

    (
        [
            (header::CONTENT_TYPE, content_type(&state.boundary)),
            (header::CACHE_CONTROL, "no-cache, no-store".to_string()),
        ],
        Body::from_stream(parts(subscription, state.boundary.clone())),
    )
        .into_response()
}
