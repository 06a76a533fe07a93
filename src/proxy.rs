//! Upstream forwarding.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, Method, Response, Uri};
use std::time::Duration;
use thiserror::Error;

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid upstream response: {0}")]
    Response(#[from] axum::http::Error),
}

/// Forwards requests to an upstream base URL and streams the reply back.
///
/// The client's `Host` header is passed through unchanged, so the upstream
/// sees the host the browser used rather than its own.
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
}

impl ProxyForwarder {
    /// `timeout` bounds connecting and each wait for upstream data. A reply
    /// that keeps arriving is never cut off, however long it streams.
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Join a base URL and the request's path and query.
    pub fn upstream_url(base: &str, uri: &Uri) -> String {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        format!("{}{}", base.trim_end_matches('/'), path_and_query)
    }

    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
        target_base_url: &str,
    ) -> Result<Response<Body>, ProxyError> {
        let url = Self::upstream_url(target_base_url, uri);

        let upstream = self
            .client
            .request(method, url)
            .headers(strip_hop_by_hop(headers))
            .body(body)
            .send()
            .await?;

        let mut response = Response::builder().status(upstream.status());
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                response = response.header(name, value);
            }
        }

        Ok(response.body(Body::from_stream(upstream.bytes_stream()))?)
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Upstream answering one request with a chunked body, one chunk per
    /// `interval`.
    async fn spawn_trickle_upstream(chunks: usize, interval: Duration) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for i in 0..chunks {
                tokio::time::sleep(interval).await;
                socket.write_all(format!("1\r\n{}\r\n", i % 10).as_bytes()).await.unwrap();
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });
        addr
    }

    #[test]
    fn test_upstream_url_keeps_query() {
        let uri: Uri = "/api/products/123?x=1".parse().unwrap();
        assert_eq!(
            ProxyForwarder::upstream_url("http://dev.com/", &uri),
            "http://dev.com/api/products/123?x=1"
        );

        let uri: Uri = "/api/a".parse().unwrap();
        assert_eq!(ProxyForwarder::upstream_url("http://dev.com", &uri), "http://dev.com/api/a");
    }

    #[test]
    fn test_hop_by_hop_stripped_host_kept() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("localhost:8080"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));

        let forwarded = strip_hop_by_hop(&headers);
        assert_eq!(forwarded.get("host").unwrap(), "localhost:8080");
        assert_eq!(forwarded.get("x-trace").unwrap(), "abc");
        assert!(forwarded.get("connection").is_none());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = ProxyForwarder::new(Duration::from_secs(2)).unwrap();
        let uri: Uri = "/api/x".parse().unwrap();
        let result = forwarder
            .forward(
                Method::GET,
                &uri,
                &HeaderMap::new(),
                Bytes::new(),
                &format!("http://{addr}"),
            )
            .await;

        assert!(matches!(result, Err(ProxyError::Transport(_))));
    }

    #[tokio::test]
    async fn test_slow_stream_outlives_timeout() {
        let addr = spawn_trickle_upstream(6, Duration::from_millis(100)).await;
        let forwarder = ProxyForwarder::new(Duration::from_millis(300)).unwrap();
        let uri: Uri = "/api/events".parse().unwrap();

        let response = forwarder
            .forward(
                Method::GET,
                &uri,
                &HeaderMap::new(),
                Bytes::new(),
                &format!("http://{addr}"),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"012345");
    }
}
