//! Minimal HTTP/1 GET used by the per-node monitor clients.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};

/// GET `path` from `address` (`host:port`) and return the body of a 2xx reply.
///
/// The whole exchange, connect included, is bounded by `timeout`.
pub async fn get(address: &str, path: &str, timeout: Duration) -> RemoteResult<Bytes> {
    let uri = format!("http://{address}{path}");
    let failed = |reason: String| RemoteError::Http {
        uri: uri.clone(),
        reason,
    };

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| failed(format!("connect: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| failed(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "http connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", address)
            .header("accept", "application/json")
            .header("user-agent", "swarmgrid/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| failed(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| failed(format!("reading body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            debug!(%status, %uri, "non-2xx response");
            return Err(failed(format!("status {status}")));
        }
        Ok(body)
    })
    .await;

    match result {
        Ok(body) => body,
        Err(_) => Err(RemoteError::HttpTimeout { uri }),
    }
}
