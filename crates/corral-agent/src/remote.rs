//! HTTP transport to the controller's REST API.
//!
//! Reports are POSTed to `/api/v1/reports`; the controller answers only
//! after the synchronizer has applied (202) or discarded (400) the report.
//! Placed containers are fetched with `POST /api/v1/hosts/{hostname}/containers/drain`.

use std::time::Duration;

use bytes::Bytes;
use corral_cluster::{ClusterError, ClusterResult, ContainerSource, ReportSink};
use corral_state::{Container, Host};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::debug;

/// Client for one controller address (`host:port`).
#[derive(Debug, Clone)]
pub struct ControllerClient {
    address: String,
    timeout: Duration,
}

impl ControllerClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// POST a JSON body and collect the full response.
    async fn post(&self, path: &str, body: Vec<u8>) -> anyhow::Result<(StatusCode, Bytes)> {
        let uri = format!("http://{}{path}", self.address);
        tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(&self.address).await?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("POST")
                .uri(&uri)
                .header("host", &self.address)
                .header("content-type", "application/json")
                .header("user-agent", "corral-agent/0.1")
                .body(Full::new(Bytes::from(body)))?;

            let resp = sender.send_request(req).await?;
            let status = resp.status();
            let body = resp.into_body().collect().await?.to_bytes();
            debug!(%uri, %status, "controller responded");
            Ok::<_, anyhow::Error>((status, body))
        })
        .await
        .map_err(|_| anyhow::anyhow!("request to {uri} timed out"))?
    }
}

fn transport(e: anyhow::Error) -> ClusterError {
    ClusterError::Transport(e.to_string())
}

impl ReportSink for ControllerClient {
    async fn send_report(&self, host: &Host) -> ClusterResult<()> {
        let body =
            serde_json::to_vec(host).map_err(|e| ClusterError::MalformedReport(e.to_string()))?;
        let (status, body) = self.post("/api/v1/reports", body).await.map_err(transport)?;
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::BAD_REQUEST => Err(ClusterError::Rejected(
                String::from_utf8_lossy(&body).into_owned(),
            )),
            s => Err(ClusterError::Transport(format!("controller returned {s}"))),
        }
    }
}

impl ContainerSource for ControllerClient {
    async fn receive_containers(&self, hostname: &str) -> ClusterResult<Vec<Container>> {
        let path = format!("/api/v1/hosts/{hostname}/containers/drain");
        let (status, body) = self.post(&path, Vec::new()).await.map_err(transport)?;
        if !status.is_success() {
            return Err(ClusterError::Transport(format!("controller returned {status}")));
        }
        serde_json::from_slice(&body).map_err(|e| ClusterError::Transport(e.to_string()))
    }
}
