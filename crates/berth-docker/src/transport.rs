// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP/1.1 client over the Docker Engine Unix socket.
//!
//! The Engine serializes requests itself, so the transport keeps no
//! connection pool: each request dials the socket, performs an HTTP/1.1
//! handshake, and drives the connection on a background task until the
//! response body is drained. Streaming endpoints (pull, build, logs)
//! hand the raw body back to the caller.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{DriverError, Result};

/// Engine API version prefix on every path.
const API_VERSION: &str = "v1.43";

/// Error body shape the Engine uses for non-2xx answers.
#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// A response with its status and still-streaming body.
pub struct EngineResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response body, not yet collected.
    pub body: Incoming,
}

impl EngineResponse {
    /// Collect the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        Ok(self.body.collect().await?.to_bytes())
    }

    /// Drain the body, feeding each chunk to `sink`.
    pub async fn drain_chunks<F>(mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        while let Some(frame) = self.body.frame().await {
            let frame = frame?;
            if let Some(chunk) = frame.data_ref() {
                sink(chunk);
            }
        }
        Ok(())
    }
}

/// Per-request transport over the Engine Unix socket.
#[derive(Debug, Clone)]
pub struct EngineTransport {
    socket_path: PathBuf,
}

impl EngineTransport {
    /// Create a transport for the given socket path.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Issue a request and return the raw response.
    ///
    /// `path_and_query` is relative to the API version prefix, e.g.
    /// `/networks/create`. The connection task lives until the body is
    /// dropped or drained.
    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
        content_type: &str,
    ) -> Result<EngineResponse> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Engine connection closed with error");
            }
        });

        let uri = format!("/{API_VERSION}{path_and_query}");
        let request = Request::builder()
            .method(method)
            .uri(&uri)
            .header(HOST, "docker")
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(body.unwrap_or_default()))?;

        let response = sender.send_request(request).await?;
        let (parts, body) = response.into_parts();
        Ok(EngineResponse {
            status: parts.status,
            body,
        })
    }

    /// Issue a JSON request, expecting a 2xx JSON answer.
    pub async fn json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&impl serde::Serialize>,
    ) -> Result<T> {
        let body = match body {
            Some(b) => Some(Bytes::from(serde_json::to_vec(b)?)),
            None => None,
        };
        let response = self
            .request(method, path_and_query, body, "application/json")
            .await?;
        let status = response.status;
        let bytes = response.collect().await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Issue a JSON request where the answer body is irrelevant.
    pub async fn json_unit(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&impl serde::Serialize>,
    ) -> Result<()> {
        let body = match body {
            Some(b) => Some(Bytes::from(serde_json::to_vec(b)?)),
            None => None,
        };
        let response = self
            .request(method, path_and_query, body, "application/json")
            .await?;
        let status = response.status;
        let bytes = response.collect().await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        Ok(())
    }
}

/// Map a non-2xx Engine answer to a [`DriverError::Api`], pulling the
/// `message` field out of the body when present.
pub fn api_error(status: StatusCode, body: &[u8]) -> DriverError {
    let message = serde_json::from_slice::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    DriverError::api(status.as_u16(), message)
}

/// Percent-encode a query-string value.
pub fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Percent-encode a filters JSON blob for a query string.
///
/// The Engine accepts `filters={"label":["k=v"]}`.
pub fn encode_filters(filters: &serde_json::Value) -> String {
    percent_encode(&filters.to_string())
}
