// SPDX-License-Identifier: MIT OR Apache-2.0
//! The line-delimited JSON loop over stdio.
//!
//! Each input line is one invocation; each output line is the response
//! entity.  Identity fields come from the request's own `context` block —
//! the stdio transport has no handshake of its own.

use csh_core::{JsonMap, ProtocolMeta, RequestContext, RequestEnvelope, RequestPayload, ResponseEntity, StatusCategory};
use csh_dispatch::Dispatcher;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// One line of stdio input.
#[derive(Debug, Deserialize)]
pub struct LineRequest {
    /// Correlation id; generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Capability to address.
    pub capability: String,
    /// Action within the capability.
    pub action: String,
    /// Payload data entries.
    #[serde(default)]
    pub data: JsonMap,
    /// Invocation parameters.
    #[serde(default)]
    pub parameters: JsonMap,
    /// Payload metadata.
    #[serde(default)]
    pub metadata: JsonMap,
    /// Request context (identity, deadline).
    #[serde(default)]
    pub context: Option<RequestContext>,
}

fn to_envelope(line: LineRequest) -> Result<RequestEnvelope, csh_error::CshError> {
    let mut builder = RequestEnvelope::builder(line.capability, line.action)
        .protocol(ProtocolMeta {
            transport: "stdio".to_string(),
            version: None,
            attributes: JsonMap::new(),
        })
        .payload(RequestPayload::new(
            "json",
            line.data,
            line.parameters,
            line.metadata,
        ))
        .context(line.context.unwrap_or_default());
    if let Some(id) = line.request_id {
        builder = builder.request_id(id);
    }
    builder.build()
}

/// Serve line-delimited JSON requests until the reader closes.
///
/// Malformed lines produce a `bad_request` response line instead of
/// terminating the loop.
///
/// # Errors
///
/// Only I/O errors on the writer terminate the loop with an error.
pub async fn run_loop<R, W>(
    dispatcher: Arc<Dispatcher>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let entity = match serde_json::from_str::<LineRequest>(&line) {
            Ok(request) => match to_envelope(request) {
                Ok(envelope) => dispatcher.dispatch(envelope).await,
                Err(err) => ResponseEntity::error(
                    StatusCategory::BadRequest,
                    err.message().to_string(),
                ),
            },
            Err(err) => {
                debug!(target: "csh.stdio", error = %err, "malformed input line");
                ResponseEntity::error(StatusCategory::BadRequest, format!("malformed request: {err}"))
            }
        };
        let mut out = serde_json::to_vec(&entity).unwrap_or_else(|_| b"{}".to_vec());
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}
