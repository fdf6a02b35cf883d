//! The `version` command, the one whose decode failure forces a connection
//! reset. There is no opaque token on a version exchange, so an unexpected
//! response prefix leaves no way to resynchronize the pipelined stream.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncBufRead;

use crate::codec::constants::{CRLF, VERSION_REQUEST};
use crate::codec::util::read_header_line;
use crate::codec::{LinkDecoder, LinkEncoder};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionRequest;

impl LinkEncoder for VersionRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.extend_from_slice(VERSION_REQUEST);
        buf.extend_from_slice(CRLF);
        Ok(())
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Default)]
pub struct VersionResponse {
    /// The raw `VERSION <string>` line as sent by the server.
    pub header_line: String,
}

impl VersionResponse {
    /// The server version with the `VERSION ` prefix and line terminator
    /// stripped.
    pub fn version(&self) -> &str {
        self.header_line
            .trim_end_matches(['\r', '\n'])
            .strip_prefix("VERSION ")
            .unwrap_or("")
    }
}

#[async_trait]
impl LinkDecoder for VersionResponse {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
        let line = read_header_line(reader).await?;
        self.header_line = String::from_utf8_lossy(&line).into_owned();
        if !self.header_line.starts_with("VERSION") {
            // Other decoders would hand mismatches back to the caller, but
            // with no opaque on this command the connection has to go.
            return Err(Error::NonVersionResponse);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.header_line.clear();
    }
}
