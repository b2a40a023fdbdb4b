use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tokio_util::codec::LinesCodec;
use wsh_protocol::RpcMessage;

/// Maximum line length tolerated by [`NdjsonCodec`] before the line is
/// dropped silently and decoding resynchronizes at the next newline.
pub const MAX_LINE_BYTES: usize = 128 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum NdjsonCodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Newline-delimited JSON framing for pipe/socket transports (§4.1.1).
///
/// Wraps [`LinesCodec`] (already bounded at [`MAX_LINE_BYTES`]) so that an
/// oversized line is discarded without tearing down the connection: the
/// inner codec already consumes bytes up to the next newline when a line
/// exceeds the limit, so we just need to swallow the resulting error and
/// keep decoding. Malformed JSON and [`RpcMessage`] validation failures are
/// dropped the same way per §6/§7 ("decode" errors are logged and the frame
/// is dropped at the receiver).
pub struct NdjsonCodec {
    lines: LinesCodec,
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        }
    }
}

impl NdjsonCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for NdjsonCodec {
    type Item = RpcMessage;
    type Error = NdjsonCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping oversized line; resynchronizing");
                    continue;
                }
            };

            match serde_json::from_str::<RpcMessage>(&line) {
                Ok(message) => match message.validate() {
                    Ok(_) => return Ok(Some(message)),
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping invalid RpcMessage");
                        continue;
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unparseable line");
                    continue;
                }
            }
        }
    }
}

impl Encoder<&RpcMessage> for NdjsonCodec {
    type Error = NdjsonCodecError;

    fn encode(&mut self, item: &RpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());
        self.lines
            .encode(json, dst)
            .map_err(|err| NdjsonCodecError::Io(std::io::Error::other(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_a_message() {
        let mut codec = NdjsonCodec::new();
        let msg = RpcMessage::request("echo", "r1", None, Some(serde_json::json!("hi")), None);
        let mut buf = BytesMut::new();
        codec.encode(&msg, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn drops_oversized_line_and_resyncs() {
        let mut codec = NdjsonCodec::new();
        let mut buf = BytesMut::new();
        let huge = "x".repeat(MAX_LINE_BYTES + 10);
        buf.extend_from_slice(huge.as_bytes());
        buf.extend_from_slice(b"\n");
        let good = RpcMessage::request("echo", "r2", None, None, None);
        buf.extend_from_slice(serde_json::to_string(&good).unwrap().as_bytes());
        buf.extend_from_slice(b"\n");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, good);
    }

    #[test]
    fn drops_malformed_json_and_resyncs() {
        let mut codec = NdjsonCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"not json at all\n");
        let good = RpcMessage::request("echo", "r3", None, None, None);
        buf.extend_from_slice(serde_json::to_string(&good).unwrap().as_bytes());
        buf.extend_from_slice(b"\n");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, good);
    }

    #[test]
    fn incomplete_line_waits_for_more_data() {
        let mut codec = NdjsonCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"{\"command\":\"echo\"");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
