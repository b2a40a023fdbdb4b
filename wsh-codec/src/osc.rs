use bytes::Bytes;
use bytes::BytesMut;
use wsh_protocol::RpcMessage;

/// Client-to-server OSC number (`ESC ']' '23198' ';' body BEL`).
pub const CLIENT_OSC_NUM: &str = "23198";

/// Server-to-client OSC number (`ESC ']' '23199' ';' body BEL`).
pub const SERVER_OSC_NUM: &str = "23199";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscDirection {
    ClientToServer,
    ServerToClient,
}

impl OscDirection {
    pub fn osc_num(self) -> &'static str {
        match self {
            OscDirection::ClientToServer => CLIENT_OSC_NUM,
            OscDirection::ServerToClient => SERVER_OSC_NUM,
        }
    }
}

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const ST_FINAL: u8 = b'\\'; // second byte of the `ESC \` string terminator

/// Escape control bytes (`0x00-0x1F`, `0x7F`) as `\uXXXX` so none of them can
/// be mistaken for the `ESC`/`BEL` framing delimiters. `serde_json` already
/// escapes everything below `0x20`; the only byte this ever actually
/// rewrites in practice is `0x7F`, which JSON does not require escaping.
fn escape_control_bytes(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for &b in body {
        if b <= 0x1F || b == 0x7F {
            out.extend_from_slice(format!("\\u{b:04x}").as_bytes());
        } else {
            out.push(b);
        }
    }
    out
}

fn unescape_control_bytes(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\\'
            && body.get(i + 1) == Some(&b'u')
            && body.len() >= i + 6
            && let Ok(hex) = std::str::from_utf8(&body[i + 2..i + 6])
            && let Ok(code) = u32::from_str_radix(hex, 16)
            && code <= 0xFF
        {
            out.push(code as u8);
            i += 6;
            continue;
        }
        out.push(body[i]);
        i += 1;
    }
    out
}

/// Encode one [`RpcMessage`] as a single OSC frame.
pub fn encode_osc(message: &RpcMessage, direction: OscDirection) -> Bytes {
    let json = serde_json::to_vec(message).unwrap_or_else(|_| b"{}".to_vec());
    let escaped = escape_control_bytes(&json);

    let mut out = BytesMut::with_capacity(escaped.len() + 16);
    out.extend_from_slice(&[ESC, b']']);
    out.extend_from_slice(direction.osc_num().as_bytes());
    out.extend_from_slice(b";");
    out.extend_from_slice(&escaped);
    out.extend_from_slice(&[BEL]);
    out.freeze()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// A byte that is not part of a recognized OSC frame; forward unchanged
    /// to the user-visible terminal stream.
    PassThrough(u8),
    /// A complete OSC frame body (JSON, already unescaped).
    Frame(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Esc,
    /// Matching the fixed 5-digit OSC number plus the trailing `;`.
    MatchingHeader { matched: usize },
    Body,
    /// Saw `ESC` while inside `Body`; waiting to see if it's a string
    /// terminator (`ESC \`) or an unrelated escape that should abort us.
    BodyEsc,
}

/// Stateful demuxer that separates Wave OSC frames from the rest of a PTY
/// byte stream (§4.1.2). One instance tracks one direction's expected OSC
/// number; bytes belonging to unrelated escape sequences fall through
/// unchanged as [`DemuxEvent::PassThrough`].
pub struct OscDemuxer {
    expected_num: &'static str,
    state: State,
    pending: Vec<u8>,
    body: Vec<u8>,
}

impl OscDemuxer {
    pub fn new(direction: OscDirection) -> Self {
        Self {
            expected_num: direction.osc_num(),
            state: State::Normal,
            pending: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Feed one byte, get back zero or more events.
    pub fn push(&mut self, byte: u8) -> Vec<DemuxEvent> {
        match self.state {
            State::Normal => self.push_normal(byte),
            State::Esc => self.push_esc(byte),
            State::MatchingHeader { matched } => self.push_header(byte, matched),
            State::Body => self.push_body(byte),
            State::BodyEsc => self.push_body_esc(byte),
        }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<DemuxEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            events.extend(self.push(b));
        }
        events
    }

    fn push_normal(&mut self, byte: u8) -> Vec<DemuxEvent> {
        if byte == ESC {
            self.state = State::Esc;
            self.pending.clear();
            self.pending.push(byte);
            Vec::new()
        } else {
            vec![DemuxEvent::PassThrough(byte)]
        }
    }

    fn push_esc(&mut self, byte: u8) -> Vec<DemuxEvent> {
        if byte == b']' {
            self.pending.push(byte);
            self.state = State::MatchingHeader { matched: 0 };
            Vec::new()
        } else {
            self.abort_to_passthrough(byte)
        }
    }

    fn push_header(&mut self, byte: u8, matched: usize) -> Vec<DemuxEvent> {
        let header = self.expected_num.as_bytes();
        if matched < header.len() {
            if byte == header[matched] {
                self.pending.push(byte);
                self.state = State::MatchingHeader {
                    matched: matched + 1,
                };
                Vec::new()
            } else {
                self.abort_to_passthrough(byte)
            }
        } else if byte == b';' {
            self.pending.push(byte);
            self.body.clear();
            self.state = State::Body;
            Vec::new()
        } else {
            self.abort_to_passthrough(byte)
        }
    }

    fn push_body(&mut self, byte: u8) -> Vec<DemuxEvent> {
        if byte == BEL {
            let frame = unescape_control_bytes(&self.body);
            self.body.clear();
            self.pending.clear();
            self.state = State::Normal;
            vec![DemuxEvent::Frame(frame)]
        } else if byte == ESC {
            self.state = State::BodyEsc;
            Vec::new()
        } else {
            self.body.push(byte);
            Vec::new()
        }
    }

    fn push_body_esc(&mut self, byte: u8) -> Vec<DemuxEvent> {
        if byte == ST_FINAL {
            let frame = unescape_control_bytes(&self.body);
            self.body.clear();
            self.pending.clear();
            self.state = State::Normal;
            vec![DemuxEvent::Frame(frame)]
        } else {
            // An unrelated ESC mid-body: abort the partial frame and flush
            // everything accumulated so far to the visible stream, then
            // reprocess `byte` from Normal.
            let mut events: Vec<DemuxEvent> = self
                .pending
                .drain(..)
                .chain(self.body.drain(..))
                .map(DemuxEvent::PassThrough)
                .collect();
            events.push(DemuxEvent::PassThrough(ESC));
            self.body.clear();
            self.state = State::Normal;
            events.extend(self.push(byte));
            events
        }
    }

    /// The accumulated prefix did not match our OSC header; flush it to the
    /// visible stream and reprocess `byte` from `Normal`.
    fn abort_to_passthrough(&mut self, byte: u8) -> Vec<DemuxEvent> {
        let mut events: Vec<DemuxEvent> = self
            .pending
            .drain(..)
            .map(DemuxEvent::PassThrough)
            .collect();
        self.state = State::Normal;
        events.extend(self.push(byte));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_a_frame() {
        let msg = RpcMessage::request("echo", "r1", None, Some(serde_json::json!("hi")), None);
        let encoded = encode_osc(&msg, OscDirection::ServerToClient);

        let mut demux = OscDemuxer::new(OscDirection::ServerToClient);
        let events = demux.push_bytes(&encoded);
        let frames: Vec<_> = events
            .into_iter()
            .filter_map(|e| match e {
                DemuxEvent::Frame(b) => Some(b),
                DemuxEvent::PassThrough(_) => None,
            })
            .collect();
        assert_eq!(frames.len(), 1);
        let decoded: RpcMessage = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unrelated_escape_sequence_passes_through() {
        let mut demux = OscDemuxer::new(OscDirection::ServerToClient);
        // A cursor-movement sequence: ESC [ 2 J
        let input = [ESC, b'[', b'2', b'J'];
        let events = demux.push_bytes(&input);
        let bytes: Vec<u8> = events
            .into_iter()
            .map(|e| match e {
                DemuxEvent::PassThrough(b) => b,
                DemuxEvent::Frame(_) => panic!("unexpected frame"),
            })
            .collect();
        assert_eq!(bytes, input);
    }

    #[test]
    fn wrong_osc_number_passes_through() {
        let msg = RpcMessage::fire_and_forget("echo", None, None);
        // Encoded for the client, but demuxer expects server->client.
        let encoded = encode_osc(&msg, OscDirection::ClientToServer);
        let mut demux = OscDemuxer::new(OscDirection::ServerToClient);
        let events = demux.push_bytes(&encoded);
        assert!(
            events
                .iter()
                .all(|e| matches!(e, DemuxEvent::PassThrough(_)))
        );
    }

    #[test]
    fn mid_sequence_escape_flushes_partial_bytes() {
        let mut demux = OscDemuxer::new(OscDirection::ServerToClient);
        let mut input = vec![ESC, b']'];
        input.extend_from_slice(SERVER_OSC_NUM.as_bytes());
        input.push(b';');
        input.extend_from_slice(b"partial");
        input.push(ESC); // abort: not a valid ST, not BEL
        input.push(b'X');

        let events = demux.push_bytes(&input);
        assert!(events.contains(&DemuxEvent::PassThrough(b'X')));
        assert!(!events.iter().any(|e| matches!(e, DemuxEvent::Frame(_))));
    }
}
