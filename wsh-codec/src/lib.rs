//! Frame codecs for the two transports the fabric runs over: newline
//! delimited JSON on pipes/sockets ([`line`]) and OSC-wrapped JSON
//! multiplexed into a PTY's byte stream ([`osc`]).

pub mod line;
pub mod osc;

pub use line::MAX_LINE_BYTES;
pub use line::NdjsonCodec;
pub use line::NdjsonCodecError;
pub use osc::CLIENT_OSC_NUM;
pub use osc::DemuxEvent;
pub use osc::OscDemuxer;
pub use osc::OscDirection;
pub use osc::SERVER_OSC_NUM;
pub use osc::encode_osc;
