//! The streaming relay: one session per request, from upstream call to `[DONE]`.

pub mod heartbeat;
pub mod records;
pub mod session;
pub mod signal;
pub mod upstream;
pub mod validate;
pub mod writer;

pub use heartbeat::Heartbeat;
pub use records::{decode_record, Record, RecordReader};
pub use session::{RelayOutcome, Session, SessionContext};
pub use signal::SessionSignal;
pub use upstream::{ByteStream, Forwarder, HttpForwarder, ReadPolicy, UpstreamStream};
pub use validate::{decode_request, resolve_model};
pub use writer::{EventWriter, Frame, DONE_MARKER, HEARTBEAT_MARKER};
