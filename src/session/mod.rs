mod error;
mod events;
mod history;
mod manager;
pub mod peer;
pub mod transport;

pub use error::SessionError;
pub use events::{Event, EventParseError};
pub use history::EventHistory;
pub use manager::{Diagnostic, EventStream, SessionManager, SessionState};
pub use peer::WebRtcTransportFactory;
pub use transport::{
    ChannelSignal, EventChannel, PeerTransport, SignalSender, TransportFactory,
    EVENT_CHANNEL_LABEL,
};
