pub mod connection;
pub mod data_channel;
pub mod events;
pub mod ice;
pub mod types;

pub use connection::{PeerConnection, PeerConnector, RtcConnector};
pub use events::{PeerEvent, PeerEventKind, PeerEventSink};
pub use ice::{summarize_candidates, CandidateBuffer, CandidateSummary};
pub use types::{IceCandidate, IceServerKind, PeerState, SdpKind, ServerConfig};
