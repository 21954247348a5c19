pub mod connection;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::{
    PeerConnectionFactory, PeerConnectionResource, PeerEvent, PeerEventSink, StampedPeerEvent,
};
pub use ice::{CandidateBuffer, CandidateStats, CandidateType};
pub use negotiation::{EngineInbox, EngineInput, NegotiationEngine, SessionDeps};
pub use state::{ConnectionPhase, Role};
pub use types::{
    ConnectivityState, IceCandidate, SdpKind, ServerConfig, SessionDescription, TrackKind,
};
