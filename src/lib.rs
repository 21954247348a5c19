//! Negotiation engine for a single two-party audio/video call.
//!
//! Two participants meet in a room; the side already present receives
//! `peer-joined` and sends the offer, the joining side answers. Remote ICE
//! candidates that arrive before the remote description are buffered and
//! applied in arrival order right after it.

pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;
pub mod webrtc_peer;

pub use config::{EngineConfig, IceConfig};
pub use error::{Result, SessionError};
pub use media::{LocalMedia, LocalTrack, MediaConstraints, MediaSource, RemoteMedia, RemoteTrack};
pub use peer::{
    CandidateBuffer, ConnectionPhase, ConnectivityState, IceCandidate, NegotiationEngine,
    PeerConnectionFactory, PeerConnectionResource, PeerEvent, PeerEventSink, Role, SdpKind,
    ServerConfig, SessionDeps, SessionDescription, TrackKind,
};
pub use session::{Session, SessionSnapshot};
pub use signaling::{ChannelSignaling, SignalEnvelope, SignalMessage, SignalingChannel};
pub use webrtc_peer::WebRtcPeerFactory;
