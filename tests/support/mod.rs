#![allow(dead_code)]

use async_trait::async_trait;
use pairlink::config::IceConfig;
use pairlink::{
    ChannelSignaling, ConnectivityState, EngineConfig, IceCandidate, LocalMedia, LocalTrack,
    MediaConstraints, MediaSource, PeerConnectionFactory, PeerConnectionResource, PeerEvent,
    PeerEventSink, RemoteTrack, SdpKind, Session, SessionDeps, SessionDescription,
    SessionError, SignalEnvelope, SignalMessage, TrackKind,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ROOM: &str = "123456";

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"
    ))
}

// ========== MEDIA ==========

pub struct FakeMediaSource {
    label: String,
    delay: Duration,
    failure: Option<String>,
    acquired: Mutex<Vec<LocalMedia>>,
}

impl FakeMediaSource {
    pub fn new(label: &str) -> Arc<Self> {
        Self::with_delay(label, Duration::ZERO)
    }

    pub fn with_delay(label: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            delay,
            failure: None,
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(label: &str, reason: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            delay: Duration::ZERO,
            failure: Some(reason.into()),
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub fn stream_id(&self) -> String {
        format!("{}-stream", self.label)
    }

    pub fn acquired(&self) -> Vec<LocalMedia> {
        self.acquired.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> pairlink::Result<LocalMedia> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(SessionError::MediaAccess(reason.clone()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(format!("{}-mic", self.label), TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(format!("{}-cam", self.label), TrackKind::Video));
        }
        let media = LocalMedia::new(self.stream_id(), tracks);
        self.acquired.lock().unwrap().push(media.clone());
        Ok(media)
    }
}

// ========== PEER CONNECTION ==========

#[derive(Default)]
struct PeerState {
    log: Vec<String>,
    stream_id: Option<String>,
    tracks: Vec<(TrackKind, String)>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    closes: usize,
    announced: bool,
    gathered: u32,
}

/// Peer connection в памяти.
///
/// SDP имеет вид `fake-offer stream=<id> tracks=audio:<id>,video:<id>`; когда
/// заданы обе стороны, peer отдаёт треки из удалённого SDP и `Connected`.
pub struct FakePeer {
    label: String,
    auto_connect: bool,
    sink: PeerEventSink,
    state: Mutex<PeerState>,
}

impl FakePeer {
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("candidate:").map(str::to_owned))
            .collect()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tracks
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn cycle(&self) -> u64 {
        self.sink.cycle()
    }

    /// Событие от имени этого peer connection
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.sink.emit(event)
    }

    fn describe(&self, kind: SdpKind, state: &PeerState) -> String {
        let tracks: Vec<String> = state
            .tracks
            .iter()
            .map(|(kind, id)| format!("{kind}:{id}"))
            .collect();
        format!(
            "fake-{} stream={} tracks={}",
            kind_name(kind),
            state.stream_id.as_deref().unwrap_or("none"),
            tracks.join(",")
        )
    }

    fn maybe_connect(&self, state: &mut PeerState) {
        if !self.auto_connect || state.announced {
            return;
        }
        let Some(remote) = state.remote.as_ref() else {
            return;
        };
        if state.local.is_none() {
            return;
        }
        state.announced = true;

        let (stream_id, tracks) = parse_sdp(&remote.sdp);
        if let Some(stream_id) = stream_id {
            for track in tracks {
                self.sink.emit(PeerEvent::RemoteTrack {
                    stream_id: stream_id.clone(),
                    track,
                });
            }
        }
        self.sink
            .emit(PeerEvent::Connectivity(ConnectivityState::Connected));
    }
}

fn kind_name(kind: SdpKind) -> &'static str {
    match kind {
        SdpKind::Offer => "offer",
        SdpKind::Answer => "answer",
    }
}

fn parse_sdp(sdp: &str) -> (Option<String>, Vec<RemoteTrack>) {
    let mut stream_id = None;
    let mut tracks = Vec::new();
    for part in sdp.split_whitespace() {
        if let Some(stream) = part.strip_prefix("stream=") {
            if stream != "none" {
                stream_id = Some(stream.to_owned());
            }
        } else if let Some(list) = part.strip_prefix("tracks=") {
            for item in list.split(',').filter(|item| !item.is_empty()) {
                if let Some((kind, id)) = item.split_once(':') {
                    let kind = if kind == "audio" {
                        TrackKind::Audio
                    } else {
                        TrackKind::Video
                    };
                    tracks.push(RemoteTrack::new(id, kind));
                }
            }
        }
    }
    (stream_id, tracks)
}

struct FakePeerHandle(Arc<FakePeer>);

#[async_trait]
impl PeerConnectionResource for FakePeerHandle {
    async fn add_track(&self, track: Arc<LocalTrack>, stream_id: &str) -> pairlink::Result<()> {
        let mut state = self.0.state.lock().unwrap();
        state.log.push(format!("add_track:{}", track.id()));
        state.stream_id = Some(stream_id.to_owned());
        state.tracks.push((track.kind(), track.id().to_owned()));
        Ok(())
    }

    async fn create_offer(&self) -> pairlink::Result<SessionDescription> {
        let mut state = self.0.state.lock().unwrap();
        state.log.push("create_offer".into());
        Ok(SessionDescription::offer(
            self.0.describe(SdpKind::Offer, &state),
        ))
    }

    async fn create_answer(&self) -> pairlink::Result<SessionDescription> {
        let mut state = self.0.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(SessionError::PeerConnection(
                "create_answer without remote offer".into(),
            ));
        }
        state.log.push("create_answer".into());
        Ok(SessionDescription::answer(
            self.0.describe(SdpKind::Answer, &state),
        ))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> pairlink::Result<()> {
        let mut state = self.0.state.lock().unwrap();
        state.log.push(format!("set_local:{}", kind_name(desc.kind)));
        state.local = Some(desc);

        state.gathered += 1;
        let n = state.gathered;
        self.0.sink.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
            "candidate:{n} 1 udp 2122260223 192.168.1.{n} 6000{n} typ host ufrag {}",
            self.0.label
        ))));
        self.0.maybe_connect(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> pairlink::Result<()> {
        let mut state = self.0.state.lock().unwrap();
        if desc.sdp.contains("garbage") {
            return Err(SessionError::PeerConnection("cannot parse remote SDP".into()));
        }
        state.log.push(format!("set_remote:{}", kind_name(desc.kind)));
        state.remote = Some(desc);
        self.0.maybe_connect(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> pairlink::Result<()> {
        let mut state = self.0.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(SessionError::CandidateApply(
                "remote description not set".into(),
            ));
        }
        if candidate.candidate.contains("malformed") {
            return Err(SessionError::CandidateApply("unparsable candidate".into()));
        }
        state.log.push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> pairlink::Result<()> {
        let mut state = self.0.state.lock().unwrap();
        state.closes += 1;
        state.log.push("close".into());
        Ok(())
    }
}

pub struct FakePeerFactory {
    label: String,
    auto_connect: bool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    /// Соединения сами доходят до `Connected` после offer/answer
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            auto_connect: true,
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Состояние соединения задаёт только тест
    pub fn manual(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            auto_connect: false,
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers.lock().unwrap().last().cloned().unwrap()
    }

    pub fn total_closes(&self) -> usize {
        self.peers.lock().unwrap().iter().map(|p| p.closes()).sum()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice: &IceConfig,
        events: PeerEventSink,
    ) -> pairlink::Result<Box<dyn PeerConnectionResource>> {
        let peer = Arc::new(FakePeer {
            label: self.label.clone(),
            auto_connect: self.auto_connect,
            sink: events,
            state: Mutex::new(PeerState::default()),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(Box::new(FakePeerHandle(peer)))
    }
}

pub fn deps(
    media: &Arc<FakeMediaSource>,
    peers: &Arc<FakePeerFactory>,
    signaling: ChannelSignaling,
) -> SessionDeps {
    SessionDeps {
        media_source: media.clone(),
        peer_factory: peers.clone(),
        signaling: Arc::new(signaling),
    }
}

// ========== ROOM ==========

#[derive(Default)]
struct RoomState {
    ready: [bool; 2],
    log: Vec<(usize, SignalMessage)>,
}

/// Сигнальный сервер комнаты на двоих.
///
/// `ready` от второго участника превращается в `peer-joined` для первого,
/// `leave-room` в `peer-left` для оставшегося, остальное пересылается как есть.
#[derive(Clone)]
pub struct RoomRelay {
    state: Arc<Mutex<RoomState>>,
}

impl RoomRelay {
    /// Сколько событий `name` отправил участник `from`
    pub fn count(&self, from: usize, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(side, message)| *side == from && message.name() == name)
            .count()
    }

    pub fn total(&self, name: &str) -> usize {
        self.count(0, name) + self.count(1, name)
    }
}

async fn forward(
    me: usize,
    mut outgoing: mpsc::UnboundedReceiver<SignalEnvelope>,
    other: mpsc::UnboundedSender<SignalEnvelope>,
    state: Arc<Mutex<RoomState>>,
) {
    while let Some(envelope) = outgoing.recv().await {
        let mut room = state.lock().unwrap();
        room.log.push((me, envelope.message.clone()));
        match envelope.message {
            SignalMessage::Ready => {
                room.ready[me] = true;
                if room.ready[1 - me] {
                    let _ = other.send(SignalEnvelope::new(
                        envelope.room_id,
                        SignalMessage::PeerPresent,
                    ));
                }
            }
            SignalMessage::LeaveRoom => {
                room.ready[me] = false;
                let _ = other.send(SignalEnvelope::new(
                    envelope.room_id,
                    SignalMessage::PeerLeft,
                ));
            }
            _ => {
                let _ = other.send(envelope);
            }
        }
    }
}

pub struct Participant {
    pub session: Session,
    pub media: Arc<FakeMediaSource>,
    pub peers: Arc<FakePeerFactory>,
}

/// Два участника одной комнаты, соединённые через `RoomRelay`
pub fn call_pair(media_delay: Duration) -> (Participant, Participant, RoomRelay) {
    let state = Arc::new(Mutex::new(RoomState::default()));
    let (a_signaling, a_out) = ChannelSignaling::pair();
    let (b_signaling, b_out) = ChannelSignaling::pair();
    let (a_in_tx, a_in) = mpsc::unbounded_channel();
    let (b_in_tx, b_in) = mpsc::unbounded_channel();

    tokio::spawn(forward(0, a_out, b_in_tx, state.clone()));
    tokio::spawn(forward(1, b_out, a_in_tx, state.clone()));

    let a = participant("alice", media_delay, a_signaling, a_in);
    let b = participant("bob", media_delay, b_signaling, b_in);
    (a, b, RoomRelay { state })
}

fn participant(
    label: &str,
    media_delay: Duration,
    signaling: ChannelSignaling,
    inbound: mpsc::UnboundedReceiver<SignalEnvelope>,
) -> Participant {
    let media = FakeMediaSource::with_delay(label, media_delay);
    let peers = FakePeerFactory::new(label);
    let session = Session::spawn(
        ROOM,
        EngineConfig::default(),
        deps(&media, &peers, signaling),
        inbound,
    )
    .unwrap();
    Participant {
        session,
        media,
        peers,
    }
}
