//! Машина состояний согласования одного звонка.
//!
//! Движок обрабатывает входные события строго по одному: команда, сообщение
//! сигнализации, результат захвата медиа или событие peer connection.
//! Каждое обрабатывается до конца (включая await) до следующего, поэтому
//! роль, флаг remote description и ссылка на peer connection никогда не
//! меняются двумя обработчиками вперемешку.

use crate::config::EngineConfig;
use crate::error::{Result, SessionError};
use crate::logger::dump_candidate;
use crate::media::{LocalMedia, MediaSource, RemoteMedia, RemoteTrack};
use crate::peer::connection::{
    PeerConnectionFactory, PeerConnectionResource, PeerEvent, PeerEventSink, StampedPeerEvent,
};
use crate::peer::ice::{apply_candidate, apply_pending_candidates, CandidateBuffer, CandidateStats};
use crate::peer::state::{ConnectionPhase, Role};
use crate::peer::types::{ConnectivityState, IceCandidate, SdpKind, SessionDescription};
use crate::session::SessionSnapshot;
use crate::signaling::{SignalEnvelope, SignalMessage, SignalingChannel};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Внешние зависимости одной сессии
#[derive(Clone)]
pub struct SessionDeps {
    pub media_source: Arc<dyn MediaSource>,
    pub peer_factory: Arc<dyn PeerConnectionFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
}

/// Входное событие движка
#[derive(Debug)]
pub enum EngineInput {
    Signal(SignalEnvelope),
    MediaResolved { epoch: u64, result: Result<LocalMedia> },
    Peer(StampedPeerEvent),
}

/// Внутренние события движка: результаты захвата медиа и колбэки peer connection
pub struct EngineInbox {
    media: mpsc::UnboundedReceiver<(u64, Result<LocalMedia>)>,
    peer: mpsc::UnboundedReceiver<StampedPeerEvent>,
}

impl EngineInbox {
    pub async fn recv(&mut self) -> Option<EngineInput> {
        tokio::select! {
            Some((epoch, result)) = self.media.recv() => {
                Some(EngineInput::MediaResolved { epoch, result })
            }
            Some(event) = self.peer.recv() => Some(EngineInput::Peer(event)),
            else => None,
        }
    }

    /// Следующее уже готовое событие без ожидания; None, если входящие пусты.
    ///
    /// Для внешних циклов, которые сами решают, когда обрабатывать события
    /// движка (например, пачкой после каждой команды).
    pub fn try_recv(&mut self) -> Option<EngineInput> {
        if let Ok((epoch, result)) = self.media.try_recv() {
            return Some(EngineInput::MediaResolved { epoch, result });
        }
        self.peer.try_recv().ok().map(EngineInput::Peer)
    }
}

pub struct NegotiationEngine {
    room_id: String,
    config: EngineConfig,
    deps: SessionDeps,
    media_tx: mpsc::UnboundedSender<(u64, Result<LocalMedia>)>,
    peer_tx: mpsc::UnboundedSender<StampedPeerEvent>,

    phase: ConnectionPhase,
    role: Role,
    /// Номер цикла согласования, растёт при каждом создании peer connection
    cycle: u64,
    /// Номер сессии, растёт на begin/end; устаревший захват медиа отбрасывается
    epoch: u64,
    pc: Option<Box<dyn PeerConnectionResource>>,
    local_media: Option<LocalMedia>,
    remote_media: Option<RemoteMedia>,
    remote_description_applied: bool,
    pending: CandidateBuffer,
    offer_on_media_ready: bool,
    audio_enabled: bool,
    video_enabled: bool,
    last_error: Option<SessionError>,
    local_candidates: CandidateStats,
}

impl NegotiationEngine {
    pub fn new(
        room_id: impl Into<String>,
        config: EngineConfig,
        deps: SessionDeps,
    ) -> (Self, EngineInbox) {
        let (media_tx, media) = mpsc::unbounded_channel();
        let (peer_tx, peer) = mpsc::unbounded_channel();
        let engine = Self {
            room_id: room_id.into(),
            config,
            deps,
            media_tx,
            peer_tx,
            phase: ConnectionPhase::Idle,
            role: Role::Unassigned,
            cycle: 0,
            epoch: 0,
            pc: None,
            local_media: None,
            remote_media: None,
            remote_description_applied: false,
            pending: CandidateBuffer::new(),
            offer_on_media_ready: false,
            audio_enabled: true,
            video_enabled: true,
            last_error: None,
            local_candidates: CandidateStats::default(),
        };
        (engine, EngineInbox { media, peer })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        self.remote_media.as_ref()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn remote_description_applied(&self) -> bool {
        self.remote_description_applied
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn has_peer_connection(&self) -> bool {
        self.pc.is_some()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            role: self.role,
            local_media: self.local_media.clone(),
            remote_media: self.remote_media.clone(),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
            last_error: self.last_error.clone(),
        }
    }

    // ========== COMMANDS ==========

    /// Начинает сессию: запрашивает медиа, не блокируя обработку сигнализации
    pub fn begin_session(&mut self) -> Result<()> {
        if self.phase.is_active() {
            return Err(SessionError::InvalidState(self.phase));
        }

        self.epoch += 1;
        self.audio_enabled = true;
        self.video_enabled = true;
        self.last_error = None;
        self.local_candidates = CandidateStats::default();
        self.set_phase(ConnectionPhase::MediaPending);

        let source = self.deps.media_source.clone();
        let constraints = self.config.media;
        let tx = self.media_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = source.acquire(&constraints).await;
            if let Err(mpsc::error::SendError((_, Ok(media)))) = tx.send((epoch, result)) {
                // сессии уже нет, медиа никому не нужно
                media.stop();
            }
        });
        Ok(())
    }

    /// Закрывает сессию из любой фазы. Повторный вызов ничего не делает.
    pub async fn end_session(&mut self) {
        if !self.phase.is_active() {
            debug!(room = %self.room_id, phase = %self.phase, "end_session on inactive session, ignoring");
            return;
        }

        self.epoch += 1;
        self.reset_cycle().await;
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
        self.set_phase(ConnectionPhase::Closed);
        self.send(SignalMessage::LeaveRoom).await;
        info!(room = %self.room_id, "Session ended");
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) -> Result<()> {
        self.ensure_toggleable()?;
        self.audio_enabled = enabled;
        if let Some(media) = &self.local_media {
            media.set_audio_enabled(enabled);
        }
        info!(enabled, "Audio toggled");
        Ok(())
    }

    pub fn set_video_enabled(&mut self, enabled: bool) -> Result<()> {
        self.ensure_toggleable()?;
        self.video_enabled = enabled;
        if let Some(media) = &self.local_media {
            media.set_video_enabled(enabled);
        }
        info!(enabled, "Video toggled");
        Ok(())
    }

    fn ensure_toggleable(&self) -> Result<()> {
        if self.phase.is_active() && self.phase != ConnectionPhase::Failed {
            Ok(())
        } else {
            Err(SessionError::InvalidState(self.phase))
        }
    }

    // ========== INPUTS ==========

    pub async fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Signal(envelope) => self.on_signal(envelope).await,
            EngineInput::MediaResolved { epoch, result } => {
                self.on_media_resolved(epoch, result).await
            }
            EngineInput::Peer(event) => self.on_peer_event(event).await,
        }
    }

    async fn on_signal(&mut self, envelope: SignalEnvelope) {
        if envelope.room_id != self.room_id {
            debug!(room = %envelope.room_id, "Ignoring signal addressed to another room");
            return;
        }

        let name = envelope.message.name();
        debug!(signal = name, id = %envelope.id, phase = %self.phase, "Signal received");
        if !self.phase.is_active() || self.phase == ConnectionPhase::Failed {
            self.reject(format!("{name} received in phase {}", self.phase));
            return;
        }

        match envelope.message {
            SignalMessage::PeerPresent => self.on_peer_present().await,
            SignalMessage::Offer { offer } => self.on_offer(offer).await,
            SignalMessage::Answer { answer } => self.on_answer(answer).await,
            SignalMessage::IceCandidate { candidate } => self.on_remote_candidate(candidate).await,
            SignalMessage::PeerLeft => self.on_peer_left().await,
            SignalMessage::Ready | SignalMessage::LeaveRoom => {
                self.reject(format!("{name} is not an inbound event"))
            }
        }
    }

    async fn on_peer_present(&mut self) {
        if self.role.is_assigned() || self.pc.is_some() || self.offer_on_media_ready {
            self.reject("peer-present during an active negotiation cycle".into());
            return;
        }

        match self.phase {
            ConnectionPhase::MediaPending => {
                info!("Peer present before local media is ready, offer deferred");
                self.offer_on_media_ready = true;
            }
            ConnectionPhase::MediaReady => self.start_as_initiator().await,
            phase => self.reject(format!("peer-present in phase {phase}")),
        }
    }

    /// Сторона, уже находившаяся в комнате, создаёт offer
    async fn start_as_initiator(&mut self) {
        if let Err(e) = self.role.assign(Role::Initiator) {
            self.reject(e.to_string());
            return;
        }
        info!(room = %self.room_id, "Peer joined, creating offer");

        if let Err(e) = self.create_peer().await {
            self.fail(e).await;
            return;
        }
        self.set_phase(ConnectionPhase::Negotiating);

        let result = match self.pc.as_deref() {
            Some(pc) => make_offer(pc).await,
            None => return,
        };
        match result {
            Ok(offer) => {
                self.send(SignalMessage::Offer { offer }).await;
                info!("Offer sent");
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription) {
        match self.role {
            Role::Initiator => {
                self.reject("offer received while acting as initiator".into());
                return;
            }
            Role::Responder => {
                self.reject("duplicate offer in the current negotiation cycle".into());
                return;
            }
            Role::Unassigned => {}
        }
        if offer.kind != SdpKind::Offer {
            self.reject("offer event carries a non-offer description".into());
            return;
        }
        let restore = self.phase;
        if !matches!(
            restore,
            ConnectionPhase::MediaPending | ConnectionPhase::MediaReady
        ) {
            self.reject(format!("offer in phase {restore}"));
            return;
        }

        // offer пришёл раньше, чем мы успели стать инициатором
        self.offer_on_media_ready = false;
        if let Err(e) = self.role.assign(Role::Responder) {
            self.reject(e.to_string());
            return;
        }
        info!(room = %self.room_id, "Received offer, answering");

        if let Err(e) = self.create_peer().await {
            self.fail(e).await;
            return;
        }
        self.set_phase(ConnectionPhase::Negotiating);

        let applied = match self.pc.as_deref() {
            Some(pc) => pc.set_remote_description(offer).await,
            None => return,
        };
        if let Err(e) = applied {
            self.reject(format!("cannot apply remote offer: {e}"));
            self.release_peer().await;
            self.set_phase(restore);
            return;
        }
        self.mark_remote_applied().await;

        let result = match self.pc.as_deref() {
            Some(pc) => make_answer(pc).await,
            None => return,
        };
        match result {
            Ok(answer) => {
                self.send(SignalMessage::Answer { answer }).await;
                info!("Answer sent");
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        if self.role != Role::Initiator {
            self.reject("answer received without a pending offer".into());
            return;
        }
        if self.remote_description_applied {
            self.reject("duplicate answer in the current negotiation cycle".into());
            return;
        }
        if answer.kind != SdpKind::Answer {
            self.reject("answer event carries a non-answer description".into());
            return;
        }

        let result = match self.pc.as_deref() {
            Some(pc) => pc.set_remote_description(answer).await,
            None => {
                self.reject("answer received without a peer connection".into());
                return;
            }
        };
        match result {
            Ok(()) => {
                info!("Remote answer applied");
                self.mark_remote_applied().await;
            }
            Err(e) => self.reject(format!("cannot apply remote answer: {e}")),
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        dump_candidate("REMOTE", &candidate);

        if self.remote_description_applied {
            if let Some(pc) = self.pc.as_deref() {
                // ошибка уже залогирована, кандидат пропускаем
                let _ = apply_candidate(pc, candidate).await;
                return;
            }
        }

        self.pending.push(candidate);
        debug!(
            pending = self.pending.len(),
            "Remote description not set yet, queuing candidate"
        );
    }

    async fn on_peer_left(&mut self) {
        info!(room = %self.room_id, "Peer left");
        self.reset_cycle().await;

        if matches!(
            self.phase,
            ConnectionPhase::Negotiating | ConnectionPhase::Connected
        ) {
            let next = if self.local_media.is_some() {
                ConnectionPhase::MediaReady
            } else {
                ConnectionPhase::MediaPending
            };
            self.set_phase(next);
        }
    }

    async fn on_media_resolved(&mut self, epoch: u64, result: Result<LocalMedia>) {
        if epoch != self.epoch || !self.phase.is_active() || self.phase == ConnectionPhase::Failed
        {
            if let Ok(media) = result {
                media.stop();
            }
            debug!(epoch, current = self.epoch, "Discarding media from a finished session");
            return;
        }

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                let err = match e {
                    SessionError::MediaAccess(_) => e,
                    other => SessionError::MediaAccess(other.to_string()),
                };
                self.fail(err).await;
                return;
            }
        };

        media.set_audio_enabled(self.audio_enabled);
        media.set_video_enabled(self.video_enabled);
        info!(tracks = media.tracks().len(), "Got local media");

        if let Some(pc) = self.pc.as_deref() {
            // peer connection уже создан входящим offer, answer повторно не шлём
            let attached = attach_tracks(pc, &media).await;
            info!(attached, "Peer connection exists, added local media now");
        }
        self.local_media = Some(media);

        if self.phase == ConnectionPhase::MediaPending {
            self.set_phase(ConnectionPhase::MediaReady);
            self.send(SignalMessage::Ready).await;

            if self.offer_on_media_ready {
                self.offer_on_media_ready = false;
                self.start_as_initiator().await;
            }
        }
    }

    async fn on_peer_event(&mut self, stamped: StampedPeerEvent) {
        if stamped.cycle != self.cycle || self.pc.is_none() {
            debug!(
                cycle = stamped.cycle,
                current = self.cycle,
                "Dropping event from a previous peer connection"
            );
            return;
        }

        match stamped.event {
            PeerEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                self.local_candidates.record(&candidate);
                self.send(SignalMessage::IceCandidate { candidate }).await;
            }
            PeerEvent::RemoteTrack { stream_id, track } => self.on_remote_track(stream_id, track),
            PeerEvent::Connectivity(state) => self.on_connectivity(state).await,
        }
    }

    fn on_remote_track(&mut self, stream_id: String, track: RemoteTrack) {
        info!(stream = %stream_id, track = %track.id, kind = %track.kind, "Received remote track");
        let same_stream = self
            .remote_media
            .as_ref()
            .is_some_and(|remote| remote.stream_id == stream_id);
        if !same_stream {
            self.remote_media = Some(RemoteMedia::new(stream_id));
        }
        if let Some(remote) = self.remote_media.as_mut() {
            remote.add_track(track);
        }
    }

    async fn on_connectivity(&mut self, state: ConnectivityState) {
        debug!(?state, phase = %self.phase, "Peer connection state changed");
        match state {
            ConnectivityState::Connected => {
                if self.phase == ConnectionPhase::Negotiating {
                    self.set_phase(ConnectionPhase::Connected);
                    info!(role = ?self.role, "Peer connection established");
                    self.local_candidates.log_summary();
                }
            }
            ConnectivityState::Failed => self.fail(SessionError::ConnectivityFailed).await,
            ConnectivityState::Disconnected => {
                warn!("Peer connection disconnected, waiting for recovery or failure")
            }
            ConnectivityState::New
            | ConnectivityState::Connecting
            | ConnectivityState::Closed => {}
        }
    }

    // ========== HELPERS ==========

    /// Создаёт peer connection нового цикла и сразу цепляет готовые треки
    async fn create_peer(&mut self) -> Result<()> {
        if self.pc.is_some() {
            return Err(SessionError::PeerConnection(
                "peer connection already exists for this session".into(),
            ));
        }

        self.cycle += 1;
        let sink = PeerEventSink::new(self.cycle, self.peer_tx.clone());
        let pc = self.deps.peer_factory.create(&self.config.ice, sink).await?;
        debug!(cycle = self.cycle, "Peer connection created");

        match &self.local_media {
            Some(media) => {
                attach_tracks(pc.as_ref(), media).await;
            }
            None => warn!("Local media not available when setting up peer connection"),
        }
        self.pc = Some(pc);
        Ok(())
    }

    /// remote description применён: сразу сбрасываем буфер кандидатов
    async fn mark_remote_applied(&mut self) {
        self.remote_description_applied = true;
        if let Some(pc) = self.pc.as_deref() {
            apply_pending_candidates(pc, &mut self.pending).await;
        }
    }

    /// Закрывает peer connection и сбрасывает роль; буфер не трогает
    async fn release_peer(&mut self) {
        if let Some(pc) = self.pc.take() {
            if let Some(media) = &self.local_media {
                media.detach().await;
            }
            if let Err(e) = pc.close().await {
                warn!(error = %e, "Failed to close peer connection");
            }
        }
        self.role.reset();
        self.remote_description_applied = false;
    }

    /// Полный сброс цикла согласования
    async fn reset_cycle(&mut self) {
        self.release_peer().await;
        self.pending.clear();
        self.offer_on_media_ready = false;
        self.remote_media = None;
    }

    /// Фатальная ошибка: освобождаем ресурсы и остаёмся в `Failed` до end_session
    async fn fail(&mut self, err: SessionError) {
        error!(room = %self.room_id, phase = %self.phase, error = %err, "Session failed");
        self.epoch += 1;
        self.reset_cycle().await;
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
        self.set_phase(ConnectionPhase::Failed);
        self.last_error = Some(err);
    }

    fn reject(&self, reason: String) {
        let err = SessionError::SignalingRejected(reason);
        warn!(room = %self.room_id, phase = %self.phase, error = %err, "Dropping signaling message");
    }

    fn set_phase(&mut self, next: ConnectionPhase) {
        if self.phase != next {
            debug!(from = %self.phase, to = %next, "Phase change");
            self.phase = next;
        }
    }

    async fn send(&self, message: SignalMessage) {
        let name = message.name();
        let envelope = SignalEnvelope::new(self.room_id.clone(), message);
        match self.deps.signaling.send(envelope).await {
            Ok(()) => debug!(signal = name, "Signal sent"),
            Err(e) => warn!(signal = name, error = %e, "Failed to send signal"),
        }
    }
}

async fn make_offer(pc: &dyn PeerConnectionResource) -> Result<SessionDescription> {
    let offer = pc.create_offer().await?;
    pc.set_local_description(offer.clone()).await?;
    Ok(offer)
}

async fn make_answer(pc: &dyn PeerConnectionResource) -> Result<SessionDescription> {
    let answer = pc.create_answer().await?;
    pc.set_local_description(answer.clone()).await?;
    Ok(answer)
}

/// Добавляет все локальные треки; возвращает число добавленных
async fn attach_tracks(pc: &dyn PeerConnectionResource, media: &LocalMedia) -> usize {
    let mut attached = 0;
    for track in media.tracks() {
        match pc.add_track(track.clone(), media.id()).await {
            Ok(()) => attached += 1,
            Err(e) => warn!(track = track.id(), error = %e, "Failed to add local track"),
        }
    }
    attached
}
