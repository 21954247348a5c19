use crate::config::IceConfig;
use crate::error::Result;
use crate::media::{LocalTrack, RemoteTrack};
use crate::peer::types::{ConnectivityState, IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// События, которые peer connection отдаёт наружу вместо колбэков
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Собран локальный кандидат, его нужно отправить собеседнику
    LocalCandidate(IceCandidate),
    /// Пришёл трек собеседника
    RemoteTrack { stream_id: String, track: RemoteTrack },
    /// Изменилось агрегированное состояние соединения
    Connectivity(ConnectivityState),
}

/// Событие с номером цикла согласования, в котором был создан peer connection
#[derive(Debug, Clone, PartialEq)]
pub struct StampedPeerEvent {
    pub cycle: u64,
    pub event: PeerEvent,
}

/// Получатель событий одного peer connection.
///
/// Каждый peer connection получает свой sink с номером цикла; после
/// разрыва движок переходит к следующему циклу, и всё, что приходит от
/// старого соединения, отбрасывается целиком.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    cycle: u64,
    tx: mpsc::UnboundedSender<StampedPeerEvent>,
}

impl PeerEventSink {
    pub fn new(cycle: u64, tx: mpsc::UnboundedSender<StampedPeerEvent>) -> Self {
        Self { cycle, tx }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// false, если сессия уже не слушает
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(StampedPeerEvent {
                cycle: self.cycle,
                event,
            })
            .is_ok()
    }
}

/// Peer connection платформы. Движок никогда не создаёт транспорт сам.
#[async_trait]
pub trait PeerConnectionResource: Send + Sync {
    async fn add_track(&self, track: Arc<LocalTrack>, stream_id: &str) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Создаёт peer connection для нового цикла согласования
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice: &IceConfig,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnectionResource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_stamps_its_cycle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(7, tx);
        assert!(sink.emit(PeerEvent::Connectivity(ConnectivityState::Connecting)));

        let stamped = rx.recv().await.unwrap();
        assert_eq!(stamped.cycle, 7);
        assert_eq!(
            stamped.event,
            PeerEvent::Connectivity(ConnectivityState::Connecting)
        );
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = PeerEventSink::new(1, tx);
        drop(rx);
        assert!(!sink.emit(PeerEvent::Connectivity(ConnectivityState::Closed)));
    }
}
