//! Сообщения сигнализации и канал до сигнального сервера.
//!
//! Сам транспорт (сокет, переподключение, кадрирование) внешний. Движок
//! видит только конверты `SignalEnvelope`, привязанные к комнате.

use crate::error::{Result, SessionError};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::utils::{random_id, timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Событие сигнализации
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Сервер комнаты: второй участник готов, мы инициатор
    #[serde(rename = "peer-joined", alias = "peer-present")]
    PeerPresent,
    Offer {
        offer: SessionDescription,
    },
    Answer {
        answer: SessionDescription,
    },
    IceCandidate {
        candidate: IceCandidate,
    },
    PeerLeft,
    /// Локальное медиа готово, можно звать собеседника
    Ready,
    LeaveRoom,
}

impl SignalMessage {
    /// Имя события на проводе
    pub fn name(&self) -> &'static str {
        match self {
            SignalMessage::PeerPresent => "peer-joined",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::PeerLeft => "peer-left",
            SignalMessage::Ready => "ready",
            SignalMessage::LeaveRoom => "leave-room",
        }
    }
}

/// Полезная нагрузка сигнализации с метаданными
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub room_id: String,
    pub id: String,
    pub ts: i64,
    pub message: SignalMessage,
}

impl SignalEnvelope {
    pub fn new(room_id: impl Into<String>, message: SignalMessage) -> Self {
        Self {
            room_id: room_id.into(),
            id: random_id(),
            ts: timestamp(),
            message,
        }
    }
}

pub fn encode(envelope: &SignalEnvelope) -> Result<String> {
    serde_json::to_string(envelope)
        .map_err(|e| SessionError::SignalingRejected(format!("cannot encode message: {e}")))
}

pub fn decode(text: &str) -> Result<SignalEnvelope> {
    serde_json::from_str(text)
        .map_err(|e| SessionError::SignalingRejected(format!("malformed message: {e}")))
}

/// Исходящая сторона сигнального канала
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, envelope: SignalEnvelope) -> Result<()>;
}

/// Канал поверх tokio mpsc: мост к любому внешнему транспорту
#[derive(Debug, Clone)]
pub struct ChannelSignaling {
    tx: mpsc::UnboundedSender<SignalEnvelope>,
}

impl ChannelSignaling {
    pub fn new(tx: mpsc::UnboundedSender<SignalEnvelope>) -> Self {
        Self { tx }
    }

    /// Канал и приёмник его исходящих конвертов
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SignalingChannel for ChannelSignaling {
    async fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        self.tx.send(envelope).map_err(|e| {
            SessionError::SignalingRejected(format!(
                "signaling transport closed, dropped {}",
                e.0.message.name()
            ))
        })
    }
}
