use crate::peer::state::ConnectionPhase;
use thiserror::Error;

/// Ошибки сессии звонка
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Нет доступа к камере/микрофону
    #[error("failed to access camera/microphone: {0}")]
    MediaAccess(String),

    /// Сообщение сигнализации отброшено (дубликат, чужая роль, битый SDP)
    #[error("signaling message rejected: {0}")]
    SignalingRejected(String),

    /// Один ICE кандидат не применился
    #[error("failed to apply ICE candidate: {0}")]
    CandidateApply(String),

    /// Peer connection сообщил о необратимом сбое
    #[error("peer connectivity failed")]
    ConnectivityFailed,

    /// Ошибка самого peer connection (создание, offer/answer, local description)
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// Команда недопустима в текущей фазе
    #[error("operation not allowed in phase {0}")]
    InvalidState(ConnectionPhase),

    /// Некорректная конфигурация ICE серверов
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Задача сессии уже завершена
    #[error("session driver has stopped")]
    DriverStopped,
}

impl SessionError {
    /// Фатальные ошибки переводят сессию в `Failed`, остальные только логируются
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::MediaAccess(_)
                | SessionError::ConnectivityFailed
                | SessionError::PeerConnection(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(SessionError::MediaAccess("denied".into()).is_fatal());
        assert!(SessionError::ConnectivityFailed.is_fatal());
        assert!(!SessionError::SignalingRejected("dup".into()).is_fatal());
        assert!(!SessionError::CandidateApply("bad".into()).is_fatal());
        assert!(!SessionError::InvalidState(ConnectionPhase::Idle).is_fatal());
    }

    #[test]
    fn invalid_state_names_the_phase() {
        let err = SessionError::InvalidState(ConnectionPhase::Closed);
        assert_eq!(err.to_string(), "operation not allowed in phase closed");
    }
}
