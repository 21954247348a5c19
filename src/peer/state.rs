use crate::error::{Result, SessionError};
use std::fmt;

/// Фаза жизненного цикла сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    MediaPending,
    MediaReady,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

impl ConnectionPhase {
    /// Сессия начата и ещё не закрыта (включая `Failed`, который ждёт `end_session`)
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionPhase::Idle | ConnectionPhase::Closed)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::MediaPending => "media-pending",
            ConnectionPhase::MediaReady => "media-ready",
            ConnectionPhase::Negotiating => "negotiating",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Closed => "closed",
            ConnectionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Роль в текущем цикле согласования
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Unassigned,
    Initiator,
    Responder,
}

impl Role {
    /// Назначает роль ровно один раз за цикл.
    /// Повторное назначение той же роли тоже отклоняется: это дубликат.
    pub fn assign(&mut self, role: Role) -> Result<()> {
        if role == Role::Unassigned {
            return Err(SessionError::SignalingRejected(
                "cannot assign the unassigned role".into(),
            ));
        }
        if *self != Role::Unassigned {
            return Err(SessionError::SignalingRejected(format!(
                "role already assigned as {:?}, refusing {:?}",
                self, role
            )));
        }
        *self = role;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Role::Unassigned;
    }

    pub fn is_assigned(self) -> bool {
        self != Role::Unassigned
    }
}
