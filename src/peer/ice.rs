use crate::error::SessionError;
use crate::peer::connection::PeerConnectionResource;
use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Кандидаты, полученные до установки remote description.
///
/// Порядок прихода сохраняется, дубликаты не отсеиваются: это забота сигнализации.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    /// Забирает все кандидаты в порядке прихода. На пустом буфере ничего не делает.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Тип кандидата из строки `candidate:... typ <type>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl CandidateType {
    pub fn of(candidate: &IceCandidate) -> Self {
        let mut parts = candidate.candidate.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return match parts.next() {
                    Some("host") => CandidateType::Host,
                    Some("srflx") => CandidateType::ServerReflexive,
                    Some("prflx") => CandidateType::PeerReflexive,
                    Some("relay") => CandidateType::Relay,
                    _ => CandidateType::Unknown,
                };
            }
        }
        CandidateType::Unknown
    }
}

/// Счётчики локальных кандидатов по типам
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub prflx: usize,
    pub relay: usize,
}

impl CandidateStats {
    pub fn record(&mut self, candidate: &IceCandidate) {
        match CandidateType::of(candidate) {
            CandidateType::Host => self.host += 1,
            CandidateType::ServerReflexive => self.srflx += 1,
            CandidateType::PeerReflexive => self.prflx += 1,
            CandidateType::Relay => self.relay += 1,
            CandidateType::Unknown => {}
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.prflx + self.relay
    }

    /// Сводка в лог; без relay кандидатов соединение через NAT может не подняться
    pub fn log_summary(&self) {
        debug!(
            host = self.host,
            srflx = self.srflx,
            prflx = self.prflx,
            relay = self.relay,
            "Candidate analysis"
        );
        if self.total() > 0 && self.relay == 0 {
            warn!("No TURN relay candidates gathered, connection through NAT may fail");
        }
    }
}

/// Применяет один удалённый кандидат, ошибка не выходит за пределы кандидата
pub async fn apply_candidate(
    pc: &dyn PeerConnectionResource,
    candidate: IceCandidate,
) -> Result<(), SessionError> {
    let kind = CandidateType::of(&candidate);
    match pc.add_ice_candidate(candidate).await {
        Ok(()) => {
            debug!(?kind, "Applied remote ICE candidate");
            Ok(())
        }
        Err(e) => {
            let err = SessionError::CandidateApply(e.to_string());
            warn!(error = %err, "Skipping remote ICE candidate");
            Err(err)
        }
    }
}

/// Применяет все отложенные кандидаты после установки remote description.
/// Возвращает число успешно применённых.
pub async fn apply_pending_candidates(
    pc: &dyn PeerConnectionResource,
    pending: &mut CandidateBuffer,
) -> usize {
    let candidates = pending.drain();
    if candidates.is_empty() {
        return 0;
    }
    debug!(count = candidates.len(), "Flushing buffered ICE candidates");

    let mut applied = 0;
    for candidate in candidates {
        if apply_candidate(pc, candidate).await.is_ok() {
            applied += 1;
        }
    }
    applied
}
