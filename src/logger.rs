use crate::config::{self, EngineConfig};
use crate::peer::ice::CandidateType;
use crate::peer::types::IceCandidate;
use tracing::trace;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Формат временных меток в логах
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Логирование с временными метками.
///
/// `PAIRLINK_LOG` включает логи и в релизной сборке. Повторный вызов ничего не делает.
pub fn init(config: &EngineConfig) {
    let from_env = EnvFilter::try_from_env(config::LOG_ENV).ok();
    if from_env.is_none() && !config::LOGGING_ENABLED {
        return;
    }

    let filter = from_env.unwrap_or_else(|| EnvFilter::new(&config.log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    trace!(
        label,
        kind = ?CandidateType::of(cand),
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        "Trickle candidate"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        let config = EngineConfig::default();
        init(&config);
        init(&config);
        dump_candidate("LOCAL", &IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"));
    }
}
