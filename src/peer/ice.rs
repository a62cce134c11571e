use crate::logger::log;
use crate::peer::engine::PeerEngine;
use crate::peer::types::IceCandidate;

/// Кандидаты удалённой стороны, пришедшие раньше remote description
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: Vec<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Применяет все отложенные кандидаты в порядке поступления.
    /// Ошибки только логируются.
    pub async fn drain_into(&mut self, engine: &dyn PeerEngine) {
        let candidates = std::mem::take(&mut self.pending);
        for candidate in candidates {
            log(&format!("Applying pending candidate: {:?}", candidate.candidate));
            if let Err(e) = engine.add_ice_candidate(candidate).await {
                log(&format!("Failed to apply pending candidate: {}", e));
            }
        }
    }

    /// Применяет кандидат сразу, если remote description уже установлен,
    /// иначе откладывает
    pub async fn queue_or_apply(&mut self, engine: &dyn PeerEngine, candidate: IceCandidate) {
        if engine.remote_description().await.is_some() {
            if let Err(e) = engine.add_ice_candidate(candidate).await {
                log(&format!("Failed to add ICE candidate: {}", e));
            }
        } else {
            log("Remote description not set yet, queuing candidate");
            self.push(candidate);
        }
    }
}

/// Краткая сводка по типам кандидатов для диагностики
pub fn analyze_candidates(candidates: &[IceCandidate]) -> (usize, usize, usize) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    (host_count, srflx_count, relay_count)
}
