use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::SessionError;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Entry,
    Answer,
}

impl ProcessKind {
    pub fn timeout_error(self) -> SessionError {
        match self {
            Self::Entry => SessionError::EnteringTimedOut,
            Self::Answer => SessionError::AnswerTimedOut,
        }
    }
}

/// Сработавший таймер процесса. `generation` отсекает таймеры,
/// которые успели сработать до перевзвода.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: ProcessKind,
    pub generation: u64,
}

pub type Outcome = Result<(), SessionError>;

/// Ожидание шага рукопожатия: resolver + таймер.
/// Таймер снимается вместе с resolver, в том числе при drop.
pub struct PendingProcess {
    kind: ProcessKind,
    generation: u64,
    resolver: Option<oneshot::Sender<Outcome>>,
    timer: JoinHandle<()>,
}

impl PendingProcess {
    pub fn arm(
        kind: ProcessKind,
        generation: u64,
        timeout: Duration,
        timers: mpsc::UnboundedSender<TimerFired>,
    ) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timers.send(TimerFired { kind, generation });
        });
        (
            Self {
                kind,
                generation,
                resolver: Some(tx),
                timer,
            },
            rx,
        )
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn resolve(self) {
        self.settle(Ok(()));
    }

    pub fn fail(self, err: SessionError) {
        self.settle(Err(err));
    }

    /// Ожидающая сторона получит `Cancelled`
    pub fn cancel(self) {}

    fn settle(mut self, outcome: Outcome) {
        self.timer.abort();
        if let Some(resolver) = self.resolver.take() {
            let _ = resolver.send(outcome);
        }
    }
}

impl Drop for PendingProcess {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Результат ожидания: закрытый канал значит отмену
pub async fn outcome(rx: oneshot::Receiver<Outcome>) -> Outcome {
    rx.await.unwrap_or(Err(SessionError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_reports_kind_and_generation() {
        let (timers_tx, mut timers_rx) = mpsc::unbounded_channel();
        let (_process, _rx) =
            PendingProcess::arm(ProcessKind::Answer, 7, Duration::from_secs(3), timers_tx);

        let fired = timers_rx.recv().await.unwrap();
        assert_eq!(
            fired,
            TimerFired {
                kind: ProcessKind::Answer,
                generation: 7
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resolving_stops_the_timer() {
        let (timers_tx, mut timers_rx) = mpsc::unbounded_channel();
        let (process, rx) =
            PendingProcess::arm(ProcessKind::Entry, 1, Duration::from_secs(1), timers_tx);

        process.resolve();
        assert_eq!(outcome(rx).await, Ok(()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(timers_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_yields_cancelled() {
        let (timers_tx, _timers_rx) = mpsc::unbounded_channel();
        let (process, rx) =
            PendingProcess::arm(ProcessKind::Entry, 1, Duration::from_secs(10), timers_tx);

        process.cancel();
        assert_eq!(outcome(rx).await, Err(SessionError::Cancelled));
    }
}
