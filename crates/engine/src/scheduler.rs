use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::engine::{Engine, Inner};
use crate::resource::ResourceManager;

/// Estado observável do agendador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Sem timer (desabilitado ou ainda não iniciado).
    Idle,
    /// Timer armado com o período dado.
    Scheduled(Duration),
    /// Varredura em andamento.
    Sweeping,
}

/// Timer armado: período e instante a partir do qual ele conta.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arm {
    pub period: Duration,
    pub since: Instant,
}

/// Lado de controle do timer. Só existe uma task consumidora, então
/// re-armar nunca duplica o agendamento.
pub(crate) struct Schedule {
    tx: watch::Sender<Option<Arm>>,
}

impl Schedule {
    pub fn new() -> (Self, watch::Receiver<Option<Arm>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Cancela a espera atual e re-arma com `period` (`None` desarma).
    /// Período igual ao vigente não reinicia o timer.
    pub fn set(&self, period: Option<Duration>) -> bool {
        self.tx.send_if_modified(|current| {
            if current.map(|a| a.period) == period {
                return false;
            }
            *current = period.map(|period| Arm {
                period,
                since: Instant::now(),
            });
            true
        })
    }

    pub fn period(&self) -> Option<Duration> {
        self.tx.borrow().map(|a| a.period)
    }
}

/// Loop do timer. Encerra quando o engine é descartado.
///
/// Uma varredura em andamento nunca é interrompida: mudanças de período
/// feitas durante ela são observadas logo em seguida. Disparos perdidos
/// durante uma varredura longa são adiados, nunca acumulados.
pub(crate) async fn run<R: ResourceManager>(
    engine: Weak<Inner<R>>,
    mut rx: watch::Receiver<Option<Arm>>,
) {
    loop {
        let arm = *rx.borrow_and_update();

        let Some(arm) = arm else {
            debug!("agendador ocioso");
            if rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        info!("varredura agendada a cada {:?}", arm.period);
        let mut ticker = interval_at(arm.since + arm.period, arm.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = engine.upgrade() else {
                        return;
                    };
                    Engine::from_inner(inner).trigger_sweep().await;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
            }
        }
    }
}
