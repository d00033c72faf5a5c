use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

use reaper_common::{ConfigError, HostError, ReaperResult, StoreError};
use reaper_protocol::PolicyUpdate;
use reaper_storage::{ConfigStore, Entry, EntryStore, PolicyConfig, Timestamp, now_ms};

use crate::policy::{self, Evaluation, SweepReport};
use crate::resource::{OpenResource, ResourceManager};
use crate::scheduler::{self, Schedule, SchedulerState};

pub(crate) struct Inner<R> {
    store: EntryStore,
    config: ConfigStore,
    resources: Arc<R>,
    removal_timeout: Duration,
    schedule: Schedule,
    /// Receiver do timer até `start()` entregá-lo à task.
    pending_rx: std::sync::Mutex<Option<tokio::sync::watch::Receiver<Option<scheduler::Arm>>>>,
    /// Garante no máximo uma varredura em andamento.
    sweep_lock: Mutex<()>,
    sweeping: AtomicBool,
    sweeps_completed: AtomicU64,
    last_report: Mutex<Option<SweepReport>>,
}

/// Resultado de uma comparação store × host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Rastreados mas não abertos no host; removidos do store.
    pub orphaned: Vec<String>,
    /// Abertos no host mas não rastreados.
    pub untracked: Vec<String>,
}

/// Fotografia do estado do engine para a superfície de controle.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub scheduler: SchedulerState,
    pub sweeps_completed: u64,
    pub entry_count: usize,
    pub last_report: Option<SweepReport>,
}

/// Engine de expiração. Uma instância por processo, criada no entry point
/// e clonada para quem precisar.
pub struct Engine<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: ResourceManager> Engine<R> {
    pub fn new(
        store: EntryStore,
        config: ConfigStore,
        resources: R,
        removal_timeout: Duration,
    ) -> Self {
        let (schedule, rx) = Schedule::new();
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                resources: Arc::new(resources),
                removal_timeout,
                schedule,
                pending_rx: std::sync::Mutex::new(Some(rx)),
                sweep_lock: Mutex::new(()),
                sweeping: AtomicBool::new(false),
                sweeps_completed: AtomicU64::new(0),
                last_report: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner<R>>) -> Self {
        Self { inner }
    }

    pub fn store(&self) -> &EntryStore {
        &self.inner.store
    }

    pub fn resources(&self) -> &R {
        &self.inner.resources
    }

    /// Prazo de cada chamada ao host.
    pub fn removal_timeout(&self) -> Duration {
        self.inner.removal_timeout
    }

    /// Inicia a task do timer e arma conforme a configuração atual.
    /// Chamadas repetidas não criam uma segunda task.
    pub async fn start(&self) {
        let rx = match self.inner.pending_rx.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        let Some(rx) = rx else {
            debug!("agendador já iniciado");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(scheduler::run(weak, rx));

        let config = self.inner.config.read().await;
        self.inner.schedule.set(config.sweep_period());
        if !config.enabled {
            info!("engine desabilitado, timer de varredura não armado");
        }
    }

    // --- Eventos do host ---

    /// Novo recurso. `at` ausente significa agora.
    pub async fn on_resource_created(
        &self,
        id: &str,
        protected: bool,
        at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        let timestamp = at.unwrap_or_else(now_ms);
        let previous = self
            .inner
            .store
            .put(Entry::new(id, protected, timestamp))
            .await?;

        if let Some(previous) = previous {
            // Contrato do host: um `created` por id por ciclo de vida
            warn!(
                "created duplicado para {id}; created_at {} descartado",
                previous.created_at
            );
        }
        debug!("rastreando {id} (protected: {protected})");
        Ok(())
    }

    /// Atividade (ativação ou carregamento concluído). Retorna false se o
    /// id não é rastreado, o que não é erro.
    pub async fn on_resource_activity(
        &self,
        id: &str,
        at: Option<Timestamp>,
    ) -> Result<bool, StoreError> {
        let tracked = self
            .inner
            .store
            .touch(id, at.unwrap_or_else(now_ms))
            .await?;
        if tracked {
            debug!("atividade em {id}");
        }
        Ok(tracked)
    }

    /// Recurso fechado no host. Idempotente.
    pub async fn on_resource_removed(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.inner.store.remove(id).await?;
        if removed {
            debug!("{id} não é mais rastreado");
        }
        Ok(removed)
    }

    /// Semeia o store com os recursos já abertos no host. Ids já
    /// rastreados mantêm seu histórico.
    pub async fn seed_from_host(&self) -> ReaperResult<usize> {
        let open = self.list_open().await?;
        let now = now_ms();
        let mut seeded = 0;

        for resource in open {
            if self.inner.store.contains(&resource.id) {
                continue;
            }
            self.on_resource_created(&resource.id, resource.protected, Some(now))
                .await?;
            seeded += 1;
        }

        info!("{seeded} recursos abertos passaram a ser rastreados");
        Ok(seeded)
    }

    /// Remove do store entradas cujo recurso não está mais aberto.
    ///
    /// O snapshot do store é tirado antes do `LIST`: entradas criadas
    /// enquanto a listagem está em voo não são tratadas como órfãs.
    pub async fn reconcile(&self) -> ReaperResult<ReconcileReport> {
        let tracked = self.inner.store.list_all();
        let open = self.list_open().await?;
        let open_ids: HashSet<&str> = open.iter().map(|r| r.id.as_str()).collect();
        let tracked_ids: HashSet<&str> = tracked.iter().map(|e| e.id.as_str()).collect();

        let mut report = ReconcileReport::default();
        for entry in &tracked {
            if open_ids.contains(entry.id.as_str()) {
                continue;
            }
            // Recriado durante a listagem: a entrada atual é outra
            if self.inner.store.get(&entry.id).as_ref() != Some(entry) {
                continue;
            }
            if self.inner.store.remove(&entry.id).await? {
                report.orphaned.push(entry.id.clone());
            }
        }
        report.untracked = open
            .iter()
            .filter(|r| !tracked_ids.contains(r.id.as_str()))
            .map(|r| r.id.clone())
            .collect();
        report.orphaned.sort();
        report.untracked.sort();

        info!(
            "reconciliação: {} órfãs removidas, {} não rastreadas",
            report.orphaned.len(),
            report.untracked.len()
        );
        Ok(report)
    }

    async fn list_open(&self) -> Result<Vec<OpenResource>, HostError> {
        let timeout = self.inner.removal_timeout;
        match time::timeout(timeout, self.inner.resources.list_open()).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout(timeout.as_millis() as u64)),
        }
    }

    // --- Configuração ---

    pub async fn settings(&self) -> PolicyConfig {
        self.inner.config.read().await
    }

    /// Atualiza a política e re-arma o timer se o período mudou.
    /// Desabilitar desarma o timer; reabilitar arma de novo.
    pub async fn update_settings(
        &self,
        update: &PolicyUpdate,
    ) -> Result<PolicyConfig, ConfigError> {
        info!("atualizando configuração: {update:?}");
        let config = self.inner.config.write(update).await?;
        if self.inner.schedule.set(config.sweep_period()) {
            match config.sweep_period() {
                Some(period) => info!("timer re-armado com período {period:?}"),
                None => info!("timer desarmado (engine desabilitado)"),
            }
        }
        Ok(config)
    }

    // --- Varredura ---

    pub fn entry_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Varredura imediata com a configuração e o relógio atuais. Se outra
    /// varredura estiver em andamento, espera ela terminar.
    pub async fn trigger_sweep(&self) -> SweepReport {
        let config = self.inner.config.read().await;
        self.run_sweep(now_ms(), &config).await
    }

    /// Executa a política sobre o snapshot atual do store.
    pub async fn run_sweep(&self, now: Timestamp, config: &PolicyConfig) -> SweepReport {
        let _guard = self.inner.sweep_lock.lock().await;

        if !config.enabled {
            debug!("varredura ignorada: engine desabilitado");
            return SweepReport::default();
        }

        let _sweeping = SweepingFlag::raise(&self.inner.sweeping);
        let entries = self.inner.store.list_all();
        let plan = policy::plan(&entries, now, config);
        info!(
            "varredura: {} rastreadas, {} protegidas ignoradas, {} expiradas (limiar {:?})",
            plan.considered,
            plan.protected_skipped,
            plan.candidates.len(),
            config.idle_threshold()
        );

        let mut report = SweepReport::from_plan(&plan);
        let mut removals = JoinSet::new();

        for id in plan.candidates {
            if let Some(entry) = entries.iter().find(|e| e.id == id) {
                debug!("{id} expirou (ocioso há {} minutos)", entry.idle_minutes(now));
            }
            let resources = self.inner.resources.clone();
            let timeout = self.inner.removal_timeout;
            removals.spawn(async move {
                let outcome = match time::timeout(timeout, resources.destroy(&id)).await {
                    Ok(result) => result,
                    Err(_) => Err(HostError::Timeout(timeout.as_millis() as u64)),
                };
                (id, outcome)
            });
        }

        while let Some(joined) = removals.join_next().await {
            let (id, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    error!("tarefa de remoção abortou: {e}");
                    continue;
                }
            };
            self.settle(id, outcome, &mut report).await;
        }

        report.sort();
        info!(
            "varredura concluída: {} fechadas, {} reconciliadas, {} falhas",
            report.closed_ids.len(),
            report.reconciled_ids.len(),
            report.failed_ids.len()
        );

        *self.inner.last_report.lock().await = Some(report.clone());
        self.inner.sweeps_completed.fetch_add(1, Ordering::SeqCst);
        report
    }

    /// Reflete no store o resultado da remoção de um candidato.
    async fn settle(&self, id: String, outcome: Result<(), HostError>, report: &mut SweepReport) {
        let gone = match outcome {
            Ok(()) => false,
            Err(e) if e.is_gone() => true,
            Err(e) => {
                warn!("falha ao remover {id}, mantido para a próxima varredura: {e}");
                report.failed_ids.push(id);
                return;
            }
        };

        match self.inner.store.remove(&id).await {
            Ok(_) if gone => {
                debug!("{id} já estava fechado, entrada reconciliada");
                report.reconciled_ids.push(id);
            }
            Ok(_) => {
                debug!("{id} fechado");
                report.closed_ids.push(id);
            }
            Err(e) => {
                error!("{id} fechado no host mas o store falhou: {e}");
                report.failed_ids.push(id);
            }
        }
    }

    /// Avalia a política sem tocar no store nem no host.
    pub async fn dry_run(&self) -> Vec<Evaluation> {
        let config = self.inner.config.read().await;
        policy::evaluate_all(self.inner.store.list_all(), now_ms(), &config)
    }

    pub async fn status(&self) -> EngineStatus {
        let scheduler = if self.inner.sweeping.load(Ordering::SeqCst) {
            SchedulerState::Sweeping
        } else {
            match self.inner.schedule.period() {
                Some(period) => SchedulerState::Scheduled(period),
                None => SchedulerState::Idle,
            }
        };

        EngineStatus {
            scheduler,
            sweeps_completed: self.inner.sweeps_completed.load(Ordering::SeqCst),
            entry_count: self.inner.store.len(),
            last_report: self.inner.last_report.lock().await.clone(),
        }
    }
}

/// Mantém `sweeping` ligado enquanto vive. Desliga também quando o
/// future da varredura é descartado no meio.
struct SweepingFlag<'a>(&'a AtomicBool);

impl<'a> SweepingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        SweepingFlag(flag)
    }
}

impl Drop for SweepingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::mock::{Behavior, MockHost};

    const MIN: i64 = 60_000;
    const NOW: i64 = 1_000 * MIN;

    fn engine_with(host: MockHost, config: PolicyConfig) -> Engine<MockHost> {
        Engine::new(
            EntryStore::new(),
            ConfigStore::in_memory(config),
            host,
            Duration::from_millis(200),
        )
    }

    fn engine(host: MockHost) -> Engine<MockHost> {
        engine_with(host, PolicyConfig::default())
    }

    async fn seed(engine: &Engine<MockHost>, id: &str, protected: bool, idle_min: i64) {
        engine.resources().open(id, protected);
        engine
            .on_resource_created(id, protected, Some(NOW - idle_min * MIN))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn created_uses_supplied_timestamp() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("a", true, Some(42)).await.unwrap();
        let e = engine.store().get("a").unwrap();
        assert_eq!((e.created_at, e.last_active_at, e.protected), (42, 42, true));
    }

    #[tokio::test]
    async fn created_defaults_to_now() {
        let engine = engine(MockHost::default());
        let before = now_ms();
        engine.on_resource_created("a", false, None).await.unwrap();
        let e = engine.store().get("a").unwrap();
        assert!(e.created_at >= before);
        assert_eq!(e.created_at, e.last_active_at);
    }

    #[tokio::test]
    async fn duplicate_created_overwrites() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("a", false, Some(10)).await.unwrap();
        engine.on_resource_created("a", true, Some(20)).await.unwrap();
        let e = engine.store().get("a").unwrap();
        assert_eq!(e.created_at, 20);
        assert!(e.protected);
        assert_eq!(engine.entry_count(), 1);
    }

    #[tokio::test]
    async fn activity_for_unknown_id_is_noop() {
        let engine = engine(MockHost::default());
        assert!(!engine.on_resource_activity("ghost", Some(5)).await.unwrap());
        assert_eq!(engine.entry_count(), 0);
    }

    #[tokio::test]
    async fn activity_keeps_created_at() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("a", false, Some(10)).await.unwrap();
        assert!(engine.on_resource_activity("a", Some(99)).await.unwrap());
        let e = engine.store().get("a").unwrap();
        assert_eq!((e.created_at, e.last_active_at), (10, 99));
    }

    #[tokio::test]
    async fn removed_twice_is_idempotent() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("a", false, None).await.unwrap();
        assert!(engine.on_resource_removed("a").await.unwrap());
        assert!(!engine.on_resource_removed("a").await.unwrap());
        assert!(engine.store().get("a").is_none());
    }

    #[tokio::test]
    async fn sweep_closes_only_expired_unprotected() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 40).await;
        seed(&engine, "B", true, 40).await;
        seed(&engine, "C", false, 10).await;

        let config = PolicyConfig {
            idle_threshold_ms: 30 * 60_000,
            exempt_protected: true,
            enabled: true,
            ..Default::default()
        };
        let report = engine.run_sweep(NOW, &config).await;

        assert_eq!(report.closed_ids, vec!["A".to_string()]);
        assert_eq!(report.protected_skipped_count, 1);
        assert_eq!(report.considered_count, 3);
        assert!(report.failed_ids.is_empty());

        let mut remaining: Vec<_> = engine.store().list_all().into_iter().map(|e| e.id).collect();
        remaining.sort();
        assert_eq!(remaining, vec!["B", "C"]);
        assert!(!engine.resources().is_open("A"));
    }

    #[tokio::test]
    async fn protected_far_past_threshold_is_never_closed() {
        let engine = engine(MockHost::default());
        seed(&engine, "P", true, 100_000).await;

        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;
        assert!(report.closed_ids.is_empty());
        assert!(engine.store().contains("P"));
        assert!(engine.resources().destroyed().is_empty());
    }

    #[tokio::test]
    async fn protected_closed_when_exemption_off() {
        let engine = engine(MockHost::default());
        seed(&engine, "P", true, 45).await;

        let config = PolicyConfig {
            exempt_protected: false,
            ..Default::default()
        };
        let report = engine.run_sweep(NOW, &config).await;
        assert_eq!(report.closed_ids, vec!["P".to_string()]);
        assert_eq!(report.protected_skipped_count, 0);
    }

    #[tokio::test]
    async fn threshold_boundary_is_strict() {
        let engine = engine(MockHost::default());
        let config = PolicyConfig::default();
        let cutoff = NOW - config.idle_threshold_ms as i64;

        engine.resources().open("edge", false);
        engine.resources().open("past", false);
        engine.on_resource_created("edge", false, Some(cutoff)).await.unwrap();
        engine.on_resource_created("past", false, Some(cutoff - 1)).await.unwrap();

        let report = engine.run_sweep(NOW, &config).await;
        assert_eq!(report.closed_ids, vec!["past".to_string()]);
        assert!(engine.store().contains("edge"));
    }

    #[tokio::test]
    async fn already_gone_resource_is_reconciled() {
        let engine = engine(MockHost::default());
        seed(&engine, "D", false, 60).await;
        engine.resources().close("D");

        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;
        assert_eq!(report.reconciled_ids, vec!["D".to_string()]);
        assert!(report.failed_ids.is_empty());
        assert!(!engine.store().contains("D"));
    }

    #[tokio::test]
    async fn failed_removal_keeps_entry_and_continues() {
        let engine = engine(MockHost::default());
        seed(&engine, "bad", false, 60).await;
        seed(&engine, "good", false, 60).await;
        engine
            .resources()
            .set_behavior("bad", Behavior::Fail("busy".into()));

        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;
        assert_eq!(report.failed_ids, vec!["bad".to_string()]);
        assert_eq!(report.closed_ids, vec!["good".to_string()]);
        assert!(engine.store().contains("bad"));

        // Próxima varredura tenta de novo
        engine.resources().set_behavior("bad", Behavior::Fail("still busy".into()));
        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;
        assert_eq!(report.failed_ids, vec!["bad".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_timeout_is_a_failure() {
        let engine = engine(MockHost::default());
        seed(&engine, "slow", false, 60).await;
        engine.resources().set_behavior("slow", Behavior::Hang);

        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;
        assert_eq!(report.failed_ids, vec!["slow".to_string()]);
        assert!(engine.store().contains("slow"));
    }

    #[tokio::test]
    async fn disabled_sweep_returns_empty_report() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 60).await;

        let config = PolicyConfig {
            enabled: false,
            ..Default::default()
        };
        let report = engine.run_sweep(NOW, &config).await;
        assert_eq!(report, SweepReport::default());
        assert!(engine.store().contains("A"));
        assert_eq!(engine.status().await.sweeps_completed, 0);
    }

    #[tokio::test]
    async fn store_failure_during_sweep_is_reported() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 60).await;

        let (tx, rx) = tokio::sync::mpsc::channel(1);
        engine.store().attach_journal(tx).await;
        drop(rx);

        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;
        assert_eq!(report.failed_ids, vec!["A".to_string()]);
        assert!(report.closed_ids.is_empty());
        assert!(engine.store().contains("A"));

        assert!(matches!(
            engine.on_resource_created("Z", false, None).await,
            Err(StoreError::Io(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sweeps_never_share_a_snapshot() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 60).await;
        engine.resources().set_delay(Duration::from_millis(50));

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_sweep(NOW, &PolicyConfig::default()).await }
        });
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_sweep(NOW, &PolicyConfig::default()).await }
        });

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        let closed: Vec<_> = first
            .closed_ids
            .iter()
            .chain(second.closed_ids.iter())
            .collect();
        assert_eq!(closed, vec!["A"]);
        assert_eq!(engine.resources().destroyed(), vec!["A".to_string()]);
        assert_eq!(engine.status().await.sweeps_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_racing_with_sweep_does_not_resurrect() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 60).await;
        engine.resources().set_delay(Duration::from_millis(100));

        let sweep = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_sweep(NOW, &PolicyConfig::default()).await }
        });

        // Host fecha e reporta enquanto o DESTROY ainda está em voo
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.status().await.scheduler, SchedulerState::Sweeping);
        engine.resources().close("A");
        assert!(engine.on_resource_removed("A").await.unwrap());

        let report = sweep.await.unwrap();
        assert!(report.closed_ids.is_empty());
        assert_eq!(report.reconciled_ids, vec!["A".to_string()]);
        assert!(!engine.store().contains("A"));
        assert_eq!(engine.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_sweep_clears_sweeping_state() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 60).await;
        engine.resources().set_behavior("A", Behavior::Hang);

        let sweep = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_sweep(NOW, &PolicyConfig::default()).await }
        });
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.scheduler, SchedulerState::Sweeping);

        sweep.abort();
        assert!(sweep.await.unwrap_err().is_cancelled());

        let status = engine.status().await;
        assert_eq!(status.scheduler, SchedulerState::Idle);
        assert_eq!(status.sweeps_completed, 0);
        assert!(engine.store().contains("A"));
    }

    #[tokio::test]
    async fn seed_tracks_untracked_open_resources() {
        let host = MockHost::with_open(&[("1", false), ("2", true)]);
        let engine = engine(host);
        engine.on_resource_created("1", false, Some(5)).await.unwrap();

        assert_eq!(engine.seed_from_host().await.unwrap(), 1);
        assert_eq!(engine.store().get("1").unwrap().created_at, 5);
        assert!(engine.store().get("2").unwrap().protected);
    }

    #[tokio::test]
    async fn reconcile_drops_orphans() {
        let host = MockHost::with_open(&[("open", false), ("new", false)]);
        let engine = engine(host);
        engine.on_resource_created("open", false, None).await.unwrap();
        engine.on_resource_created("orphan", false, None).await.unwrap();

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.orphaned, vec!["orphan".to_string()]);
        assert_eq!(report.untracked, vec!["new".to_string()]);
        assert!(!engine.store().contains("orphan"));
        assert!(engine.store().contains("open"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_keeps_entries_created_during_listing() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("closed", false, None).await.unwrap();
        engine.resources().set_list_delay(Duration::from_millis(50));

        let reconcile = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reconcile().await }
        });

        // A listagem já foi capturada; o host abre "new" e reporta
        time::sleep(Duration::from_millis(10)).await;
        engine.resources().open("new", false);
        engine.on_resource_created("new", false, None).await.unwrap();

        let report = reconcile.await.unwrap().unwrap();
        assert_eq!(report.orphaned, vec!["closed".to_string()]);
        assert!(engine.store().contains("new"));
        assert!(!engine.store().contains("closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_skips_entries_recreated_during_listing() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("tab", false, Some(1)).await.unwrap();
        engine.resources().set_list_delay(Duration::from_millis(50));

        let reconcile = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reconcile().await }
        });

        time::sleep(Duration::from_millis(10)).await;
        engine.resources().open("tab", false);
        engine.on_resource_created("tab", false, Some(2)).await.unwrap();

        let report = reconcile.await.unwrap().unwrap();
        assert!(report.orphaned.is_empty());
        assert_eq!(engine.store().get("tab").unwrap().created_at, 2);
    }

    #[tokio::test]
    async fn dry_run_leaves_store_untouched() {
        let engine = engine(MockHost::default());
        engine.on_resource_created("old", false, Some(0)).await.unwrap();
        engine.on_resource_created("pin", true, Some(0)).await.unwrap();
        engine.on_resource_created("fresh", false, None).await.unwrap();

        let evals = engine.dry_run().await;
        let verdicts: Vec<_> = evals
            .iter()
            .map(|e| (e.entry.id.as_str(), e.verdict))
            .collect();
        assert!(verdicts.contains(&("old", crate::Verdict::Expired)));
        assert!(verdicts.contains(&("pin", crate::Verdict::Protected)));
        assert!(verdicts.contains(&("fresh", crate::Verdict::Active)));
        assert_eq!(engine.entry_count(), 3);
        assert!(engine.resources().destroyed().is_empty());
    }

    #[tokio::test]
    async fn last_report_is_recorded() {
        let engine = engine(MockHost::default());
        seed(&engine, "A", false, 60).await;
        let report = engine.run_sweep(NOW, &PolicyConfig::default()).await;

        let status = engine.status().await;
        assert_eq!(status.last_report, Some(report));
        assert_eq!(status.sweeps_completed, 1);
        assert_eq!(status.entry_count, 0);
    }

    #[tokio::test]
    async fn settings_update_persists_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let engine = Engine::new(
            EntryStore::new(),
            ConfigStore::load(&path).await,
            MockHost::default(),
            Duration::from_millis(200),
        );

        let cfg = engine
            .update_settings(&PolicyUpdate {
                idle_threshold_ms: Some(10 * 60_000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cfg.idle_threshold_ms, 10 * 60_000);
        assert!(path.exists());

        let err = engine
            .update_settings(&PolicyUpdate {
                sweep_interval_ms: Some(0),
                ..Default::default()
            })
            .await;
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
        assert_eq!(engine.settings().await, cfg);

        let reloaded = ConfigStore::load(&path).await.read().await;
        assert_eq!(reloaded, cfg);
    }

    // --- Timer ---

    fn timed_engine() -> Engine<MockHost> {
        engine_with(MockHost::default(), PolicyConfig::default())
    }

    /// Entrada que expira em qualquer varredura feita com o relógio real.
    async fn stale(engine: &Engine<MockHost>, id: &str) {
        engine.resources().open(id, false);
        engine.on_resource_created(id, false, Some(0)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_sweeps_every_interval() {
        let engine = timed_engine();
        engine.start().await;
        assert_eq!(
            engine.status().await.scheduler,
            SchedulerState::Scheduled(Duration::from_secs(300))
        );

        time::sleep(Duration::from_secs(299)).await;
        assert_eq!(engine.status().await.sweeps_completed, 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.status().await.sweeps_completed, 1);

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(engine.status().await.sweeps_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_keeps_a_single_timer() {
        let engine = timed_engine();
        engine.start().await;
        engine.start().await;

        time::sleep(Duration::from_secs(301)).await;
        assert_eq!(engine.status().await.sweeps_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_interval_takes_effect_without_waiting() {
        let engine = timed_engine();
        engine.start().await;
        stale(&engine, "A").await;

        time::sleep(Duration::from_secs(10)).await;
        engine
            .update_settings(&PolicyUpdate {
                sweep_interval_ms: Some(60_000),
                ..Default::default()
            })
            .await
            .unwrap();

        time::sleep(Duration::from_secs(61)).await;
        let status = engine.status().await;
        assert_eq!(status.sweeps_completed, 1);
        assert_eq!(status.scheduler, SchedulerState::Scheduled(Duration::from_secs(60)));
        assert!(!engine.store().contains("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_tears_down_the_timer() {
        let engine = timed_engine();
        engine.start().await;
        stale(&engine, "A").await;

        engine
            .update_settings(&PolicyUpdate {
                enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(engine.status().await.scheduler, SchedulerState::Idle);

        time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(engine.status().await.sweeps_completed, 0);
        assert!(engine.store().contains("A"));

        engine
            .update_settings(&PolicyUpdate {
                enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        time::sleep(Duration::from_secs(301)).await;
        assert_eq!(engine.status().await.sweeps_completed, 1);
        assert!(!engine.store().contains("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_at_start_never_arms() {
        let engine = engine_with(
            MockHost::default(),
            PolicyConfig {
                enabled: false,
                ..Default::default()
            },
        );
        engine.start().await;
        assert_eq!(engine.status().await.scheduler, SchedulerState::Idle);

        time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(engine.status().await.sweeps_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sweep_does_not_reset_the_timer() {
        let engine = timed_engine();
        engine.start().await;

        time::sleep(Duration::from_secs(200)).await;
        engine.trigger_sweep().await;
        assert_eq!(engine.status().await.sweeps_completed, 1);

        time::sleep(Duration::from_secs(101)).await;
        assert_eq!(engine.status().await.sweeps_completed, 2);
    }
}
