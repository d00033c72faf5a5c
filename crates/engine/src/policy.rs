use reaper_storage::{Entry, PolicyConfig, Timestamp};

/// Decisão da política para uma entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Protegida e a política isenta protegidas.
    Protected,
    /// Ociosa há menos que o limiar.
    Active,
    /// Candidata a remoção.
    Expired,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Protected => "protected",
            Verdict::Active => "active",
            Verdict::Expired => "expired",
        }
    }
}

/// Instante de corte: entradas com `last_active_at` estritamente menor expiram.
pub fn cutoff(now: Timestamp, config: &PolicyConfig) -> Timestamp {
    let threshold = i64::try_from(config.idle_threshold_ms).unwrap_or(i64::MAX);
    now.saturating_sub(threshold)
}

/// Avalia uma entrada. A comparação usa a duração sem arredondamento.
pub fn evaluate(entry: &Entry, now: Timestamp, config: &PolicyConfig) -> Verdict {
    if config.exempt_protected && entry.protected {
        Verdict::Protected
    } else if entry.last_active_at < cutoff(now, config) {
        Verdict::Expired
    } else {
        Verdict::Active
    }
}

/// Entrada avaliada, com minutos ociosos para exibição.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub entry: Entry,
    pub verdict: Verdict,
    pub idle_minutes: i64,
}

/// Avalia todas as entradas, mais ociosas primeiro.
pub fn evaluate_all(entries: Vec<Entry>, now: Timestamp, config: &PolicyConfig) -> Vec<Evaluation> {
    let mut out: Vec<Evaluation> = entries
        .into_iter()
        .map(|entry| Evaluation {
            verdict: evaluate(&entry, now, config),
            idle_minutes: entry.idle_minutes(now),
            entry,
        })
        .collect();
    out.sort_by(|a, b| {
        a.entry
            .last_active_at
            .cmp(&b.entry.last_active_at)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    out
}

/// Partição de um snapshot do store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepPlan {
    pub considered: usize,
    pub protected_skipped: usize,
    pub candidates: Vec<String>,
}

pub fn plan(entries: &[Entry], now: Timestamp, config: &PolicyConfig) -> SweepPlan {
    let mut plan = SweepPlan {
        considered: entries.len(),
        ..Default::default()
    };
    for entry in entries {
        match evaluate(entry, now, config) {
            Verdict::Protected => plan.protected_skipped += 1,
            Verdict::Expired => plan.candidates.push(entry.id.clone()),
            Verdict::Active => {}
        }
    }
    plan
}

/// Resultado de uma varredura.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub considered_count: usize,
    pub protected_skipped_count: usize,
    /// Removidos no host e no store.
    pub closed_ids: Vec<String>,
    /// Já não existiam no host; apenas removidos do store.
    pub reconciled_ids: Vec<String>,
    /// Remoção falhou; continuam no store para a próxima varredura.
    pub failed_ids: Vec<String>,
}

impl SweepReport {
    pub fn from_plan(plan: &SweepPlan) -> Self {
        Self {
            considered_count: plan.considered,
            protected_skipped_count: plan.protected_skipped,
            ..Default::default()
        }
    }

    pub(crate) fn sort(&mut self) {
        self.closed_ids.sort();
        self.reconciled_ids.sort();
        self.failed_ids.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    fn config(threshold_min: u64, exempt: bool) -> PolicyConfig {
        PolicyConfig {
            idle_threshold_ms: threshold_min * 60_000,
            exempt_protected: exempt,
            ..Default::default()
        }
    }

    fn idle(id: &str, protected: bool, last_active_at: i64) -> Entry {
        Entry {
            id: id.into(),
            created_at: 0,
            last_active_at,
            protected,
        }
    }

    #[test]
    fn boundary_is_strict() {
        let cfg = config(30, true);
        let now = 100 * MIN;
        let cut = cutoff(now, &cfg);
        assert_eq!(cut, 70 * MIN);

        assert_eq!(evaluate(&idle("a", false, cut), now, &cfg), Verdict::Active);
        assert_eq!(
            evaluate(&idle("b", false, cut - 1), now, &cfg),
            Verdict::Expired
        );
    }

    #[test]
    fn protected_exemption_follows_config() {
        let e = idle("p", true, 0);
        let now = 1_000 * MIN;
        assert_eq!(evaluate(&e, now, &config(30, true)), Verdict::Protected);
        assert_eq!(evaluate(&e, now, &config(30, false)), Verdict::Expired);
    }

    #[test]
    fn protected_count_includes_recently_active() {
        let now = 100 * MIN;
        let entries = vec![idle("p1", true, now), idle("p2", true, 0)];
        let p = plan(&entries, now, &config(30, true));
        assert_eq!(p.protected_skipped, 2);
        assert!(p.candidates.is_empty());
    }

    #[test]
    fn plan_partitions_snapshot() {
        let now = 100 * MIN;
        let entries = vec![
            idle("a", false, now - 40 * MIN),
            idle("b", true, now - 40 * MIN),
            idle("c", false, now - 10 * MIN),
        ];
        let p = plan(&entries, now, &config(30, true));
        assert_eq!(p.considered, 3);
        assert_eq!(p.protected_skipped, 1);
        assert_eq!(p.candidates, vec!["a".to_string()]);
    }

    #[test]
    fn display_minutes_do_not_affect_decision() {
        // 29min59s ocioso aparece como 29 minutos e continua ativo;
        // 30min00s+1ms aparece como 30 e expira.
        let cfg = config(30, true);
        let now = 100 * MIN;
        let evals = evaluate_all(
            vec![
                idle("young", false, now - 30 * MIN + 1_000),
                idle("old", false, now - 30 * MIN - 1),
            ],
            now,
            &cfg,
        );
        assert_eq!(evals[0].entry.id, "old");
        assert_eq!(evals[0].idle_minutes, 30);
        assert_eq!(evals[0].verdict, Verdict::Expired);
        assert_eq!(evals[1].idle_minutes, 29);
        assert_eq!(evals[1].verdict, Verdict::Active);
    }

    #[test]
    fn huge_threshold_does_not_overflow() {
        let cfg = PolicyConfig {
            idle_threshold_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(cutoff(0, &cfg), i64::MIN + 1);
        assert_eq!(evaluate(&idle("a", false, i64::MIN), 0, &cfg), Verdict::Expired);
    }
}
