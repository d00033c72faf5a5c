use reaper_common::MINUTE_MS;

/// Timestamp em milissegundos desde a epoch.
pub type Timestamp = i64;

/// Relógio de parede atual em milissegundos.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Metadados de um recurso externo rastreado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub created_at: Timestamp,
    pub last_active_at: Timestamp,
    pub protected: bool,
}

impl Entry {
    pub fn new(id: impl Into<String>, protected: bool, timestamp: Timestamp) -> Self {
        Self {
            id: id.into(),
            created_at: timestamp,
            last_active_at: timestamp,
            protected,
        }
    }

    /// Registra atividade. `last_active_at` nunca retrocede.
    pub fn touch(&mut self, timestamp: Timestamp) {
        self.last_active_at = self.last_active_at.max(timestamp);
    }

    /// Tempo ocioso em ms (zero se o relógio voltou).
    pub fn idle_ms(&self, now: Timestamp) -> i64 {
        now.saturating_sub(self.last_active_at).max(0)
    }

    /// Minutos ociosos inteiros, apenas para exibição.
    pub fn idle_minutes(&self, now: Timestamp) -> i64 {
        self.idle_ms(now) / MINUTE_MS as i64
    }
}
