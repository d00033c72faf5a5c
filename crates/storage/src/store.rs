use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use reaper_common::StoreError;

use crate::entry::{Entry, Timestamp};
use crate::journal::JournalRecord;

/// Estado compartilhado entre o engine e os handlers de eventos.
struct SharedState {
    data: DashMap<String, Entry>,
    /// Lock de escritor único. Guarda o sender do journal para que a ordem
    /// dos registros no arquivo seja a mesma das mutações em memória.
    writer: Mutex<Option<mpsc::Sender<JournalRecord>>>,
}

/// Handle para o Entry Store. Clonar é barato.
#[derive(Clone)]
pub struct EntryStore {
    shared: Arc<SharedState>,
}

impl EntryStore {
    /// Store apenas em memória (sem journal).
    pub fn new() -> Self {
        EntryStore {
            shared: Arc::new(SharedState {
                data: DashMap::new(),
                writer: Mutex::new(None),
            }),
        }
    }

    /// Passa a registrar toda mutação no journal.
    pub async fn attach_journal(&self, tx: mpsc::Sender<JournalRecord>) {
        *self.shared.writer.lock().await = Some(tx);
    }

    /// Solta o sender do journal para que o writer faça o flush final e
    /// encerre. Mutações seguintes ficam só em memória.
    pub async fn detach_journal(&self) {
        self.shared.writer.lock().await.take();
    }

    /// Upsert por id. Retorna a entrada anterior, se havia.
    pub async fn put(&self, entry: Entry) -> Result<Option<Entry>, StoreError> {
        if entry.id.is_empty() {
            return Err(StoreError::EmptyId);
        }

        let writer = self.shared.writer.lock().await;
        journal(&writer, JournalRecord::Put(entry.clone())).await?;
        Ok(self.shared.data.insert(entry.id.clone(), entry))
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        self.shared.data.get(id).map(|e| e.clone())
    }

    /// Atualiza `last_active_at` se a entrada existir.
    /// Retorna false quando o id não é rastreado.
    pub async fn touch(&self, id: &str, timestamp: Timestamp) -> Result<bool, StoreError> {
        let writer = self.shared.writer.lock().await;

        let mut updated = match self.get(id) {
            Some(e) => e,
            None => return Ok(false),
        };
        updated.touch(timestamp);

        journal(&writer, JournalRecord::Put(updated.clone())).await?;
        self.shared.data.insert(updated.id.clone(), updated);
        Ok(true)
    }

    /// Idempotente: remover id ausente não é erro. Retorna se havia entrada.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let writer = self.shared.writer.lock().await;

        if !self.shared.data.contains_key(id) {
            return Ok(false);
        }

        journal(&writer, JournalRecord::Del(id.to_string())).await?;
        Ok(self.shared.data.remove(id).is_some())
    }

    /// Snapshot não ordenado. Não é consistente com escritas concorrentes.
    pub fn list_all(&self) -> Vec<Entry> {
        self.shared.data.iter().map(|e| e.value().clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shared.data.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }

    /// Aplica um registro do journal sem re-journalizar (replay).
    pub(crate) fn apply(&self, record: JournalRecord) {
        match record {
            JournalRecord::Put(entry) => {
                self.shared.data.insert(entry.id.clone(), entry);
            }
            JournalRecord::Del(id) => {
                self.shared.data.remove(&id);
            }
        }
    }
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn journal(
    writer: &Option<mpsc::Sender<JournalRecord>>,
    record: JournalRecord,
) -> Result<(), StoreError> {
    let Some(tx) = writer else {
        return Ok(());
    };
    debug!("journal: {record:?}");
    tx.send(record)
        .await
        .map_err(|_| StoreError::Io("journal encerrado".into()))
}
