use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Duration};
use tracing::{info, warn};

use reaper_common::{ConnectionError, HostError};
use reaper_engine::{OpenResource, ResourceManager};
use reaper_protocol::{Command, Frame, parse_bool};

use crate::Connection;

/// Requisições em fila por host conectado.
const HOST_QUEUE: usize = 64;

pub struct HostRequest {
    command: Command,
    reply: oneshot::Sender<Frame>,
}

struct Attached {
    generation: u64,
    tx: mpsc::Sender<HostRequest>,
}

/// Gerenciador de recursos remoto: o host se conecta na porta de controle,
/// envia `HOST` e a conexão passa a atender `LIST` e `DESTROY`.
///
/// Um host novo substitui o anterior. Sem host conectado toda chamada
/// falha e as entradas ficam retidas para a próxima varredura.
#[derive(Clone, Default)]
pub struct HostLink {
    slot: Arc<Mutex<Option<Attached>>>,
    generations: Arc<AtomicU64>,
}

impl HostLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra uma nova conexão de host. Retorna a geração (para
    /// `detach`) e a fila de requisições que a conexão deve atender.
    pub fn attach(&self) -> (u64, mpsc::Receiver<HostRequest>) {
        let (tx, rx) = mpsc::channel(HOST_QUEUE);
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        if let Ok(mut slot) = self.slot.lock() {
            if slot.is_some() {
                info!("novo host substitui o anterior");
            }
            *slot = Some(Attached { generation, tx });
        }
        (generation, rx)
    }

    /// Desfaz `attach`, a menos que outro host já tenha assumido.
    pub fn detach(&self, generation: u64) {
        if let Ok(mut slot) = self.slot.lock()
            && slot.as_ref().is_some_and(|a| a.generation == generation)
        {
            *slot = None;
            info!("host desconectado");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    async fn call(&self, command: Command) -> Result<Frame, HostError> {
        let tx = self
            .slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|a| a.tx.clone()))
            .ok_or_else(|| HostError::Failed("nenhum host conectado".into()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(HostRequest {
            command,
            reply: reply_tx,
        })
        .await
        .map_err(|_| HostError::Failed("host desconectado".into()))?;

        reply_rx
            .await
            .map_err(|_| HostError::Failed("host desconectado".into()))
    }
}

impl ResourceManager for HostLink {
    async fn list_open(&self) -> Result<Vec<OpenResource>, HostError> {
        match self.call(Command::List).await? {
            Frame::Array(items) => items.into_iter().map(open_resource).collect(),
            Frame::Error(msg) => Err(HostError::Failed(msg)),
            other => Err(unexpected(&other)),
        }
    }

    async fn destroy(&self, id: &str) -> Result<(), HostError> {
        match self.call(Command::Destroy(id.to_string())).await? {
            Frame::Simple(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
            Frame::Error(msg) if is_gone(&msg) => Err(HostError::Gone),
            Frame::Error(msg) => Err(HostError::Failed(msg)),
            other => Err(unexpected(&other)),
        }
    }
}

/// `-GONE ...` sinaliza recurso inexistente.
fn is_gone(msg: &str) -> bool {
    msg.split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("GONE"))
}

/// Item de `LIST`: `[id, protected]`.
fn open_resource(item: Frame) -> Result<OpenResource, HostError> {
    let Frame::Array(pair) = item else {
        return Err(unexpected(&item));
    };
    let [id, protected] = <[Frame; 2]>::try_from(pair)
        .map_err(|_| HostError::Failed("item de LIST deve ser [id, protected]".into()))?;

    let id = id
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HostError::Failed("id inválido em LIST".into()))?
        .to_string();
    let protected = match protected {
        Frame::Integer(n) => n != 0,
        other => other
            .as_str()
            .and_then(parse_bool)
            .ok_or_else(|| HostError::Failed(format!("flag protected inválida para {id}")))?,
    };

    Ok(OpenResource { id, protected })
}

fn unexpected(frame: &Frame) -> HostError {
    HostError::Failed(format!("resposta inesperada do host: {frame:?}"))
}

/// Atende a fila de requisições sobre a conexão do host, uma por vez.
///
/// Um host que não responde dentro de `reply_timeout` derruba o link:
/// o chamador recebe falha e o host precisa reconectar.
pub async fn handle_host_stream(
    mut conn: Connection,
    mut requests: mpsc::Receiver<HostRequest>,
    shutdown: &mut broadcast::Receiver<()>,
    reply_timeout: Duration,
) -> Result<(), ConnectionError> {
    info!("link com o host estabelecido");

    loop {
        let request = tokio::select! {
            request = requests.recv() => request,
            _ = shutdown.recv() => return Ok(()),
        };
        let Some(request) = request else {
            // Substituído por outro host
            return Ok(());
        };

        conn.write_frame(&request.command.to_frame()).await?;
        let reply = tokio::select! {
            reply = time::timeout(reply_timeout, conn.read_frame()) => reply,
            _ = shutdown.recv() => return Ok(()),
        };
        let Ok(reply) = reply else {
            warn!(
                "host não respondeu {} a tempo, encerrando o link",
                request.command.name()
            );
            return Err(ConnectionError::HostTimeout(reply_timeout.as_millis() as u64));
        };

        match reply? {
            Some(frame) => {
                if request.reply.send(frame).is_err() {
                    warn!("resposta do host descartada: chamador desistiu");
                }
            }
            None => return Ok(()),
        }
    }
}
