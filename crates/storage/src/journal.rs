use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use tracing::{info, warn};

use reaper_common::{CommandError, ProtocolError};
use reaper_protocol::{Frame, Parse};

use crate::entry::Entry;
use crate::store::EntryStore;

/// Política de fsync.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync após cada registro.
    Always,
    /// Fsync a cada segundo.
    #[default]
    EverySec,
    /// Sem fsync explícito (deixa pro OS).
    No,
}

/// Registro do journal. Cada `Put` carrega o estado completo da entrada,
/// então o replay é idempotente.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    Put(Entry),
    Del(String),
}

impl JournalRecord {
    pub fn to_frame(&self) -> Frame {
        match self {
            JournalRecord::Put(e) => Frame::Array(vec![
                Frame::bulk("PUT"),
                Frame::bulk(&e.id),
                Frame::Integer(e.created_at),
                Frame::Integer(e.last_active_at),
                Frame::Integer(e.protected as i64),
            ]),
            JournalRecord::Del(id) => Frame::Array(vec![Frame::bulk("DEL"), Frame::bulk(id)]),
        }
    }

    pub fn from_frame(frame: Frame) -> Result<JournalRecord, CommandError> {
        let mut parse = Parse::new(frame)?;
        let record = match parse.next_string()?.as_str() {
            "PUT" => {
                let id = parse.next_string()?;
                let created_at = parse.next_int()?;
                let last_active_at = parse.next_int()?;
                let protected = parse.next_int()? != 0;
                JournalRecord::Put(Entry {
                    id,
                    created_at,
                    last_active_at,
                    protected,
                })
            }
            "DEL" => JournalRecord::Del(parse.next_string()?),
            other => {
                return Err(CommandError::InvalidArgument(format!(
                    "registro de journal desconhecido: {other}"
                )));
            }
        };
        parse.finish()?;
        Ok(record)
    }

    fn encode(&self, dst: &mut BytesMut) {
        self.to_frame().encode(dst);
    }
}

/// Writer que recebe registros via channel e faz append no arquivo.
pub struct JournalWriter {
    rx: mpsc::Receiver<JournalRecord>,
    path: PathBuf,
    policy: FsyncPolicy,
}

impl JournalWriter {
    pub fn new(rx: mpsc::Receiver<JournalRecord>, path: PathBuf, policy: FsyncPolicy) -> Self {
        Self { rx, path, policy }
    }

    /// Loop principal: recebe registros e escreve no arquivo. Ao retornar
    /// (inclusive com erro) o receiver é descartado e o store passa a
    /// responder `StoreError::Io` em toda mutação.
    pub async fn run(mut self) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut writer = BufWriter::new(file);
        let mut tick = interval(Duration::from_secs(1));

        info!("journal writer iniciado: {:?}", self.path);

        loop {
            tokio::select! {
                record = self.rx.recv() => {
                    match record {
                        Some(record) => {
                            let mut buf = BytesMut::new();
                            record.encode(&mut buf);
                            writer.write_all(&buf).await?;

                            if self.policy == FsyncPolicy::Always {
                                writer.flush().await?;
                                writer.get_ref().sync_data().await?;
                            }
                        }
                        None => {
                            // Channel fechado: flush final
                            writer.flush().await?;
                            writer.get_ref().sync_data().await?;
                            info!("journal writer encerrado");
                            return Ok(());
                        }
                    }
                }
                _ = tick.tick(), if self.policy == FsyncPolicy::EverySec => {
                    writer.flush().await?;
                    writer.get_ref().sync_data().await?;
                }
            }
        }
    }
}

/// Lê o journal e reconstrói o estado do store.
pub async fn replay_journal(path: &Path, store: &EntryStore) -> std::io::Result<usize> {
    if !path.exists() {
        info!("journal não encontrado, iniciando sem entradas");
        return Ok(0);
    }

    let mut file = File::open(path).await?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).await?;

    let mut cursor = Cursor::new(&data[..]);
    let mut count = 0;

    while (cursor.position() as usize) < data.len() {
        let start = cursor.position();
        match Frame::check(&mut cursor) {
            Ok(()) => {
                cursor.set_position(start);
                let frame = match Frame::parse(&mut cursor) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("journal: frame corrompido, parando replay: {e}");
                        break;
                    }
                };
                match JournalRecord::from_frame(frame) {
                    Ok(record) => {
                        store.apply(record);
                        count += 1;
                    }
                    Err(e) => warn!("journal: registro inválido ignorado: {e}"),
                }
            }
            Err(ProtocolError::Incomplete) => {
                warn!("journal: registro incompleto no final do arquivo, parando replay");
                break;
            }
            Err(e) => {
                warn!("journal: erro no frame, parando replay: {e}");
                break;
            }
        }
    }

    info!(
        "journal replay completo: {count} registros, {} entradas",
        store.len()
    );
    Ok(count)
}

/// Reescreve o journal com um `PUT` por entrada viva (arquivo temporário
/// + rename). Deve rodar antes do writer ser iniciado.
pub async fn compact_journal(path: &Path, store: &EntryStore) -> std::io::Result<usize> {
    let tmp_path = path.with_extension("tmp");
    let entries = store.list_all();

    let mut buf = BytesMut::new();
    for entry in &entries {
        JournalRecord::Put(entry.clone()).encode(&mut buf);
    }

    let mut tmp = File::create(&tmp_path).await?;
    tmp.write_all(&buf).await?;
    tmp.flush().await?;
    tmp.sync_all().await?;
    drop(tmp);

    fs::rename(&tmp_path, path).await?;
    info!("journal compactado: {} entradas", entries.len());
    Ok(entries.len())
}

/// Sequência de partida: replay seguido de compactação. Um journal
/// existente é sempre reescrito, mesmo sem nenhum registro válido, para
/// que um registro truncado não fique antes dos próximos appends.
pub async fn restore_journal(path: &Path, store: &EntryStore) -> std::io::Result<usize> {
    let count = replay_journal(path, store).await?;
    if path.exists() {
        compact_journal(path, store).await?;
    }
    Ok(count)
}

/// Cria um par (sender, JournalWriter) para uso no servidor.
pub fn create_journal(
    path: PathBuf,
    policy: FsyncPolicy,
    buffer_size: usize,
) -> (mpsc::Sender<JournalRecord>, JournalWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let writer = JournalWriter::new(rx, path, policy);
    (tx, writer)
}
