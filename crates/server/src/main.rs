use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{Semaphore, broadcast};
use tracing::{error, info};

use reaper_common::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_REMOVAL_TIMEOUT_MS, MAX_CONNECTIONS};
use reaper_server::{Connection, HostLink, ReaperEngine, handle_connection};
use reaper_storage::{
    ConfigStore, EntryStore, FsyncPolicy, PolicyConfig, create_journal, restore_journal,
};

#[derive(Parser, Debug)]
#[command(
    name = "reaper-server",
    about = "Reaper: expiração de recursos ociosos"
)]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    max_connections: usize,
    /// Journal das entradas. Sem ele o store vive só em memória.
    #[arg(long, value_name = "FILE")]
    journal: Option<PathBuf>,
    #[arg(long, default_value = "everysec", value_parser = parse_fsync)]
    fsync: FsyncPolicy,
    /// Registro JSON da política. Sem ele vale o padrão, em memória.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// Timeout por chamada ao host (LIST, DESTROY).
    #[arg(long, default_value_t = DEFAULT_REMOVAL_TIMEOUT_MS)]
    removal_timeout_ms: u64,
}

fn parse_fsync(s: &str) -> Result<FsyncPolicy, String> {
    match s.to_lowercase().as_str() {
        "always" => Ok(FsyncPolicy::Always),
        "everysec" => Ok(FsyncPolicy::EverySec),
        "no" => Ok(FsyncPolicy::No),
        _ => Err(format!("valor inválido: '{s}'. Use: always, everysec, no")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "reaper_server=info,reaper_engine=info,reaper_storage=info".into()
            }),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        args.removal_timeout_ms > 0,
        "--removal-timeout-ms deve ser positivo"
    );
    let addr = format!("{}:{}", args.host, args.port);

    let store = EntryStore::new();

    // Replay + compactação antes de aceitar novas mutações
    let journal_task = if let Some(ref path) = args.journal {
        let count = restore_journal(path, &store).await?;
        info!("{count} registros restaurados do journal");

        let (tx, writer) = create_journal(path.clone(), args.fsync, 10_000);
        let handle = tokio::spawn(async move {
            if let Err(e) = writer.run().await {
                error!("journal writer erro: {e}");
            }
        });
        store.attach_journal(tx).await;
        Some(handle)
    } else {
        None
    };

    let config = match args.settings {
        Some(ref path) => ConfigStore::load(path).await,
        None => ConfigStore::in_memory(PolicyConfig::default()),
    };

    let engine: ReaperEngine = ReaperEngine::new(
        store.clone(),
        config,
        HostLink::new(),
        Duration::from_millis(args.removal_timeout_ms),
    );
    engine.start().await;

    let listener = TcpListener::bind(&addr).await?;
    info!("Reaper escutando em {addr}");

    let semaphore = Arc::new(Semaphore::new(args.max_connections));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit?,
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };

        let (socket, addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        error!("erro ao aceitar conexão: {e}");
                        continue;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };

        info!("nova conexão: {addr}");
        let engine = engine.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let conn = Connection::new(socket);
            if let Err(e) = handle_connection(conn, engine, &mut shutdown_rx).await {
                error!("erro na conexão {addr}: {e}");
            }
            info!("conexão encerrada: {addr}");
            drop(permit);
        });
    }

    drop(shutdown_tx);

    // Flush final do journal
    store.detach_journal().await;
    if let Some(handle) = journal_task {
        let _ = handle.await;
    }

    Ok(())
}
