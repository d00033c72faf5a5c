use std::io::{self, Write};

use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use reaper_common::{DEFAULT_HOST, DEFAULT_PORT, MINUTE_MS};
use reaper_protocol::{Command, Frame, PolicyUpdate};

#[derive(Parser, Debug)]
#[command(name = "reaper-cli", about = "Cliente da porta de controle do Reaper")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Sem subcomando abre o modo interativo
    #[command(subcommand)]
    request: Option<Request>,
}

#[derive(Subcommand, Debug)]
enum Request {
    /// Verifica se o servidor responde
    Ping { message: Option<String> },
    /// Mostra a política atual
    Settings,
    /// Altera a política (só os campos informados)
    Set {
        #[arg(long)]
        idle_minutes: Option<u64>,
        #[arg(long)]
        interval_minutes: Option<u64>,
        #[arg(long)]
        exempt_protected: Option<bool>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Número de entradas rastreadas
    Count,
    /// Varredura imediata
    Sweep,
    /// Entradas com minutos ociosos
    Entries,
    /// O que a próxima varredura faria, sem executar
    DryRun,
    /// Remove entradas de recursos que o host já fechou
    Reconcile,
    /// Estado do agendador e última varredura
    Status,
    /// Reporta a criação de um recurso
    Created {
        id: String,
        #[arg(long)]
        protected: bool,
        /// Timestamp em ms (padrão: agora)
        #[arg(long)]
        at: Option<i64>,
    },
    /// Reporta atividade em um recurso
    Activated {
        id: String,
        #[arg(long)]
        at: Option<i64>,
    },
    /// Reporta o fechamento de um recurso
    Removed { id: String },
    /// Envia um comando cru
    Raw {
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },
}

impl Request {
    fn into_frame(self) -> anyhow::Result<Frame> {
        let command = match self {
            Request::Ping { message } => Command::Ping(message.map(Bytes::from)),
            Request::Settings => Command::GetSettings,
            Request::Set {
                idle_minutes,
                interval_minutes,
                exempt_protected,
                enabled,
            } => {
                let update = PolicyUpdate {
                    idle_threshold_ms: idle_minutes.map(minutes_to_ms),
                    sweep_interval_ms: interval_minutes.map(minutes_to_ms),
                    exempt_protected,
                    enabled,
                };
                anyhow::ensure!(!update.is_empty(), "nenhum campo para alterar");
                Command::SetSettings(update)
            }
            Request::Count => Command::Count,
            Request::Sweep => Command::Sweep,
            Request::Entries => Command::Entries,
            Request::DryRun => Command::DryRun,
            Request::Reconcile => Command::Reconcile,
            Request::Status => Command::Status,
            Request::Created { id, protected, at } => Command::Created { id, protected, at },
            Request::Activated { id, at } => Command::Activated { id, at },
            Request::Removed { id } => Command::Removed(id),
            Request::Raw { args } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                return Ok(Frame::array_from_strs(&args));
            }
        };
        Ok(command.to_frame())
    }
}

fn minutes_to_ms(minutes: u64) -> u64 {
    minutes.saturating_mul(MINUTE_MS)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut stream = TcpStream::connect(&addr).await?;

    // Modo comando único
    if let Some(request) = args.request {
        let response = execute_request(&mut stream, request.into_frame()?).await?;
        println!("{}", format_frame(&response, 0));
        if matches!(response, Frame::Error(_)) {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("Conectado a {addr}");

    let stdin = io::stdin();
    let mut input = String::new();

    loop {
        print!("reaper> ");
        io::stdout().flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        let args: Vec<&str> = tokens.iter().map(String::as_str).collect();
        match execute_request(&mut stream, Frame::array_from_strs(&args)).await {
            Ok(response) => println!("{}", format_frame(&response, 0)),
            Err(e) => {
                println!("(error) {e}");
                break;
            }
        }
    }

    Ok(())
}

async fn execute_request(stream: &mut TcpStream, frame: Frame) -> anyhow::Result<Frame> {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);

    stream.write_all(&buf).await?;
    stream.flush().await?;

    let mut response_buf = BytesMut::with_capacity(4096);
    loop {
        let n = stream.read_buf(&mut response_buf).await?;
        if n == 0 {
            anyhow::bail!("servidor fechou a conexão");
        }

        let mut cursor = std::io::Cursor::new(&response_buf[..]);
        if Frame::check(&mut cursor).is_ok() {
            cursor.set_position(0);
            return Frame::parse(&mut cursor).map_err(|e| anyhow::anyhow!("parse error: {e}"));
        }
    }
}

/// Quebra a linha em tokens respeitando aspas simples e duplas.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) if c == '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('t') => current.push('\t'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Formata um frame para exibição humana. Arrays aninhados são indentados.
fn format_frame(frame: &Frame, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match frame {
        Frame::Simple(s) => format!("{pad}{s}"),
        Frame::Error(s) => format!("{pad}(error) {s}"),
        Frame::Integer(n) => format!("{pad}(integer) {n}"),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) => format!("{pad}\"{s}\""),
            Err(_) => format!("{pad}(binary) {} bytes", data.len()),
        },
        Frame::Null => format!("{pad}(nil)"),
        Frame::Array(frames) if frames.is_empty() => format!("{pad}(empty array)"),
        Frame::Array(frames) => frames
            .iter()
            .enumerate()
            .map(|(i, f)| match f {
                Frame::Array(inner) if !inner.is_empty() => {
                    format!("{pad}{})\n{}", i + 1, format_frame(f, indent + 3))
                }
                _ => format!("{pad}{}) {}", i + 1, format_frame(f, 0)),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
