/// Erros de parsing do protocolo RESP.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame incompleto")]
    Incomplete,
    #[error("byte de tipo inválido: {0:#x}")]
    InvalidFrameType(u8),
    #[error("inteiro inválido: {0}")]
    InvalidInteger(String),
    #[error("comprimento de bulk inválido: {0}")]
    InvalidBulkLength(i64),
    #[error("frame excede tamanho máximo ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("encoding inválido: {0}")]
    InvalidEncoding(String),
}

/// Erros do Entry Store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Camada de persistência indisponível. A operação foi abortada e o
    /// estado em memória não foi alterado.
    #[error("persistência indisponível: {0}")]
    Io(String),
    #[error("id de entrada vazio")]
    EmptyId,
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Falhas nas chamadas ao gerenciador de recursos do host.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// O recurso já não existe no host. Não é falha: vira reconciliação.
    #[error("recurso já não existe")]
    Gone,
    #[error("chamada ao host falhou: {0}")]
    Failed(String),
    #[error("chamada ao host excedeu o timeout de {0}ms")]
    Timeout(u64),
}

impl HostError {
    pub fn is_gone(&self) -> bool {
        matches!(self, HostError::Gone)
    }
}

/// Erros do armazenamento de configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O de configuração: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuração ilegível: {0}")]
    Parse(String),
    #[error("configuração inválida: {0}")]
    Invalid(String),
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("host não respondeu em {0}ms")]
    HostTimeout(u64),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocolo: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Erros de parsing/validação de comandos.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("número errado de argumentos para '{0}'")]
    WrongArity(String),
    #[error("campo de configuração desconhecido: {0}")]
    UnknownSetting(String),
    #[error("argumento inválido: {0}")]
    InvalidArgument(String),
}

/// Erro top-level do Reaper.
#[derive(Debug, thiserror::Error)]
pub enum ReaperError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Result type alias.
pub type ReaperResult<T> = Result<T, ReaperError>;
