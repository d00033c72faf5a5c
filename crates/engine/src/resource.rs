use std::future::Future;

use reaper_common::HostError;

/// Recurso aberto no host, como reportado por `list_open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResource {
    pub id: String,
    pub protected: bool,
}

/// Gerenciador de recursos do host (janelas, abas, sessões...).
///
/// O host também empurra eventos de ciclo de vida para o engine; esta
/// trait cobre só o sentido engine → host.
pub trait ResourceManager: Send + Sync + 'static {
    /// Recursos abertos agora. Usado para semear o store.
    fn list_open(&self) -> impl Future<Output = Result<Vec<OpenResource>, HostError>> + Send;

    /// Pede a destruição do recurso. `HostError::Gone` quando ele já não existe.
    fn destroy(&self, id: &str) -> impl Future<Output = Result<(), HostError>> + Send;
}
