use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use reaper_common::{ConfigError, DEFAULT_IDLE_THRESHOLD_MS, DEFAULT_SWEEP_INTERVAL_MS};
use reaper_protocol::PolicyUpdate;

/// Política de expiração editável pelo usuário.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Entradas ociosas há mais que isso são candidatas a remoção.
    pub idle_threshold_ms: u64,
    /// Cadência da varredura.
    pub sweep_interval_ms: u64,
    /// Entradas protegidas nunca são removidas.
    pub exempt_protected: bool,
    /// Com `false` as varreduras são suspensas.
    pub enabled: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: DEFAULT_IDLE_THRESHOLD_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            exempt_protected: true,
            enabled: true,
        }
    }
}

impl PolicyConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Período do timer de varredura; `None` enquanto desabilitado.
    pub fn sweep_period(&self) -> Option<Duration> {
        self.enabled.then(|| self.sweep_interval())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle-threshold-ms deve ser positivo".into(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep-interval-ms deve ser positivo".into(),
            ));
        }
        Ok(())
    }

    /// Aplica uma atualização parcial, validando o resultado.
    pub fn merged(&self, update: &PolicyUpdate) -> Result<PolicyConfig, ConfigError> {
        let next = PolicyConfig {
            idle_threshold_ms: update.idle_threshold_ms.unwrap_or(self.idle_threshold_ms),
            sweep_interval_ms: update.sweep_interval_ms.unwrap_or(self.sweep_interval_ms),
            exempt_protected: update.exempt_protected.unwrap_or(self.exempt_protected),
            enabled: update.enabled.unwrap_or(self.enabled),
        };
        next.validate()?;
        Ok(next)
    }
}

/// Registro durável da política. Leitura sempre responde a última
/// configuração conhecida; falhas de leitura caem nos padrões.
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<PolicyConfig>,
}

impl ConfigStore {
    /// Configuração apenas em memória.
    pub fn in_memory(config: PolicyConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(config),
        }
    }

    /// Carrega do arquivo. Nunca falha: arquivo ausente, ilegível ou
    /// inválido resulta nos padrões, com log.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match read_file(&path).await {
            Ok(Some(config)) => {
                info!("configuração carregada de {:?}", path);
                config
            }
            Ok(None) => {
                info!("configuração ausente em {:?}, usando padrões", path);
                PolicyConfig::default()
            }
            Err(e) => {
                warn!("falha ao ler configuração {:?}: {e}; usando padrões", path);
                PolicyConfig::default()
            }
        };

        Self {
            path: Some(path),
            current: RwLock::new(config),
        }
    }

    pub async fn read(&self) -> PolicyConfig {
        *self.current.read().await
    }

    /// Mescla, valida e persiste. Em caso de erro nada muda.
    pub async fn write(&self, update: &PolicyUpdate) -> Result<PolicyConfig, ConfigError> {
        let mut current = self.current.write().await;
        let next = current.merged(update)?;

        if let Some(ref path) = self.path {
            write_file(path, &next).await?;
        }

        *current = next;
        Ok(next)
    }
}

async fn read_file(path: &Path) -> Result<Option<PolicyConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).await?;
    let config: PolicyConfig =
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(Some(config))
}

/// Escreve num arquivo temporário e renomeia por cima do destino.
async fn write_file(path: &Path, config: &PolicyConfig) -> Result<(), ConfigError> {
    let tmp_path = path.with_extension("tmp");
    let json =
        serde_json::to_vec_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    fs::write(&tmp_path, json).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}
