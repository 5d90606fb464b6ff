//! Configuração do stemsplit carregada a partir de `stemsplit.toml`.
//!
//! A struct [`StemsplitConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PORT` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{DemucsEngine, OutputLayout};
use crate::service::ServiceSettings;
use crate::state_machine::ProgressPolicy;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "stemsplit.toml";

/// Configuração de nível superior carregada de `stemsplit.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StemsplitConfig {
    /// Endereço em que o servidor HTTP escuta.
    pub host: String,

    /// Porta do servidor HTTP.
    pub port: u16,

    /// Diretório onde os uploads são gravados.
    pub upload_dir: PathBuf,

    /// Diretório raiz das saídas do motor de separação, servido em `/outputs`.
    pub output_dir: PathBuf,

    /// Diretório opcional do frontend, servido em `/static`.
    pub frontend_dir: PathBuf,

    /// Executável do motor de separação.
    pub engine_program: String,

    /// Argumentos extras passados ao motor após `-o <saída>`.
    pub engine_args: Vec<String>,

    /// Subdiretório em que o motor grava os stems (nome do modelo).
    pub model_namespace: String,

    /// Extensão dos arquivos de resultado.
    pub result_extension: String,

    /// Intervalo entre verificações do processo, em milissegundos.
    pub poll_interval_ms: u64,

    /// Incremento do progresso sintético a cada verificação.
    pub progress_step: u8,

    /// Teto do progresso sintético enquanto o motor roda.
    pub progress_ceiling: u8,

    /// Máximo de jobs executando ao mesmo tempo.
    pub max_concurrent_jobs: usize,

    /// Tamanho máximo de upload em bytes.
    pub max_upload_bytes: usize,

    /// Tempo de retenção de jobs finalizados; ausente = nunca remover.
    pub job_ttl_secs: Option<u64>,
}

impl Default for StemsplitConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            frontend_dir: PathBuf::from("../Frontend"),
            engine_program: "demucs".to_string(),
            engine_args: vec!["--float32".to_string()],
            model_namespace: "htdemucs".to_string(),
            result_extension: "wav".to_string(),
            poll_interval_ms: 1000,
            progress_step: 2,
            progress_ceiling: 90,
            max_concurrent_jobs: 2,
            max_upload_bytes: 512 * 1024 * 1024,
            job_ttl_secs: None,
        }
    }
}

impl StemsplitConfig {
    /// Carrega a configuração de `path`, ou de `stemsplit.toml` no diretório atual.
    /// Sem `path`, usa valores padrão se `stemsplit.toml` não existir; um
    /// caminho explícito inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a porta.
        config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("invalid {}", path.display()))
    }

    /// Aplica o valor de `PORT`, se presente e não vazio.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<()> {
        if let Some(port) = port
            && !port.is_empty()
        {
            self.port = port
                .parse()
                .with_context(|| format!("PORT is not a valid port: {port}"))?;
        }
        Ok(())
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.progress_ceiling >= 95 {
            anyhow::bail!("progress_ceiling must be below 95, got {}", self.progress_ceiling);
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine(&self) -> DemucsEngine {
        DemucsEngine::new(self.engine_program.clone(), self.engine_args.clone())
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(
            self.output_dir.clone(),
            self.model_namespace.clone(),
            self.result_extension.clone(),
        )
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            policy: ProgressPolicy {
                step: self.progress_step,
                ceiling: self.progress_ceiling,
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }

    pub fn job_ttl(&self) -> Option<Duration> {
        self.job_ttl_secs.map(Duration::from_secs)
    }
}
