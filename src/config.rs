//! Configuração do GARIMPO carregada a partir de `garimpo.toml`.
//!
//! A struct [`GarimpoConfig`] contém todos os parâmetros ajustáveis pelo
//! operador: intervalos de checkpoint, política de retentativa e backoff,
//! limiares do circuit breaker e da degradação parcial.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `GARIMPO_FEED_BASE_URL` tem precedência sobre o
//! arquivo para o endpoint do feed.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuração de nível superior carregada de `garimpo.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct GarimpoConfig {
    /// URL base do endpoint de feed paginado.
    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,

    /// Diretório onde os checkpoints de sessão são gravados.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Intervalo de relógio entre checkpoints automáticos, em segundos.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    /// Checkpoint adicional a cada N lotes processados.
    #[serde(default = "default_checkpoint_every_batches")]
    pub checkpoint_every_batches: u32,

    /// Máximo de tentativas por operação antes de desistir.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplicador do backoff exponencial.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Teto do atraso de backoff, em milissegundos.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fração uniforme de jitter aplicada sobre cada atraso (0.0 desliga).
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    /// Falhas consecutivas que abrem o circuit breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// Tempo de resfriamento do breaker aberto, em segundos.
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    /// Páginas com falha consecutivas antes de encerrar com resultado parcial.
    #[serde(default = "default_max_failed_pages")]
    pub max_failed_pages: u32,

    /// Limite opcional de posts coletados por sessão.
    #[serde(default)]
    pub max_posts: Option<u64>,

    /// Pausa entre lotes, em milissegundos (ritmo conservador de requisições).
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Janela deslizante do cálculo de taxa de progresso, em segundos.
    #[serde(default = "default_progress_window_secs")]
    pub progress_window_secs: u64,

    /// Prazo de graça para o desligamento após um pedido de interrupção, em segundos.
    #[serde(default = "default_grace_timeout_secs")]
    pub grace_timeout_secs: u64,
}

// Valor padrão para o endpoint do feed.
fn default_feed_base_url() -> String {
    "https://feed.garimpo.dev".to_string()
}

// Valor padrão para o diretório de checkpoints.
fn default_checkpoint_dir() -> String {
    "checkpoints".to_string()
}

// Valor padrão para o intervalo de checkpoint: 30s.
fn default_checkpoint_interval_secs() -> u64 {
    30
}

// Checkpoint após cada lote por padrão.
fn default_checkpoint_every_batches() -> u32 {
    1
}

// Valor padrão para tentativas máximas: 3.
fn default_max_attempts() -> u32 {
    3
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Teto de 60s por atraso.
fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_fraction() -> f64 {
    0.5
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    30
}

fn default_max_failed_pages() -> u32 {
    3
}

fn default_pacing_ms() -> u64 {
    500
}

fn default_progress_window_secs() -> u64 {
    60
}

fn default_grace_timeout_secs() -> u64 {
    5
}

impl Default for GarimpoConfig {
    fn default() -> Self {
        Self {
            feed_base_url: default_feed_base_url(),
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            checkpoint_every_batches: default_checkpoint_every_batches(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter_fraction(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            max_failed_pages: default_max_failed_pages(),
            max_posts: None,
            pacing_ms: default_pacing_ms(),
            progress_window_secs: default_progress_window_secs(),
            grace_timeout_secs: default_grace_timeout_secs(),
        }
    }
}

impl GarimpoConfig {
    /// Carrega a configuração de `garimpo.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("garimpo.toml"))
    }

    /// Carrega a configuração de um caminho específico.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<GarimpoConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(url) = std::env::var("GARIMPO_FEED_BASE_URL")
            && !url.is_empty()
        {
            config.feed_base_url = url;
        }

        Ok(config)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn pacing(&self) -> Option<Duration> {
        (self.pacing_ms > 0).then(|| Duration::from_millis(self.pacing_ms))
    }

    pub fn progress_window(&self) -> Duration {
        Duration::from_secs(self.progress_window_secs)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }
}
