//! Interface de linha de comando do GARIMPO baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (extract, sessions,
//! status, clean) e flags globais (--checkpoint-dir, --verbose). As flags
//! apenas montam configuração e alvo; nenhuma decisão de engine mora aqui.

use clap::{Parser, Subcommand};

/// GARIMPO — extrator resiliente de posts de feeds de perfil.
#[derive(Debug, Parser)]
#[command(name = "garimpo", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Diretório de checkpoints (sobrepõe o garimpo.toml).
    #[arg(long, global = true)]
    pub checkpoint_dir: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extrai os posts de um perfil para um documento Markdown.
    Extract {
        /// Endereço do perfil (https://<host>/in/<handle>).
        profile_url: String,

        /// Arquivo ou diretório de saída.
        #[arg(long, short, default_value = ".")]
        output: String,

        /// Descarta qualquer checkpoint existente e começa do zero.
        #[arg(long, default_value_t = false)]
        fresh: bool,

        /// Limite de posts coletados nesta sessão.
        #[arg(long)]
        max_posts: Option<u64>,

        /// Desliga a pausa entre lotes (chave de override do operador).
        #[arg(long, default_value_t = false)]
        no_pacing: bool,
    },

    /// Lista as sessões gravadas e seus status.
    Sessions,

    /// Mostra o estado do checkpoint de um perfil.
    Status {
        /// Endereço do perfil.
        profile_url: String,

        /// Saída usada na sessão original (participa da identidade).
        #[arg(long, short, default_value = ".")]
        output: String,
    },

    /// Remove registros de sessão antigos.
    Clean {
        /// Idade mínima, em dias, dos registros removidos.
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
}
