//! Interface de terminal do GARIMPO — spinner de progresso e veredicto.
//!
//! Usa as crates `indicatif` para o spinner e `console` para estilização
//! com cores. O [`ExtractionProgress`] acompanha visualmente a sessão de
//! extração: uma tarefa observadora lê snapshots do contador de progresso
//! em intervalos fixos, sem bloquear o loop de extração.

use std::sync::Arc;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use crate::cancel::CancelFlag;
use crate::engine::{SessionReport, SessionVerdict};
use crate::progress::{ProgressAccountant, ProgressSnapshot};

/// Indicador visual de progresso para uma sessão de extração.
pub struct ExtractionProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para sucesso.
    green: Style,
    // Estilo vermelho para falha.
    red: Style,
    // Estilo amarelo para resultados parciais e interrupções.
    yellow: Style,
}

impl ExtractionProgress {
    /// Inicia o spinner para o perfil dado.
    pub fn start(handle: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("Extracting posts from {handle}..."));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Lança a tarefa observadora que atualiza a mensagem do spinner a cada
    /// meio segundo a partir de [`ProgressAccountant::snapshot`].
    pub fn spawn_observer(
        &self,
        progress: Arc<ProgressAccountant>,
        cancel: CancelFlag,
    ) -> JoinHandle<()> {
        let pb = self.pb.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {
                        pb.set_message(format_snapshot(&progress.snapshot()));
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Finaliza o spinner e exibe o veredicto da sessão.
    pub fn complete(&self, report: &SessionReport) {
        self.pb.finish_and_clear();
        match &report.verdict {
            SessionVerdict::Completed { collected } => {
                println!(
                    "  {} Extraction completed: {collected} posts",
                    self.green.apply_to("✓")
                );
            }
            SessionVerdict::CompletedEmpty => {
                println!(
                    "  {} Nothing to collect: the feed has no posts",
                    self.green.apply_to("✓")
                );
            }
            SessionVerdict::CompletedPartial {
                collected,
                skipped_pages,
            } => {
                println!(
                    "  {} Partial extraction: {collected} posts, {skipped_pages} pages skipped",
                    self.yellow.apply_to("!")
                );
            }
            SessionVerdict::Interrupted { collected } => {
                println!(
                    "  {} Interrupted: {collected} posts saved in checkpoint {} (re-run to resume)",
                    self.yellow.apply_to("↻"),
                    report.session_id
                );
            }
            SessionVerdict::Failed { cause } => {
                println!("  {} Extraction failed: {cause}", self.red.apply_to("✗"));
            }
        }
    }
}

// Linha de status: tempo e contadores sempre, percentual e ETA só quando
// conhecidos.
fn format_snapshot(snap: &ProgressSnapshot) -> String {
    let mut parts = vec![
        format_duration(snap.elapsed),
        format!("{} posts", snap.items_collected),
        format!("{:.1}/min", snap.rate_per_minute),
    ];
    if snap.items_attempted > snap.items_collected {
        parts.push(format!(
            "{} items unreadable",
            snap.items_attempted - snap.items_collected
        ));
    }
    if let Some(percent) = snap.percent_complete {
        parts.push(format!("{percent:.0}%"));
    }
    if let Some(eta) = snap.eta {
        parts.push(format!("ETA {}", format_duration(eta)));
    }
    if snap.errors > 0 {
        parts.push(format!("{} errors", snap.errors));
    }
    parts.join(" · ")
}

fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
