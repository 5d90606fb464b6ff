//! Interface de terminal do stemsplit — barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! um job de separação consultado no servidor.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::state_machine::{JobStatus, JobView};

/// Indicador visual de progresso para um job de separação.
///
/// Exibe uma barra de 0 a 100 durante o processamento e mensagens
/// coloridas para sucesso (verde) e falha (vermelho).
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    dim: Style,
}

impl JobProgress {
    /// Inicia a barra para o job informado.
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(format!("starting {job_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza a barra com o estado mais recente do job.
    pub fn update(&self, view: &JobView) {
        self.pb.set_position(u64::from(view.progress));
        self.pb.set_message(view.status.to_string());
    }

    /// Finaliza a barra e exibe o resultado final do job.
    ///
    /// `url_for` converte a URL relativa de cada arquivo em uma URL completa.
    pub fn complete(&self, view: &JobView, url_for: impl Fn(&str) -> String) {
        self.pb.finish_and_clear();
        match view.status {
            JobStatus::Done => {
                println!(
                    "  {} Separation finished ({} files)",
                    self.green.apply_to("✓"),
                    view.files.len()
                );
                for file in &view.files {
                    println!("    {} {}", file.name, self.dim.apply_to(url_for(&file.url)));
                }
            }
            JobStatus::Error => {
                let message = view.error.as_deref().unwrap_or("unknown error");
                println!(
                    "  {} Separation failed at {}%: {message}",
                    self.red.apply_to("✗"),
                    view.progress
                );
            }
            _ => {}
        }
    }
}
