//! Terminal rendering of ingestion progress.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ragkb_core::{IngestionReport, ProgressReporter};
use ragkb_shared::{RagKbError, RunState};

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Progress reporter using an indicatif spinner.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

fn phase_label(state: RunState) -> &'static str {
    match state {
        RunState::Configuring => "Loading configuration",
        RunState::Binding => "Building components",
        RunState::Validating => "Checking collection",
        RunState::Extracting => "Extracting documents",
        RunState::Cleaning => "Cleaning documents",
        RunState::Splitting => "Splitting into chunks",
        RunState::Embedding => "Embedding chunks",
        RunState::Loading => "Writing vectors",
        other => other.as_str(),
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, state: RunState) {
        if state == RunState::Failed {
            self.spinner.finish_and_clear();
            return;
        }
        self.spinner.set_message(phase_label(state).to_string());
    }

    fn source_done(&self, source: &str, result: Result<usize, &RagKbError>) {
        match result {
            Ok(n) => self.spinner.println(format!("  ✓ {source}: {n} documents")),
            Err(e) => self
                .spinner
                .println(format!("  ✗ {source}: {} ({})", e, e.kind())),
        }
    }

    fn batch_embedded(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Embedding [{current}/{total}]"));
    }

    fn batch_written(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Writing [{current}/{total}]"));
    }

    fn done(&self, _report: &IngestionReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_cover_setup_phases() {
        assert_eq!(phase_label(RunState::Configuring), "Loading configuration");
        assert_eq!(phase_label(RunState::Binding), "Building components");
        assert_eq!(phase_label(RunState::Completed), "completed");
    }

    #[test]
    fn failed_phase_stops_the_spinner() {
        let progress = CliProgress::new();
        progress.phase(RunState::Extracting);
        progress.phase(RunState::Failed);
        assert!(progress.spinner.is_finished());
    }
}
