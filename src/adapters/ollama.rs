use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{DomainError, HardwareAccelerator, ModelDetails};
use crate::ports::ExternalModelProvider;

const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of `ollama list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaModel {
    pub name: String,
    pub tag: String,
    pub id: String,
    pub size: String,
    pub modified: String,
}

impl OllamaModel {
    pub fn to_details(&self) -> ModelDetails {
        let mut details = ModelDetails::new(
            format!("ollama-{}", self.id),
            self.name.clone(),
            format!("ollama://{}:{}", self.name, self.tag),
        );
        details.description = format!("{}:{} running locally via Ollama", self.name, self.tag);
        details.hardware_accelerators = vec![HardwareAccelerator::Ollama];
        details.size = parse_file_size(&self.size);
        details
    }
}

/// Parse the table printed by `ollama list`.
///
/// The first line is a header. Columns are separated by runs of two or more
/// spaces; rows without exactly four columns are skipped.
pub fn parse_ollama_list(output: &str) -> Vec<OllamaModel> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let tokens: Vec<&str> = line
                .split("  ")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
            if tokens.len() != 4 {
                return None;
            }

            let (name, tag) = match tokens[0].split_once(':') {
                Some((name, tag)) => (name, tag),
                None => (tokens[0], "latest"),
            };

            Some(OllamaModel {
                name: name.to_string(),
                tag: tag.to_string(),
                id: tokens[1].to_string(),
                size: tokens[2].to_string(),
                modified: tokens[3].to_string(),
            })
        })
        .collect()
}

/// Parse a human-readable size such as `"4.7 GB"` into bytes (base 2).
///
/// Unparseable input yields 0.
pub fn parse_file_size(text: &str) -> u64 {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let unit = unit.trim();

    if number.is_empty() || unit.is_empty() || !unit.chars().all(|c| c.is_ascii_alphabetic()) {
        return 0;
    }

    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };

    let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        "PB" => 1 << 50,
        _ => return 0,
    };

    (number * multiplier as f64) as u64
}

/// Models served by a local Ollama installation.
pub struct OllamaProvider {
    program: String,
    ready: AtomicBool,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self::with_program("ollama")
    }

    /// Use a specific executable instead of `ollama` on the PATH.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ready: AtomicBool::new(false),
        }
    }

    async fn run_list(&self) -> Result<String, DomainError> {
        let mut command = Command::new(&self.program);
        command
            .arg("list")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(LIST_TIMEOUT, command.output())
            .await
            .map_err(|_| DomainError::Provider(format!("{} list timed out", self.program)))?
            .map_err(|e| DomainError::Provider(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(DomainError::Provider(format!(
                "{} list exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.ready.store(true, Ordering::SeqCst);
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExternalModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn url_prefix(&self) -> &str {
        "ollama://"
    }

    async fn is_ready(&self) -> bool {
        if self.ready.load(Ordering::SeqCst) {
            return true;
        }
        match self.run_list().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Ollama not available");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelDetails>, DomainError> {
        let output = self.run_list().await?;
        let models: Vec<ModelDetails> = parse_ollama_list(&output)
            .iter()
            .map(OllamaModel::to_details)
            .collect();
        debug!(count = models.len(), "Listed Ollama models");
        Ok(models)
    }

    async fn download(
        &self,
        details: &ModelDetails,
        progress: Option<&(dyn Fn(f32) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, DomainError> {
        let name = details
            .url
            .get(self.url_prefix().len()..)
            .filter(|_| self.handles(&details.url))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DomainError::invalid_argument("url", "not an Ollama model URL"))?;

        info!(model = name, "Pulling Ollama model");

        let mut command = Command::new(&self.program);
        command
            .args(["pull", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DomainError::Canceled),
            output = command.output() => output
                .map_err(|e| DomainError::Provider(format!("failed to run {}: {}", self.program, e)))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(model = name, status = %output.status, "Ollama pull failed");
            return Err(DomainError::Provider(format!("ollama pull {} failed: {}", name, stderr)));
        }

        self.ready.store(true, Ordering::SeqCst);
        if let Some(report) = progress {
            report(1.0);
        }
        Ok(None)
    }
}
