use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use crate::app::{AppController, DownloadEvent};
use crate::domain::{CachedModel, DomainError, DownloadStatus, HardwareAccelerator, ModelDetails, ModelUrl};
use crate::ports::ExternalModelProvider;

/// Local cache and downloader for AI models.
#[derive(Parser, Debug)]
#[command(name = "modelcache", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List cached models
    List,

    /// Download a model from Hugging Face or GitHub (Ctrl-C cancels)
    Download {
        /// Model URL or `org/repo` Hugging Face id
        url: String,

        /// Only fetch files whose path ends with one of these suffixes
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Display name (defaults to the repository name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove a model from the cache and delete its files
    Delete {
        url: String,
    },

    /// Register a model folder or file that is already on disk
    AddLocal {
        path: PathBuf,

        #[arg(long)]
        name: String,

        /// Hardware accelerator tag, e.g. cpu, gpu, dml, npu
        #[arg(long)]
        accelerator: Option<String>,
    },

    /// Delete every cached model
    Clear,

    /// Show application paths
    Path,

    /// Point the cache at another folder
    SetCache {
        dir: PathBuf,
    },

    /// Move the cache folder and its contents
    MoveCache {
        dir: PathBuf,
    },

    /// List models available from a local Ollama installation
    OllamaModels,
}

/// Execute one CLI command against the controller.
pub async fn run(controller: &AppController, command: Commands) -> Result<(), DomainError> {
    match command {
        Commands::List => list_models(controller),
        Commands::Download { url, filters, name } => download_model(controller, url, filters, name).await,
        Commands::Delete { url } => delete_model(controller, &url),
        Commands::AddLocal { path, name, accelerator } => add_local_model(controller, path, name, accelerator),
        Commands::Clear => {
            controller.cache().clear_cache()?;
            println!("Cache cleared");
            Ok(())
        }
        Commands::Path => {
            let paths = controller.paths();
            println!("data:   {}", paths.data_dir.display());
            println!("config: {}", paths.config_path.display());
            println!("logs:   {}", paths.logs_dir.display());
            println!("cache:  {}", paths.cache_dir.display());
            Ok(())
        }
        Commands::SetCache { dir } => {
            controller.set_cache_folder(&dir)?;
            println!("Cache folder set to {}", dir.display());
            Ok(())
        }
        Commands::MoveCache { dir } => {
            controller.move_cache(&dir)?;
            println!("Cache moved to {}", dir.display());
            Ok(())
        }
        Commands::OllamaModels => {
            for model in controller.provider_models().await {
                println!("{:<40} {:>10}  {}", model.url, format_size(model.size), model.name);
            }
            Ok(())
        }
    }
}

fn list_models(controller: &AppController) -> Result<(), DomainError> {
    let models = controller.cache().models();
    if models.is_empty() {
        println!("No cached models");
        return Ok(());
    }
    for model in &models {
        print_cached(model);
    }
    Ok(())
}

fn print_cached(model: &CachedModel) {
    println!(
        "{:<60} {:>10}  {:?}  {}",
        model.url,
        format_size(model.size),
        model.source,
        model.path.display()
    );
}

async fn download_model(
    controller: &AppController,
    url: String,
    filters: Vec<String>,
    name: Option<String>,
) -> Result<(), DomainError> {
    let details = download_details(url, filters, name, controller.providers())?;

    let Some(download) = controller.cache().add_model_to_download_queue(details)? else {
        println!("Already cached");
        return Ok(());
    };

    let mut events = download.subscribe();
    let finished = download.wait();
    tokio::pin!(finished);
    let mut last_percent = None;

    let status = loop {
        tokio::select! {
            status = &mut finished => break status,
            _ = tokio::signal::ctrl_c() => {
                info!(url = %download.url(), "Interrupted, canceling download");
                controller.cache().queue().cancel_download(&download);
            }
            event = events.recv() => match event {
                Ok(DownloadEvent::StateChanged(state)) => {
                    let percent = (state.progress * 100.0).floor() as u32;
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        print!("\r{:>3}% {}", percent, state.status);
                        let _ = io::stdout().flush();
                    }
                }
                Ok(DownloadEvent::IntegrityFailed { file, verification, .. }) => {
                    println!("\n{} check failed for {}", verification, file);
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {}
            },
        }
    };
    println!();

    match status {
        DownloadStatus::Completed => {
            if let Some(warning) = download.warning_message() {
                println!("Warning: {}", warning);
            }
            match controller.cache().get_cached_model(download.url()) {
                Some(model) => print_cached(&model),
                None => println!("Downloaded {}", download.url()),
            }
            Ok(())
        }
        DownloadStatus::Canceled => Err(DomainError::Canceled),
        other => Err(DomainError::TransferFailure(format!(
            "download of {} ended as {}",
            download.url(),
            other
        ))),
    }
}

/// Build the request for `url`. Provider URLs such as `ollama://` are handed
/// to their provider as-is; anything else must be a repository reference.
fn download_details(
    url: String,
    filters: Vec<String>,
    name: Option<String>,
    providers: &[Arc<dyn ExternalModelProvider>],
) -> Result<ModelDetails, DomainError> {
    if let Some(provider) = providers.iter().find(|p| p.handles(&url)) {
        let model = url[provider.url_prefix().len()..].to_string();
        if model.is_empty() {
            return Err(DomainError::invalid_argument("url", "missing model name"));
        }
        let name = name.unwrap_or_else(|| model.clone());
        return Ok(ModelDetails::new(model, name, url));
    }

    let parsed = ModelUrl::parse(&url)?;
    let name = name.unwrap_or_else(|| parsed.repo().to_string());
    let mut details = ModelDetails::new(format!("{}/{}", parsed.organization(), parsed.repo()), name, url);
    if !filters.is_empty() {
        details.file_filters = Some(filters);
    }
    Ok(details)
}

fn delete_model(controller: &AppController, url: &str) -> Result<(), DomainError> {
    if controller.cache().delete_model_from_cache(url)? {
        println!("Deleted {}", url);
        Ok(())
    } else {
        Err(DomainError::NotFound(url.to_string()))
    }
}

fn add_local_model(
    controller: &AppController,
    path: PathBuf,
    name: String,
    accelerator: Option<String>,
) -> Result<(), DomainError> {
    let mut details = ModelDetails::new(name.clone(), name, "");
    if let Some(tag) = accelerator {
        let accelerator = HardwareAccelerator::from_tag(&tag)
            .ok_or_else(|| DomainError::invalid_argument("accelerator", format!("unknown tag `{}`", tag)))?;
        details.hardware_accelerators = vec![accelerator];
    }

    let cached = controller.cache().add_local_model_to_cache(details, &path)?;
    print_cached(&cached);
    Ok(())
}

/// Render a byte count the way `ollama list` does (base 2).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{parse_file_size, OllamaProvider};

    #[test]
    fn test_parse_download_command() {
        let cli = Cli::try_parse_from([
            "modelcache",
            "download",
            "microsoft/phi-2",
            "--filter",
            ".onnx",
            "-f",
            ".json",
        ])
        .unwrap();

        match cli.command {
            Commands::Download { url, filters, name } => {
                assert_eq!(url, "microsoft/phi-2");
                assert_eq!(filters, vec![".onnx".to_string(), ".json".to_string()]);
                assert_eq!(name, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_provider_urls_skip_repository_parsing() {
        let providers: Vec<Arc<dyn ExternalModelProvider>> = vec![Arc::new(OllamaProvider::new())];

        let details = download_details("ollama://phi3:mini".to_string(), Vec::new(), None, &providers).unwrap();
        assert_eq!(details.url, "ollama://phi3:mini");
        assert_eq!(details.id, "phi3:mini");
        assert_eq!(details.name, "phi3:mini");

        let named =
            download_details("OLLAMA://llama3".to_string(), Vec::new(), Some("Llama".to_string()), &providers)
                .unwrap();
        assert_eq!(named.name, "Llama");

        assert!(download_details("ollama://".to_string(), Vec::new(), None, &providers).is_err());
    }

    #[test]
    fn test_repository_urls_keep_filters() {
        let details = download_details(
            "microsoft/phi-2".to_string(),
            vec![".onnx".to_string()],
            None,
            &[],
        )
        .unwrap();
        assert_eq!(details.id, "microsoft/phi-2");
        assert_eq!(details.name, "phi-2");
        assert_eq!(details.file_filters, Some(vec![".onnx".to_string()]));
    }

    #[test]
    fn test_parse_add_local_requires_name() {
        assert!(Cli::try_parse_from(["modelcache", "add-local", "/models/x"]).is_err());
        let cli = Cli::try_parse_from([
            "modelcache",
            "add-local",
            "/models/x",
            "--name",
            "X",
            "--accelerator",
            "dml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::AddLocal { .. }));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * (1 << 30)), "3.0 GB");
        assert_eq!(parse_file_size(&format_size(5 * (1 << 20))), 5 * (1 << 20));
    }
}
