pub mod config_store;
pub mod http_client;
pub mod manifest_store;
pub mod model_information;
pub mod ollama;

pub use config_store::TomlConfigStore;
pub use http_client::GuardedHttpClient;
pub use manifest_store::{ModelCacheStore, StoreEvent};
pub use model_information::{filter_files, RemoteModelFiles};
pub use ollama::{parse_file_size, parse_ollama_list, OllamaProvider};
