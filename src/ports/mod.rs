pub mod config;
pub mod external_provider;
pub mod http;
pub mod model_source;

pub use config::ConfigStore;
pub use external_provider::ExternalModelProvider;
pub use http::{HttpClient, ProgressCallback};
pub use model_source::ModelFileSource;
