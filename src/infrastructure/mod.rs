pub mod logging;
pub mod paths;
pub mod transfer;

pub use logging::init_logging;
pub use paths::{dir_size, is_path_within_directory, remove_path_within};
pub use transfer::{copy_with_progress, StreamAccess, TransferProgress};
