pub mod file_info;
pub mod walker;

pub use file_info::{SourceTier, get_utc_timestamp, looks_binary};
pub use walker::{FileWalker, IGNORE_FILE_NAME};
