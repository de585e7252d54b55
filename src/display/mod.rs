//! Terminal output for the CLI: progress bars and a small color theme.

pub mod progress;
pub mod theme;

pub use progress::{create_progress_bar, create_spinner};
pub use theme::{THEME, Theme};
