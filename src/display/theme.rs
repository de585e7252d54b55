//! Consistent color theme for terminal output.

use console::Style;
use std::io::IsTerminal;
use std::sync::LazyLock;

pub static THEME: LazyLock<Theme> = LazyLock::new(Theme::default);

#[derive(Debug, Clone)]
pub struct Theme {
    pub success: Style,
    pub error: Style,
    pub warning: Style,
    pub header: Style,
    pub dim: Style,
    /// File paths
    pub path: Style,
    pub number: Style,
    /// Unit identifiers
    pub code: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            success: Style::new().green().bright(),
            error: Style::new().red().bright(),
            warning: Style::new().yellow().bright(),
            header: Style::new().cyan().bold(),
            dim: Style::new().dim(),
            path: Style::new().magenta(),
            number: Style::new().cyan(),
            code: Style::new().yellow(),
        }
    }
}

impl Theme {
    pub fn success_with_icon(&self, text: &str) -> String {
        format!("✓ {}", self.apply(&self.success, text))
    }

    pub fn error_with_icon(&self, text: &str) -> String {
        format!("✗ {}", self.apply(&self.error, text))
    }

    pub fn warning_with_icon(&self, text: &str) -> String {
        format!("⚠ {}", self.apply(&self.warning, text))
    }

    /// `NO_COLOR` or a non-terminal stdout turns styling off.
    pub fn should_disable_colors() -> bool {
        std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal()
    }

    pub fn apply<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if Self::should_disable_colors() {
            text.to_string()
        } else {
            style.apply_to(text).to_string()
        }
    }
}
