//! Terminal styling utilities
//!
//! Provides a consistent color scheme across all CLI commands:
//! - Semantic colors for status (green/yellow/red)
//! - Cyan for headers and technical terms
//! - Dim for secondary information

use crossterm::style::Stylize;

/// Extension trait for consistent CLI styling
///
/// Extends crossterm's `Stylize` with semantic styling methods. Use these
/// instead of direct color calls so all commands share one palette.
///
/// # Examples
///
/// ```
/// use audio_policy::style::PolicyStyle;
///
/// println!("{}", "Policy Groups".header());
/// println!("{}", "Running".success());
/// println!("{}", "startswith:alsa_output".technical());
/// ```
pub trait PolicyStyle: Stylize {
    /// Style for section headers (cyan bold)
    fn header(self) -> <<Self as Stylize>::Styled as Stylize>::Styled
    where
        Self: Sized,
        <Self as Stylize>::Styled: Stylize,
    {
        self.cyan().bold()
    }

    /// Style for success/active status (green)
    fn success(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.green()
    }

    /// Style for error/missing status (red)
    fn error(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.red()
    }

    /// Style for warnings and partial states (yellow)
    ///
    /// Used for muted, corked and muted-by-route groups and for diagnostics.
    fn warning(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.yellow()
    }

    /// Style for technical terms and identifiers (cyan)
    fn technical(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.cyan()
    }

    /// Style for counts and volume levels (yellow)
    fn stat(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.yellow()
    }
}

impl<T: Stylize> PolicyStyle for T {}
