//! UI capability boundary.
//!
//! The core never talks to a terminal directly; everything interactive goes
//! through the [`Ui`] trait, one implementation injected per run. The
//! console implementation lives in [`console`]; tests inject their own
//! fakes or use [`SilentUi`].

mod console;

pub use console::ConsoleUi;

use std::path::{Path, PathBuf};

/// Interactive capabilities the core calls out to.
///
/// Prompt methods return `None` when the user backs out, which callers
/// treat as cancellation. [`cancelled`](Self::cancelled) is polled
/// cooperatively at step boundaries; it must be cheap.
pub trait Ui: Send + Sync {
    /// Asks a yes/no question.
    fn confirm(&self, message: &str) -> bool;

    /// Asks for free-text input with an initial value.
    fn input(&self, message: &str, initial: &str) -> Option<String>;

    /// Asks for a choice from a labeled list; `default` is the preselected
    /// entry. Returns the chosen index.
    fn choose(&self, message: &str, options: &[String], default: usize) -> Option<usize>;

    /// Asks for a path to save the output to, starting in `dir`.
    fn save_path(&self, dir: &Path) -> Option<PathBuf>;

    /// Reports progress: `current` of `maximum` units of `label`.
    fn progress(&self, label: &str, current: u64, maximum: u64);

    /// Whether the user has requested cancellation.
    fn cancelled(&self) -> bool;

    /// Shows an informational message.
    fn notify(&self, message: &str);

    /// Shows an error message.
    fn error(&self, message: &str);
}

/// Non-interactive implementation: accepts defaults, never cancels,
/// swallows progress. Menu choices take the default entry.
#[derive(Debug, Default)]
pub struct SilentUi;

impl Ui for SilentUi {
    fn confirm(&self, _message: &str) -> bool {
        true
    }

    fn input(&self, _message: &str, _initial: &str) -> Option<String> {
        None
    }

    fn choose(&self, _message: &str, options: &[String], default: usize) -> Option<usize> {
        if options.is_empty() {
            None
        } else {
            Some(default.min(options.len() - 1))
        }
    }

    fn save_path(&self, _dir: &Path) -> Option<PathBuf> {
        None
    }

    fn progress(&self, _label: &str, _current: u64, _maximum: u64) {}

    fn cancelled(&self) -> bool {
        false
    }

    fn notify(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}
