//! Terminal implementation of the UI boundary.
//!
//! Progress rendering uses an indicatif bar; prompts read stdin lines. A
//! shared atomic flag, flipped by the binary's Ctrl-C handler, drives the
//! cancellation poll.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

use super::Ui;

/// Console UI backed by stdin/stderr prompts and an indicatif progress bar.
pub struct ConsoleUi {
    cancel: Arc<AtomicBool>,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleUi {
    /// Creates a console UI polling the given cancellation flag.
    #[must_use]
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            bar: Mutex::new(None),
        }
    }

    /// Clears any active progress bar, e.g. before printing a final message.
    pub fn finish_progress(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn read_line(prompt: &str) -> Option<String> {
        eprint!("{prompt} ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Ui for ConsoleUi {
    fn confirm(&self, message: &str) -> bool {
        matches!(
            Self::read_line(&format!("{message} [y/N]")).as_deref(),
            Some("y") | Some("Y") | Some("yes")
        )
    }

    fn input(&self, message: &str, initial: &str) -> Option<String> {
        let prompt = if initial.is_empty() {
            message.to_string()
        } else {
            format!("{message} [{initial}]")
        };
        let line = Self::read_line(&prompt)?;
        if line.is_empty() {
            if initial.is_empty() {
                None
            } else {
                Some(initial.to_string())
            }
        } else {
            Some(line)
        }
    }

    fn choose(&self, message: &str, options: &[String], default: usize) -> Option<usize> {
        if options.is_empty() {
            return None;
        }
        let default = default.min(options.len() - 1);
        eprintln!("{message}");
        for (i, option) in options.iter().enumerate() {
            let marker = if i == default { "*" } else { " " };
            eprintln!("  {marker} {}) {option}", i + 1);
        }
        let line = Self::read_line(&format!("Choice [{}]:", default + 1))?;
        if line.is_empty() {
            return Some(default);
        }
        match line.parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => Some(n - 1),
            _ => Some(default),
        }
    }

    fn save_path(&self, dir: &Path) -> Option<PathBuf> {
        let line = Self::read_line(&format!("Save to [{}]:", dir.display()))?;
        if line.is_empty() {
            None
        } else {
            Some(PathBuf::from(line))
        }
    }

    fn progress(&self, label: &str, current: u64, maximum: u64) {
        let Ok(mut guard) = self.bar.lock() else {
            return;
        };
        let bar = guard.get_or_insert_with(|| {
            let bar = ProgressBar::new(maximum);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        });
        bar.set_length(maximum);
        bar.set_position(current);
        bar.set_message(label.to_string());
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn notify(&self, message: &str) {
        self.finish_progress();
        eprintln!("{message}");
    }

    fn error(&self, message: &str) {
        self.finish_progress();
        eprintln!("error: {message}");
    }
}
