use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sandforge_common::{FileAction, PackageStage, ProgressEvent};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::ui::icons::{
    CHECK, COMMAND, CROSS, FILE_MOD, FILE_NEW, PACKAGE, SPARKLE, THINKING, WARN,
};

const SNIPPET_CHARS: usize = 100;

/// Terminal rendering of one conversation turn.
///
/// A spinner tracks the generation stream; everything else is printed
/// above it as one line per event.
pub struct TurnUI {
    spinner: Mutex<ProgressBar>,
    verbose: bool,
    streamed: AtomicUsize,
}

impl TurnUI {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::hidden();
        spinner.finish();
        Self {
            spinner: Mutex::new(spinner),
            verbose,
            streamed: AtomicUsize::new(0),
        }
    }

    /// Start a fresh spinner for a new turn.
    pub fn start_turn(&self, prompt: &str) {
        let spinner = ProgressBar::new_spinner();
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(spinner_style);
        spinner.set_message(format!("Generating {}", style(snippet(prompt)).dim()));
        spinner.enable_steady_tick(Duration::from_millis(100));

        self.streamed.store(0, Ordering::SeqCst);
        let previous = match self.spinner.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, spinner),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), spinner),
        };
        previous.finish_and_clear();
    }

    pub fn handle(&self, event: &ProgressEvent) {
        if let ProgressEvent::Stream { text } = event {
            let total = self.streamed.fetch_add(text.len(), Ordering::SeqCst) + text.len();
            self.spinner().set_message(format!(
                "Generating {}",
                style(format!("({} bytes)", total)).dim()
            ));
        }

        if let Some(line) = describe(event, self.verbose) {
            self.print_line(line);
        }
    }

    pub fn finish(&self) {
        self.spinner().finish_and_clear();
    }

    fn spinner(&self) -> ProgressBar {
        match self.spinner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        let spinner = self.spinner();
        if spinner.is_hidden() || spinner.is_finished() {
            eprintln!("{}", msg.as_ref());
        } else {
            spinner.println(msg.as_ref());
        }
    }
}

/// The line printed for `event`, if any. Thinking and skipped packages only
/// show in verbose mode; raw stream chunks never do.
pub fn describe(event: &ProgressEvent, verbose: bool) -> Option<String> {
    match event {
        ProgressEvent::Thinking { text } => {
            verbose.then(|| format!("  {}{}", THINKING, style(snippet(text)).dim()))
        }
        ProgressEvent::Conversation { text } => {
            let text = text.trim();
            (!text.is_empty()).then(|| format!("  {}", text))
        }
        ProgressEvent::Stream { .. } => None,
        ProgressEvent::FileComplete { path, bytes, .. } => verbose.then(|| {
            format!(
                "  {} {} {}",
                style("generated").dim(),
                path,
                style(format!("({} bytes)", bytes)).dim()
            )
        }),
        ProgressEvent::FileProgress {
            path,
            action,
            current,
            total,
        } => {
            let counter = style(format!("[{}/{}]", current, total)).dim();
            Some(match action {
                FileAction::Created => {
                    format!("  {} {}{}", counter, FILE_NEW, style(path).green())
                }
                FileAction::Edited => {
                    format!("  {} {}{}", counter, FILE_MOD, style(path).yellow())
                }
                FileAction::Failed => format!("  {} {}{}", counter, CROSS, style(path).red()),
            })
        }
        ProgressEvent::PackageProgress {
            stage,
            packages,
            message,
        } => {
            let names = packages.join(", ");
            match stage {
                PackageStage::Started => Some(format!("  {}Installing {}", PACKAGE, names)),
                PackageStage::Installed => {
                    Some(format!("  {}Installed {}", CHECK, style(names).green()))
                }
                PackageStage::Failed => Some(format!(
                    "  {}Failed to install {}{}",
                    CROSS,
                    style(names).red(),
                    message
                        .as_ref()
                        .map(|m| format!(" {}", style(format!("({})", m)).dim()))
                        .unwrap_or_default()
                )),
                PackageStage::Skipped => verbose.then(|| {
                    format!("  {}", style(format!("Already installed: {}", names)).dim())
                }),
            }
        }
        ProgressEvent::CommandProgress {
            command,
            exit_code,
            output,
        } => match exit_code {
            None => Some(format!("  {}{}", COMMAND, style(command).cyan())),
            Some(code) => {
                let mut line = if *code == 0 {
                    format!("  {}{} exited with 0", CHECK, command)
                } else {
                    format!(
                        "  {}{} exited with {}",
                        CROSS,
                        command,
                        style(code).red()
                    )
                };
                if let Some(output) = output.as_deref().map(str::trim)
                    && !output.is_empty()
                {
                    for out in output.lines() {
                        line.push_str(&format!("\n    {}", style(out).dim()));
                    }
                }
                Some(line)
            }
        },
        ProgressEvent::Complete {
            created,
            edited,
            installed,
            failed_packages,
        } => {
            let mut line = format!(
                "{}Done: {} created, {} edited, {} installed",
                SPARKLE,
                style(created.len()).green(),
                style(edited.len()).yellow(),
                style(installed.len()).cyan()
            );
            if !failed_packages.is_empty() {
                line.push_str(&format!(
                    ", {} failed ({})",
                    style(failed_packages.len()).red(),
                    failed_packages.join(", ")
                ));
            }
            Some(line)
        }
        ProgressEvent::Error {
            message,
            recoverable,
        } => Some(if *recoverable {
            format!("{}{}", WARN, style(message).yellow())
        } else {
            format!("{}{}", CROSS, style(message).red().bold())
        }),
    }
}

fn snippet(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > SNIPPET_CHARS {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
