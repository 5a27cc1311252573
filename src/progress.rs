// src/progress.rs

//! Progress reporting per channel.
//!
//! Reporters are purely observational: the scheduler tells them how many
//! nodes each channel has and when one finishes, and never reads anything
//! back.
//!
//! Bars live in one process-wide [`MultiProgress`]; the log writer from
//! [`stderr_writer`] hides them while a line is printed so the two never
//! interleave on the terminal.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::OnceLock;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::warn;

static TERMINAL: OnceLock<MultiProgress> = OnceLock::new();

fn terminal() -> &'static MultiProgress {
    TERMINAL.get_or_init(MultiProgress::new)
}

/// Writer that suspends progress bars for the duration of each write.
pub struct SuspendingWriter<W> {
    multi: MultiProgress,
    inner: W,
}

impl<W: Write> SuspendingWriter<W> {
    pub fn new(multi: MultiProgress, inner: W) -> Self {
        Self { multi, inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for SuspendingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        self.multi.suspend(|| inner.write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let inner = &mut self.inner;
        self.multi.suspend(|| inner.write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Stderr, coordinated with the bars of every [`TerminalProgress`].
pub fn stderr_writer() -> SuspendingWriter<io::Stderr> {
    SuspendingWriter::new(terminal().clone(), io::stderr())
}

/// Sink for per-channel progress.
pub trait ProgressReporter: Send {
    /// Announce a channel and how many nodes it will complete.
    fn register(&mut self, channel: &str, total: u64);

    /// One node of `channel` finished successfully.
    fn advance(&mut self, channel: &str);

    /// The run is over, successful or not.
    fn finish(&mut self) {}
}

/// Reporter that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn register(&mut self, _channel: &str, _total: u64) {}
    fn advance(&mut self, _channel: &str) {}
}

/// One terminal progress bar per channel.
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: Option<ProgressStyle>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let style = match ProgressStyle::default_bar()
            .template("{prefix:>16.bold} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})")
        {
            Ok(s) => Some(s.progress_chars("=>-")),
            Err(e) => {
                warn!(error = %e, "invalid progress template; using default style");
                None
            }
        };

        Self {
            multi: terminal().clone(),
            bars: HashMap::new(),
            style,
        }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TerminalProgress {
    fn register(&mut self, channel: &str, total: u64) {
        let bar = self.multi.add(ProgressBar::new(total));
        if let Some(style) = &self.style {
            bar.set_style(style.clone());
        }
        bar.set_prefix(channel.to_string());
        self.bars.insert(channel.to_string(), bar);
    }

    fn advance(&mut self, channel: &str) {
        if let Some(bar) = self.bars.get(channel) {
            bar.inc(1);
        }
    }

    fn finish(&mut self) {
        for bar in self.bars.values() {
            if bar.position() >= bar.length().unwrap_or(0) {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}
