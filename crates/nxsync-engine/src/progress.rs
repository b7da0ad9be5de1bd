//! Renders a single-line progress bar that coexists with `tracing` log
//! output without corrupting the terminal.
//!
//! The erase/redraw behavior is delegated to `indicatif`'s own
//! `ProgressBar::suspend`: the currently running `ProgressReporter`
//! registers its bar in a process-wide cell, and `ProgressAwareWriter`
//! (installed once as the `fmt` subscriber's writer at startup) suspends
//! that bar around every line it writes. This is the single place the
//! design composes bar and logger instead of monkey-patching either.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

const BAR_WIDTH: u64 = 40;

static ACTIVE_BAR: OnceLock<Mutex<Option<Arc<ProgressBar>>>> = OnceLock::new();

fn active_bar_cell() -> &'static Mutex<Option<Arc<ProgressBar>>> {
    ACTIVE_BAR.get_or_init(|| Mutex::new(None))
}

pub struct ProgressReporter {
    bar: Arc<ProgressBar>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    total: u64,
    updater: Option<tokio::task::JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(&format!(
                "{{bar:{BAR_WIDTH}.cyan/blue}} {{pos}}/{{len}} ({{percent}}%)"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░░"),
        );

        let bar = Arc::new(bar);
        *active_bar_cell().lock().unwrap() = Some(bar.clone());

        Self {
            bar,
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            total,
            updater: None,
        }
    }

    /// A cheap, `Send + Sync + Clone` handle that task closures can record
    /// outcomes through without holding the reporter itself.
    pub fn handle(&self) -> ProgressHandle {
        ProgressHandle {
            bar: self.bar.clone(),
            succeeded: self.succeeded.clone(),
            failed: self.failed.clone(),
            total: self.total,
        }
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    fn refresh(&self) {
        let processed = self.succeeded.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst);
        self.bar.set_position(processed);
        if processed >= self.total {
            self.bar.finish();
        }
    }

    pub fn start_updates(&mut self, interval: std::time::Duration) {
        let bar = self.bar.clone();
        let succeeded = self.succeeded.clone();
        let failed = self.failed.clone();
        let total = self.total;
        self.updater = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let processed = succeeded.load(Ordering::SeqCst) + failed.load(Ordering::SeqCst);
                bar.set_position(processed);
                if processed >= total {
                    break;
                }
            }
        }));
    }

    pub fn stop_updates(&mut self) {
        if let Some(handle) = self.updater.take() {
            handle.abort();
        }
    }

    pub fn render_summary(&self) {
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        self.bar.finish_and_clear();
        if failed == 0 {
            println!("{succeeded} succeeded / {failed} failed");
        } else {
            println!("{succeeded} succeeded / {failed} failed (see log above)");
        }
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        let mut guard = active_bar_cell().lock().unwrap();
        if let Some(current) = guard.as_ref() {
            if Arc::ptr_eq(current, &self.bar) {
                *guard = None;
            }
        }
    }
}

/// Cheap, `Clone`-able view onto a `ProgressReporter`'s counters and bar,
/// for task closures that only need to record outcomes.
#[derive(Clone)]
pub struct ProgressHandle {
    bar: Arc<ProgressBar>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    total: u64,
}

impl ProgressHandle {
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    fn refresh(&self) {
        let processed = self.succeeded.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst);
        self.bar.set_position(processed);
        if processed >= self.total {
            self.bar.finish();
        }
    }
}

/// A `tracing_subscriber::fmt::MakeWriter` that suspends whichever
/// `ProgressReporter` bar is currently active for the duration of each
/// write, so a log line emitted mid-run never lands inside the bar. When no
/// bar is active it writes straight through.
#[derive(Clone, Copy, Default)]
pub struct ProgressAwareWriter;

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ProgressAwareWriter {
    type Writer = ProgressAwareWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

impl Write for ProgressAwareWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bar = active_bar_cell().lock().unwrap().clone();
        match bar {
            Some(bar) => {
                let mut result = Ok(0);
                bar.suspend(|| result = io::stderr().write(buf));
                result
            }
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
