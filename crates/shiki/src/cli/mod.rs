//! Command handlers and the helpers they share.

pub mod config;
pub mod duplicates;
pub mod seasons;
mod theme;

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use shiki_core::{CancelToken, ProgressCallback, ScanProgress};

/// Flatten an `interact_opt()` result: `Ok(None)` on Esc or on interrupt
/// (Ctrl+C / terminal disconnect), `Err` for other I/O failures.
fn handle_interrupt<T>(result: dialoguer::Result<Option<T>>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(v) => Ok(v),
        Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A progress bar driven by the engine's progress events.
fn progress_bar() -> (ProgressBar, ProgressCallback) {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("scanning...");

    let handle = pb.clone();
    let callback: ProgressCallback = Arc::new(move |p: ScanProgress| {
        handle.set_length(p.total as u64);
        handle.set_position(p.processed as u64);
    });
    (pb, callback)
}

/// A token cancelled by the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, waiting for in-flight images to finish");
            handle.cancel();
        }
    });
    token
}
