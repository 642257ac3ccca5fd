//! Ctrl-C handling during a run
//!
//! The first interrupt cancels the run: the engine records the running
//! operation as cancelled and holds the rest. A second interrupt exits
//! immediately.

use anyhow::{Context, Result};
use deployment::CancelToken;
use std::future::Future;
use std::thread;

/// Exit code after a second interrupt (128 + SIGINT)
const FORCED_EXIT_CODE: i32 = 130;

/// Cancel `token` on Ctrl-C, from a background thread
pub fn cancel_on_ctrl_c(token: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the signal listener")?;

    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                if watch(tokio::signal::ctrl_c(), &token).await {
                    eprintln!("\nInterrupted, finishing the current operation (Ctrl-C again to abort)");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                }
            });
        })
        .context("Failed to spawn the signal listener")?;
    Ok(())
}

/// Cancel `token` once `signal` fires; false if listening failed
async fn watch<F>(signal: F, token: &CancelToken) -> bool
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            log::warn!("Interrupt received, cancelling the run");
            token.cancel();
            true
        }
        Err(e) => {
            log::warn!("Could not listen for Ctrl-C: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_signal_cancels_token() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(block_on(watch(async { Ok(()) }, &token)));
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_listener_failure_leaves_token_alone() {
        let token = CancelToken::new();
        let failed = async { Err(std::io::Error::other("no signal support")) };
        assert!(!block_on(watch(failed, &token)));
        assert!(!token.is_cancelled());
    }
}
