//! Graceful shutdown latch, set by SIGINT/SIGTERM. Mirrors `GracefulKiller`
//! from the Python reference implementation; the signal-listening idiom
//! follows standard `tokio::signal` usage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[derive(Clone)]
pub struct ShutdownLatch {
    flag: Arc<AtomicBool>,
}

impl ShutdownLatch {
    pub fn install() -> Self {
        let flag = Arc::new(AtomicBool::new(false));

        let ctrl_c_flag = flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received SIGINT, shutting down after the current tick");
                ctrl_c_flag.store(true, Ordering::SeqCst);
            }
        });

        let term_flag = flag.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM, shutting down after the current tick");
                    term_flag.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                }
            }
        });

        Self { flag }
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_latch_is_not_triggered() {
        let flag = Arc::new(AtomicBool::new(false));
        let latch = ShutdownLatch { flag };
        assert!(!latch.requested());
    }

    #[test]
    fn latch_reflects_flag_flip() {
        let flag = Arc::new(AtomicBool::new(false));
        let latch = ShutdownLatch { flag: flag.clone() };
        flag.store(true, Ordering::SeqCst);
        assert!(latch.requested());
    }
}
