//! Sync-over-async adapter for host plugin call sites.
//!
//! Everything inside this crate is async end-to-end; the one boundary that
//! cannot suspend is a host plugin contract that invokes node logic from a
//! plain synchronous function. [`block_on`] is the single adapter for that
//! boundary: it runs a future to completion on a dedicated current-thread
//! runtime, hopping to a scoped worker thread when the caller is already
//! inside a Tokio runtime (blocking in place would deadlock the driver).

use std::future::Future;

/// Run `future` to completion from a synchronous call site.
pub fn block_on<F>(future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        // Already on a runtime thread: drive the future on a throwaway
        // runtime in a scoped worker so this thread can block safely.
        std::thread::scope(|scope| {
            scope
                .spawn(|| run_on_fresh_runtime(future))
                .join()
                .expect("bridge worker panicked")
        })
    } else {
        run_on_fresh_runtime(future)
    }
}

fn run_on_fresh_runtime<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build bridge runtime")
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_outside_runtime() {
        let value = block_on(async { 40 + 2 });
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_block_on_inside_runtime() {
        let value = tokio::task::spawn_blocking(|| block_on(async { "ok" }))
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[test]
    fn test_block_on_drives_timers() {
        block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        });
    }
}
