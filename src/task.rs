use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Awaits `fut` for at most `deadline`.
///
/// On time the future's own result is returned, errors included. Past the
/// deadline the future is dropped and `default` comes back as a success.
pub async fn run_bounded<T, F>(deadline: Duration, default: T, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("task exceeded {:?}; using default result", deadline);
            Ok(default)
        }
    }
}

/// Runs a blocking operation on the blocking pool under [`run_bounded`], once
/// it holds `gate`.
///
/// Waiting for the gate counts against the deadline. A timed-out job is
/// detached, not killed: it keeps the gate until it really returns and its
/// result is discarded.
pub async fn run_gated_blocking<T, F>(
    deadline: Duration,
    default: T,
    gate: Arc<Mutex<()>>,
    op: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    run_bounded(deadline, default, async move {
        let guard = gate.lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op()
        })
        .await
        .with_context(|| "blocking task failed")?
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn completed_future_returns_its_value() {
        let value = run_bounded(Duration::from_secs(1), 0, async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn failure_within_deadline_propagates() {
        let result: Result<i32> =
            run_bounded(Duration::from_secs(1), 0, async { Err(anyhow!("engine exploded")) })
                .await;
        assert_eq!(result.unwrap_err().to_string(), "engine exploded");
    }

    #[tokio::test]
    async fn slow_future_yields_default() {
        let started = Instant::now();
        let value = run_bounded(Duration::from_millis(50), vec![1], async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![2, 3])
        })
        .await
        .unwrap();
        assert_eq!(value, vec![1]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn blocking_job_is_detached_on_timeout() {
        let gate = Arc::new(Mutex::new(()));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let started = Instant::now();
        let value = run_gated_blocking(Duration::from_millis(50), "default", gate.clone(), move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
            Ok("late")
        })
        .await
        .unwrap();
        assert_eq!(value, "default");
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(gate.try_lock().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(gate.try_lock().is_ok());
    }

    #[tokio::test]
    async fn waiting_on_a_busy_gate_counts_against_the_deadline() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.clone().lock_owned().await;
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let started = Instant::now();
        let value = run_gated_blocking(Duration::from_millis(50), 0, gate.clone(), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        })
        .await
        .unwrap();
        assert_eq!(value, 0);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!ran.load(Ordering::SeqCst));

        drop(held);
        let value = run_gated_blocking(Duration::from_secs(1), 0, gate, || Ok(2))
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn blocking_failure_propagates() {
        let gate = Arc::new(Mutex::new(()));
        let result: Result<()> =
            run_gated_blocking(Duration::from_secs(1), (), gate, || Err(anyhow!("bad pass"))).await;
        assert!(result.unwrap_err().to_string().contains("bad pass"));
    }
}
