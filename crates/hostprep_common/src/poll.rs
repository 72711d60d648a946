//! Bounded polling
//!
//! Some steps have to wait for the hypervisor to converge: a managed network
//! going active, a guest reaching `running`. Those waits always have a
//! timeout and a fixed retry interval.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::StepError;

/// Call `probe` until it returns `Ok(true)`, an error, or `timeout` elapses
///
/// The probe runs at least once, even with a zero timeout.
pub fn wait_until<F>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<(), StepError>
where
    F: FnMut() -> Result<bool, StepError>,
{
    let start = Instant::now();
    let spinner = spinner(what);
    let mut attempts = 0u32;

    let outcome = loop {
        attempts += 1;
        match probe() {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            break Err(StepError::Timeout {
                what: what.to_string(),
                waited_secs: elapsed.as_secs(),
            });
        }
        debug!("waiting for {} (attempt {})", what, attempts);
        std::thread::sleep(interval.min(timeout - elapsed));
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    match &outcome {
        Ok(()) => info!(
            "{} reached after {:.1}s ({} checks)",
            what,
            start.elapsed().as_secs_f64(),
            attempts
        ),
        Err(e) => info!("stopped waiting for {}: {}", what, e),
    }
    outcome
}

/// Spinner only when a human is watching
fn spinner(what: &str) -> Option<ProgressBar> {
    if !console::user_attended() || std::env::var("NO_COLOR").is_ok() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
        .template("{spinner} waiting for {msg} ({elapsed})")
    {
        pb.set_style(style);
    }
    pb.set_message(what.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_retries() {
        let mut calls = 0;
        let result = wait_until(
            "counter",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || {
                calls += 1;
                Ok(calls >= 3)
            },
        );
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_times_out() {
        let result = wait_until(
            "never",
            Duration::from_millis(20),
            Duration::from_millis(5),
            || Ok(false),
        );
        assert!(matches!(result, Err(StepError::Timeout { .. })));
    }

    #[test]
    fn test_zero_timeout_still_probes_once() {
        let mut calls = 0;
        let result = wait_until("once", Duration::ZERO, Duration::from_millis(1), || {
            calls += 1;
            Ok(true)
        });
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_probe_error_propagates() {
        let result = wait_until("err", Duration::from_secs(1), Duration::from_millis(1), || {
            Err(StepError::precondition("gone"))
        });
        assert!(matches!(result, Err(StepError::Precondition(_))));
    }
}
