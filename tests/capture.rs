//! Capture watchdog integration tests

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use parley_gateway::Error;
use parley_gateway::voice::{
    CaptureOutcome, CaptureWatchdog, Health, MAX_CAPTURE_ATTEMPTS, SpeechProbe,
};

mod common;
use common::{CaptureScript, FakeFactory, LANGUAGE, fast_capture};

fn watchdog(script: &Arc<CaptureScript>) -> CaptureWatchdog {
    CaptureWatchdog::new(FakeFactory::new(script), LANGUAGE.to_string(), fast_capture())
}

#[tokio::test]
async fn test_healthy_resource_is_reused() {
    let script = CaptureScript::new();
    let watchdog = watchdog(&script);

    assert_eq!(watchdog.ensure_healthy().await.unwrap(), Health::Rebuilt);
    assert_eq!(watchdog.ensure_healthy().await.unwrap(), Health::Healthy);
    assert_eq!(watchdog.builds(), 1);
    assert_eq!(script.releases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dead_resource_is_released_and_rebuilt() {
    let script = CaptureScript::new();
    let watchdog = watchdog(&script);
    watchdog.ensure_healthy().await.unwrap();

    script.alive.store(false, Ordering::SeqCst);
    assert_eq!(watchdog.ensure_healthy().await.unwrap(), Health::Rebuilt);

    assert_eq!(watchdog.builds(), 2);
    assert_eq!(script.created.load(Ordering::SeqCst), 2);
    assert_eq!(script.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capture_gives_up_after_three_attempts() {
    let script = CaptureScript::new();
    script.failing_setups.store(100, Ordering::SeqCst);
    let watchdog = watchdog(&script);

    let err = watchdog.attempt_capture().await.unwrap_err();
    assert!(matches!(err, Error::CaptureExhausted { attempts } if attempts == MAX_CAPTURE_ATTEMPTS));

    assert_eq!(script.loads.load(Ordering::SeqCst), MAX_CAPTURE_ATTEMPTS);
    assert_eq!(script.resets.load(Ordering::SeqCst), MAX_CAPTURE_ATTEMPTS);
    assert_eq!(script.starts.load(Ordering::SeqCst), 0);
    assert_eq!(watchdog.retry_count().await, Some(MAX_CAPTURE_ATTEMPTS));
}

#[tokio::test]
async fn test_exhaustion_is_an_outcome_not_an_error() {
    let script = CaptureScript::new();
    script.failing_setups.store(100, Ordering::SeqCst);
    let watchdog = watchdog(&script);

    let outcome = watchdog.capture_utterance(None).await.unwrap();
    assert_eq!(
        outcome,
        CaptureOutcome::Exhausted {
            attempts: MAX_CAPTURE_ATTEMPTS
        }
    );
    assert_eq!(script.loads.load(Ordering::SeqCst), MAX_CAPTURE_ATTEMPTS);
}

#[tokio::test]
async fn test_transient_failure_recovers_and_resets_retry_count() {
    let script = CaptureScript::new();
    script.failing_setups.store(2, Ordering::SeqCst);
    let watchdog = watchdog(&script);

    watchdog.attempt_capture().await.unwrap();

    assert_eq!(script.loads.load(Ordering::SeqCst), 3);
    assert_eq!(script.starts.load(Ordering::SeqCst), 1);
    assert_eq!(watchdog.retry_count().await, Some(0));
}

#[tokio::test]
async fn test_language_mismatch_is_retried() {
    let script = CaptureScript::new();
    script.mismatches.store(1, Ordering::SeqCst);
    let watchdog = watchdog(&script);

    watchdog.attempt_capture().await.unwrap();

    assert_eq!(script.loads.load(Ordering::SeqCst), 2);
    assert_eq!(script.resets.load(Ordering::SeqCst), 1);
    assert_eq!(script.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resource_that_never_gets_ready_times_out() {
    let script = CaptureScript::new();
    script.never_ready.store(true, Ordering::SeqCst);
    let watchdog = watchdog(&script);

    let started = Instant::now();
    let err = watchdog.attempt_capture().await.unwrap_err();

    assert!(matches!(err, Error::CaptureExhausted { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(script.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_reset_discards_resource() {
    let script = CaptureScript::new();
    script.failing_setups.store(1, Ordering::SeqCst);
    script.reset_fails.store(true, Ordering::SeqCst);
    let watchdog = watchdog(&script);

    watchdog.attempt_capture().await.unwrap();

    assert_eq!(watchdog.builds(), 2);
    assert_eq!(script.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_utterance_reports_partials_and_final_text() {
    let script = CaptureScript::new();
    script.push_utterance(&["good", "good", "good morning"]);
    let watchdog = watchdog(&script);

    let seen = Mutex::new(Vec::new());
    let observer = |text: &str| seen.lock().unwrap().push(text.to_string());

    let outcome = watchdog.capture_utterance(Some(&observer)).await.unwrap();

    assert_eq!(outcome, CaptureOutcome::Captured("good morning".to_string()));
    assert_eq!(*seen.lock().unwrap(), vec!["good", "good morning"]);
}

#[tokio::test]
async fn test_dead_resource_is_not_read_for_final_text() {
    let script = CaptureScript::new();
    script.push_utterance(&["hello", "hello there"]);
    *script.dies_after_reads.lock().unwrap() = Some(1);
    let watchdog = watchdog(&script);

    let outcome = watchdog.capture_utterance(None).await.unwrap();

    assert_eq!(outcome, CaptureOutcome::Captured(String::new()));
    assert_eq!(script.dead_reads.load(Ordering::SeqCst), 0);
    assert!(!watchdog.speech_detected().await);
}

#[tokio::test]
async fn test_listen_skips_empty_utterances() {
    let script = CaptureScript::new();
    script.push_utterance(&[]);
    script.push_utterance(&["  "]);
    script.push_utterance(&["turn on the lights"]);
    let watchdog = watchdog(&script);

    let outcome = tokio::time::timeout(Duration::from_secs(2), watchdog.listen(None))
        .await
        .expect("listen did not finish")
        .unwrap();

    assert_eq!(
        outcome,
        CaptureOutcome::Captured("turn on the lights".to_string())
    );
    assert_eq!(script.starts.load(Ordering::SeqCst), 3);
    assert_eq!(watchdog.builds(), 1);
}

#[tokio::test]
async fn test_speech_needs_new_text_while_recording() {
    let script = CaptureScript::new();
    script.push_utterance(&["hi", "hi", "hi again"]);
    let watchdog = watchdog(&script);

    // Nothing to probe yet
    assert!(!watchdog.speech_detected().await);

    watchdog.attempt_capture().await.unwrap();

    assert!(watchdog.speech_detected().await);
    assert!(!watchdog.speech_detected().await, "repeated text is not new speech");
    assert!(watchdog.speech_detected().await);
    // Recording ended
    assert!(!watchdog.speech_detected().await);
}

#[tokio::test]
async fn test_speech_probe_yields_while_setup_holds_the_lock() {
    let script = CaptureScript::new();
    script.never_ready.store(true, Ordering::SeqCst);
    let watchdog = Arc::new(CaptureWatchdog::new(
        FakeFactory::new(&script),
        LANGUAGE.to_string(),
        parley_gateway::config::CaptureConfig {
            ready_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
        },
    ));

    let setup = tokio::spawn({
        let watchdog = Arc::clone(&watchdog);
        async move { watchdog.attempt_capture().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let probed = tokio::time::timeout(Duration::from_millis(200), watchdog.speech_detected()).await;
    assert!(matches!(probed, Ok(false)));

    setup.abort();
}

#[tokio::test]
async fn test_shutdown_releases_resource() {
    let script = CaptureScript::new();
    let watchdog = watchdog(&script);
    watchdog.ensure_healthy().await.unwrap();

    watchdog.shutdown().await;
    assert_eq!(script.releases.load(Ordering::SeqCst), 1);
    assert_eq!(watchdog.retry_count().await, None);

    // A fresh resource is built on demand
    assert_eq!(watchdog.ensure_healthy().await.unwrap(), Health::Rebuilt);
}
