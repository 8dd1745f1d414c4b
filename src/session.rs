use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffClient;
use crate::error::{ErrorKind, GenerationError, IntakeWarning, SessionFailure};
use crate::gemini::{build_request, collect_text, extract_first_image, GenerateContentResponse};
use crate::intake::{ImageIntake, IntakeReport};
use crate::models::{AspectRatio, FileInput, GenerationResult, ImageCollection, SessionState};

/// How a call to [`SessionController::submit`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// This submission reached a terminal phase; the state it produced.
    Completed(SessionState),
    /// A later submission (or a reset) took over; this result was dropped.
    Superseded,
}

struct Inner {
    state: watch::Sender<SessionState>,
    intake: ImageIntake,
    client: BackoffClient,
    endpoint: String,
    max_attempts: u32,
    // bumped by every submit and reset; only the holder of the latest ticket may write state
    ticket: AtomicU64,
}

/// Owns one generation session. Clones share the same session.
///
/// A submit issued while another is pending supersedes it: the newer
/// submission owns the state and the older one's eventual result is dropped.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(client: BackoffClient, endpoint: impl Into<String>, max_attempts: u32) -> Self {
        Self::with_intake(client, endpoint, max_attempts, ImageIntake::new())
    }

    pub fn with_intake(client: BackoffClient, endpoint: impl Into<String>, max_attempts: u32, intake: ImageIntake) -> Self {
        let (state, _) = watch::channel(SessionState::idle());
        Self {
            inner: Arc::new(Inner {
                state,
                intake,
                client,
                endpoint: endpoint.into(),
                max_attempts,
                ticket: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn images(&self) -> ImageCollection {
        self.inner.intake.snapshot()
    }

    pub fn subscribe_images(&self) -> watch::Receiver<ImageCollection> {
        self.inner.intake.subscribe()
    }

    pub fn recent_warnings(&self) -> Vec<IntakeWarning> {
        self.inner.intake.recent_warnings()
    }

    pub async fn add_images(&self, files: Vec<FileInput>) -> IntakeReport {
        self.inner.intake.ingest(files).await
    }

    pub fn remove_image(&self, id: Uuid) -> bool {
        self.inner.intake.remove(id)
    }

    pub fn clear_images(&self) {
        self.inner.intake.clear();
    }

    /// Abandons any pending submission and returns to idle.
    pub fn reset(&self) {
        self.inner.ticket.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_replace(SessionState::idle());
    }

    /// Runs one submission to a terminal phase.
    ///
    /// The network work runs on its own task, so dropping the returned future
    /// does not strand the session in `Submitting`; only a newer submit or
    /// [`reset`](Self::reset) discards it.
    pub async fn submit(&self, prompt: &str, aspect_ratio: Option<AspectRatio>) -> SubmitOutcome {
        let ticket = self.inner.ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let images = self.images();

        let request = match build_request(prompt, &images, aspect_ratio) {
            Ok(r) => r,
            Err(e) => return self.finish(ticket, Err(e)),
        };
        let body = match serde_json::to_value(&request) {
            Ok(b) => b,
            Err(e) => return self.finish(ticket, Err(e.into())),
        };

        if !self.apply(ticket, SessionState::submitting()) {
            return SubmitOutcome::Superseded;
        }
        info!("🚀 Submitting generation #{} with {} image(s)", ticket, images.len());

        let worker = self.clone();
        let task = tokio::spawn(async move {
            let inner = &worker.inner;
            let outcome = match inner.client.execute(&inner.endpoint, &body, inner.max_attempts).await {
                Ok(raw) => interpret(raw),
                Err(e) => Err(e.into()),
            };
            worker.finish(ticket, outcome)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ Generation #{} task ended abnormally: {}", ticket, e);
                let failed = SessionState::failed(SessionFailure {
                    kind: ErrorKind::Transport,
                    message: format!("generation task ended abnormally: {e}"),
                });
                if self.apply(ticket, failed.clone()) {
                    SubmitOutcome::Completed(failed)
                } else {
                    SubmitOutcome::Superseded
                }
            }
        }
    }

    fn finish(&self, ticket: u64, outcome: Result<GenerationResult, GenerationError>) -> SubmitOutcome {
        let next = match &outcome {
            Ok(result) => SessionState::succeeded(result.clone()),
            Err(e) => SessionState::failed(SessionFailure::from(e)),
        };

        if !self.apply(ticket, next.clone()) {
            warn!("⏭️ Generation #{} superseded, dropping its result", ticket);
            return SubmitOutcome::Superseded;
        }

        match &outcome {
            Ok(r) => info!("✅ Generation #{} succeeded ({})", ticket, r.mime_type),
            Err(e) => error!("❌ Generation #{} failed: {}", ticket, e),
        }
        SubmitOutcome::Completed(next)
    }

    // Writes `next` only while `ticket` is still the latest one handed out.
    fn apply(&self, ticket: u64, next: SessionState) -> bool {
        self.inner.state.send_if_modified(|current| {
            if self.inner.ticket.load(Ordering::SeqCst) != ticket {
                return false;
            }
            *current = next;
            true
        })
    }
}

/// Empty-but-valid responses are terminal and are not retried.
fn interpret(raw: serde_json::Value) -> Result<GenerationResult, GenerationError> {
    let parsed: GenerateContentResponse = serde_json::from_value(raw)
        .map_err(|e| GenerationError::EmptyResponse(format!("unrecognized response: {e}")))?;
    extract_first_image(&parsed).ok_or_else(|| {
        let text = collect_text(&parsed);
        GenerationError::EmptyResponse(if text.is_empty() { "response had no inline image".into() } else { format!("model replied: {text}") })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{Transport, TransportResponse};
    use crate::error::{ErrorKind, TransportError};
    use crate::models::Phase;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::Notify;

    /// First call parks until released; later calls answer immediately.
    struct Gated {
        entered: Notify,
        release: Notify,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Transport for Gated {
        async fn post_json(&self, _url: &str, _body: &serde_json::Value) -> Result<TransportResponse, TransportError> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            let mime = if call == 1 {
                self.entered.notify_one();
                self.release.notified().await;
                "image/jpeg"
            } else {
                "image/png"
            };
            let body = json!({"candidates": [{"content": {"parts": [{"inlineData": {"mimeType": mime, "data": "QUJD"}}]}}]});
            Ok(TransportResponse { status: 200, body: body.to_string() })
        }
    }

    fn gated() -> Arc<Gated> {
        Arc::new(Gated { entered: Notify::new(), release: Notify::new(), calls: Mutex::new(0) })
    }

    #[tokio::test]
    async fn second_submit_supersedes_pending_one() {
        let transport = gated();
        let session = SessionController::new(BackoffClient::new(transport.clone()), "http://x", 1);

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.submit("first", None).await }
        });
        transport.entered.notified().await;
        assert_eq!(session.state().phase, Phase::Submitting);

        let second = session.submit("second", None).await;
        let SubmitOutcome::Completed(state) = second else { panic!("second submit was dropped") };
        assert_eq!(state.result.as_ref().unwrap().mime_type, "image/png");

        transport.release.notify_one();
        assert_eq!(first.await.unwrap(), SubmitOutcome::Superseded);
        assert_eq!(session.state().result.unwrap().mime_type, "image/png");
    }

    #[tokio::test]
    async fn reset_discards_pending_result() {
        let transport = gated();
        let session = SessionController::new(BackoffClient::new(transport.clone()), "http://x", 1);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.submit("draw", None).await }
        });
        transport.entered.notified().await;
        session.reset();
        transport.release.notify_one();

        assert_eq!(pending.await.unwrap(), SubmitOutcome::Superseded);
        assert_eq!(session.state().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn dropped_caller_still_reaches_terminal_phase() {
        let transport = gated();
        let session = SessionController::new(BackoffClient::new(transport.clone()), "http://x", 1);
        let mut observer = session.subscribe();

        let caller = tokio::spawn({
            let session = session.clone();
            async move { session.submit("draw", None).await }
        });
        transport.entered.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert_eq!(session.state().phase, Phase::Submitting);

        transport.release.notify_one();
        let settled = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            observer.wait_for(|s| s.phase != Phase::Submitting),
        )
        .await
        .expect("session stuck in submitting")
        .unwrap()
        .clone();
        assert_eq!(settled.phase, Phase::Succeeded);
        assert_eq!(settled.result.unwrap().mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn injected_intake_limit_applies_to_session_uploads() {
        let transport = gated();
        let session = SessionController::with_intake(
            BackoffClient::new(transport.clone()),
            "http://x",
            1,
            ImageIntake::with_limit(4),
        );

        let report = session
            .add_images(vec![
                FileInput::from_bytes("small.png", None, vec![1u8; 4]),
                FileInput::from_bytes("large.png", None, vec![1u8; 5]),
            ])
            .await;

        assert_eq!(report.added.len(), 1);
        assert_eq!(session.images().len(), 1);
        let warnings = session.recent_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].file_name(), "large.png");
    }

    #[tokio::test]
    async fn missing_input_fails_without_network() {
        let transport = gated();
        let session = SessionController::new(BackoffClient::new(transport.clone()), "http://x", 5);

        let SubmitOutcome::Completed(state) = session.submit("  ", None).await else { panic!() };

        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.error.unwrap().kind, ErrorKind::Validation);
        assert_eq!(*transport.calls.lock(), 0);
    }

    #[test]
    fn interpret_reports_model_text_when_no_image() {
        let err = interpret(json!({"candidates": [{"content": {"parts": [{"text": "I can't draw that"}]}}]})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyResponse);
        assert!(err.to_string().contains("I can't draw that"));

        let err = interpret(json!({"candidates": "nope"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyResponse);
    }
}
