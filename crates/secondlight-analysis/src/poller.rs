//! Client Poller: re-fetches a document at a fixed interval until its
//! analysis reaches a terminal state.
//!
//! Each observed status is published on a `watch` channel. Polling stops on
//! the first terminal state, on `cancel()`, or when the handle is dropped.
//! No backoff or jitter is applied.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use secondlight_core::defaults::POLL_INTERVAL_SECS;
use secondlight_core::{DocumentRepository, DocumentState, Error, Result};

/// What the poller observes on each fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStatus {
    pub state: DocumentState,
    pub error_message: Option<String>,
}

/// Anything that can report a document's current state.
#[async_trait]
pub trait DocumentStatusSource: Send + Sync {
    async fn fetch_status(&self, document_id: Uuid) -> Result<DocumentStatus>;
}

#[async_trait]
impl DocumentStatusSource for Arc<dyn DocumentRepository> {
    async fn fetch_status(&self, document_id: Uuid) -> Result<DocumentStatus> {
        let doc = self.fetch(document_id).await?;
        Ok(DocumentStatus {
            state: doc.state,
            error_message: doc.error_message,
        })
    }
}

/// Reads status through `GET /api/v1/documents/:id`.
pub struct HttpDocumentSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentStatusBody {
    processing_status: String,
    #[serde(default)]
    error_message: Option<String>,
}

impl HttpDocumentSource {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl DocumentStatusSource for HttpDocumentSource {
    async fn fetch_status(&self, document_id: Uuid) -> Result<DocumentStatus> {
        let url = format!("{}/api/v1/documents/{}", self.base_url, document_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::DocumentNotFound(document_id));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized("document status request rejected".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Request(format!(
                "document status request failed: HTTP {}",
                status
            )));
        }

        let body: DocumentStatusBody = response.json().await?;
        Ok(DocumentStatus {
            state: body.processing_status.parse()?,
            error_message: body.error_message,
        })
    }
}

/// Polls one document at a fixed interval.
pub struct DocumentPoller {
    source: Arc<dyn DocumentStatusSource>,
    interval: Duration,
}

impl DocumentPoller {
    pub fn new(source: Arc<dyn DocumentStatusSource>) -> Self {
        Self {
            source,
            interval: Duration::from_secs(POLL_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start polling. The first fetch happens immediately.
    pub fn start(&self, document_id: Uuid) -> PollerHandle {
        let (tx, rx) = watch::channel(None);
        let source = self.source.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move { poll_loop(source, document_id, interval, tx).await });

        PollerHandle {
            updates: rx,
            task: Some(task),
        }
    }
}

async fn poll_loop(
    source: Arc<dyn DocumentStatusSource>,
    document_id: Uuid,
    interval: Duration,
    tx: watch::Sender<Option<DocumentStatus>>,
) -> Option<DocumentStatus> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        trace!(subsystem = "analysis", component = "poller", %document_id, "Poll tick");

        match source.fetch_status(document_id).await {
            Ok(status) => {
                let terminal = status.state.is_terminal();
                tx.send_replace(Some(status.clone()));
                if terminal {
                    debug!(
                        subsystem = "analysis",
                        component = "poller",
                        %document_id,
                        state = %status.state,
                        "Terminal state observed, polling stopped"
                    );
                    return Some(status);
                }
            }
            Err(e) if e.is_fatal() => {
                warn!(
                    subsystem = "analysis",
                    component = "poller",
                    %document_id,
                    error = %e,
                    "Document unavailable, polling stopped"
                );
                return None;
            }
            Err(e) => {
                // next tick retries
                warn!(
                    subsystem = "analysis",
                    component = "poller",
                    %document_id,
                    error = %e,
                    "Status fetch failed"
                );
            }
        }
    }
}

/// Handle to a running poller. Dropping it stops polling.
pub struct PollerHandle {
    updates: watch::Receiver<Option<DocumentStatus>>,
    task: Option<JoinHandle<Option<DocumentStatus>>>,
}

impl PollerHandle {
    /// Receiver for every observed status. `None` until the first fetch.
    pub fn updates(&self) -> watch::Receiver<Option<DocumentStatus>> {
        self.updates.clone()
    }

    /// Most recently observed status.
    pub fn latest(&self) -> Option<DocumentStatus> {
        self.updates.borrow().clone()
    }

    /// Stop polling now.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the terminal status. `None` if the document vanished, access
    /// was rejected or polling was cancelled.
    pub async fn wait(mut self) -> Option<DocumentStatus> {
        let task = self.task.take()?;
        task.await.ok().flatten()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays states; repeats the last one forever.
    struct ScriptedSource {
        states: Mutex<VecDeque<Result<DocumentStatus>>>,
        last: Mutex<Option<DocumentStatus>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(states: Vec<Result<DocumentStatus>>) -> Arc<Self> {
            Arc::new(Self {
                states: Mutex::new(states.into()),
                last: Mutex::new(None),
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentStatusSource for ScriptedSource {
        async fn fetch_status(&self, _document_id: Uuid) -> Result<DocumentStatus> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = self.states.lock().unwrap().pop_front();
            match next {
                Some(Ok(status)) => {
                    *self.last.lock().unwrap() = Some(status.clone());
                    Ok(status)
                }
                Some(Err(e)) => Err(e),
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| Error::Internal("script empty".to_string())),
            }
        }
    }

    fn status(state: DocumentState) -> Result<DocumentStatus> {
        Ok(DocumentStatus {
            state,
            error_message: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed() {
        let source = ScriptedSource::new(vec![
            status(DocumentState::Pending),
            status(DocumentState::Processing),
            status(DocumentState::Completed),
        ]);
        let poller = DocumentPoller::new(source.clone());
        let started = tokio::time::Instant::now();

        let terminal = poller.start(Uuid::nil()).wait().await.unwrap();
        assert_eq!(terminal.state, DocumentState::Completed);
        assert_eq!(source.fetches(), 3);
        // two full intervals between three fetches
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fetches_after_terminal_state() {
        let source = ScriptedSource::new(vec![Ok(DocumentStatus {
            state: DocumentState::Error,
            error_message: Some("Not a medical document: recipe".to_string()),
        })]);
        let handle = DocumentPoller::new(source.clone()).start(Uuid::nil());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetches(), 1);
        assert!(handle.is_finished());
        let latest = handle.latest().unwrap();
        assert_eq!(latest.state, DocumentState::Error);
        assert!(latest.error_message.unwrap().contains("recipe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let source = ScriptedSource::new(vec![status(DocumentState::Processing)]);
        let handle = DocumentPoller::new(source.clone())
            .with_interval(Duration::from_secs(1))
            .start(Uuid::nil());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let before = source.fetches();
        assert!(before >= 3);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let source = ScriptedSource::new(vec![status(DocumentState::Pending)]);
        let mut handle = DocumentPoller::new(source.clone()).start(Uuid::nil());

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        let before = source.fetches();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches(), before);
        assert!(handle.wait().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let source = ScriptedSource::new(vec![
            Err(Error::Request("connection reset".to_string())),
            status(DocumentState::Processing),
            status(DocumentState::Completed),
        ]);
        let terminal = DocumentPoller::new(source.clone())
            .start(Uuid::nil())
            .wait()
            .await
            .unwrap();
        assert_eq!(terminal.state, DocumentState::Completed);
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_document_stops() {
        let source = ScriptedSource::new(vec![Err(Error::DocumentNotFound(Uuid::nil()))]);
        let result = DocumentPoller::new(source.clone())
            .start(Uuid::nil())
            .wait()
            .await;
        assert!(result.is_none());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_stop() {
        let source = ScriptedSource::new(vec![
            status(DocumentState::Processing),
            Err(Error::Unauthorized("session expired".to_string())),
        ]);
        let handle = DocumentPoller::new(source.clone()).start(Uuid::nil());
        let updates = handle.updates();

        assert!(handle.wait().await.is_none());
        assert_eq!(source.fetches(), 2);
        assert_eq!(
            updates.borrow().as_ref().map(|s| s.state),
            Some(DocumentState::Processing)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_channel_sees_progress() {
        let source = ScriptedSource::new(vec![
            status(DocumentState::Processing),
            status(DocumentState::Completed),
        ]);
        let handle = DocumentPoller::new(source).start(Uuid::nil());
        let mut updates = handle.updates();

        updates.changed().await.unwrap();
        assert_eq!(
            updates.borrow().as_ref().map(|s| s.state),
            Some(DocumentState::Processing)
        );
        updates.changed().await.unwrap();
        assert_eq!(
            updates.borrow().as_ref().map(|s| s.state),
            Some(DocumentState::Completed)
        );
    }
}
