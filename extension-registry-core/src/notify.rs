//! Best-effort issue comments, dispatched off the request path.
//!
//! Senders never wait on the VCS host: a notification is queued with `try_send` and dropped with
//! a warning when the queue is full. The dispatcher retries each comment a bounded number of
//! times and then gives up; failures are only ever logged.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::contract::VcsHost;

const QUEUE_CAPACITY: usize = 256;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub body: String,
}

/// Cheap, cloneable handle used by the core to queue notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Option<mpsc::Sender<IssueComment>>,
}

/// Owns the dispatcher task. Dropping every [`Notifier`] and calling [`close`](Self::close)
/// waits for queued comments to be delivered.
pub struct NotifierHandle {
    join: JoinHandle<()>,
}

impl Notifier {
    /// Starts the dispatcher on the current tokio runtime.
    pub fn spawn(vcs: Arc<dyn VcsHost>) -> (Notifier, NotifierHandle) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let join = tokio::spawn(dispatch(vcs, receiver));
        (
            Notifier {
                sender: Some(sender),
            },
            NotifierHandle { join },
        )
    }

    /// A notifier that discards everything.
    pub fn disabled() -> Notifier {
        Notifier { sender: None }
    }

    pub fn comment(&self, comment: IssueComment) {
        let Some(sender) = &self.sender else {
            tracing::debug!(issue = comment.issue_number, "[NOTIFY] Notifications disabled, dropping comment");
            return;
        };
        if let Err(e) = sender.try_send(comment) {
            tracing::warn!(error = %e, "[NOTIFY] Notification queue unavailable, dropping comment");
        }
    }
}

impl NotifierHandle {
    pub async fn close(self) {
        if let Err(e) = self.join.await {
            tracing::error!(error = ?e, "[NOTIFY] Dispatcher task failed");
        }
    }
}

async fn dispatch(vcs: Arc<dyn VcsHost>, mut receiver: mpsc::Receiver<IssueComment>) {
    while let Some(comment) = receiver.recv().await {
        for attempt in 1..=MAX_ATTEMPTS {
            match vcs
                .comment_on_issue(&comment.owner, &comment.repo, comment.issue_number, &comment.body)
                .await
            {
                Ok(()) => {
                    tracing::debug!(owner = %comment.owner, repo = %comment.repo, issue = comment.issue_number, "[NOTIFY] Comment posted");
                    break;
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(error = %e, attempt, "[NOTIFY] Comment failed, retrying");
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, owner = %comment.owner, repo = %comment.repo, issue = comment.issue_number, "[NOTIFY] Giving up on comment");
                }
            }
        }
    }
}
