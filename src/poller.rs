//! Waiting for a submitted run to finish.
//!
//! The [`Poller`] fetches the run status on a fixed interval until the status
//! reports a terminal state. Two things bound the wait:
//!
//! - a ceiling on total time, after which [`PollError::TimedOut`] is returned
//! - a cancellation token, which ends the wait with [`PollError::Cancelled`]
//!
//! Progress messages are passed to a callback as they first appear; the
//! [`ProgressMemo`] keeps a message that the server repeats on every poll
//! from being reported twice.

use std::collections::HashSet;
use std::time::Duration;

use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ApiError, Submission, TestLab};
use crate::status::{ProgressMessage, RunStatus};

/// Errors that end a wait early.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The run did not finish within the wait ceiling.
    #[error("Timed out client-side after waiting {0:?} for the test run to finish")]
    TimedOut(Duration),

    /// The wait was cancelled.
    #[error("Cancelled while waiting for the test run to finish")]
    Cancelled,
}

/// Remembers which progress messages were already reported.
#[derive(Debug, Default)]
pub struct ProgressMemo {
    seen: HashSet<ProgressMessage>,
}

impl ProgressMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages of `status` not seen before, in order of first
    /// appearance, and remembers them.
    pub fn observe(&mut self, status: &RunStatus) -> Vec<ProgressMessage> {
        status
            .progress()
            .into_iter()
            .filter(|m| self.seen.insert(m.clone()))
            .collect()
    }
}

/// Polls a submitted run until it finishes.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use labrun::api::{HttpTestLab, Submission};
/// use labrun::config::ApiVersion;
/// use labrun::poller::Poller;
///
/// # async fn example() -> Result<(), labrun::poller::PollError> {
/// let lab = HttpTestLab::new("https://lab.example.com", "app", "build", ApiVersion::Steps);
/// let poller = Poller::new(&lab, Duration::from_secs(5), Duration::from_secs(900));
/// let status = poller
///     .wait(&Submission::default(), |m| println!("{}", m.message))
///     .await?;
/// assert!(status.is_finished());
/// # Ok(())
/// # }
/// ```
pub struct Poller<'a, A: ?Sized> {
    api: &'a A,
    interval: Duration,
    max_wait: Duration,
    cancellation_token: CancellationToken,
}

impl<'a, A: TestLab + ?Sized> Poller<'a, A> {
    /// Creates a poller that checks every `interval` for at most `max_wait`.
    pub fn new(api: &'a A, interval: Duration, max_wait: Duration) -> Self {
        Self {
            api,
            interval,
            max_wait,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sets a cancellation token that aborts the wait.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Waits for the run to reach its terminal state and returns the final
    /// status.
    ///
    /// Every tick sleeps for the interval first, then fetches the status.
    /// `on_progress` is called once for each new progress message.
    pub async fn wait<F>(&self, submission: &Submission, mut on_progress: F) -> Result<RunStatus, PollError>
    where
        F: FnMut(&ProgressMessage),
    {
        let deadline = Instant::now() + self.max_wait;
        let token = &self.cancellation_token;
        let mut memo = ProgressMemo::new();
        let mut polls = 0usize;

        loop {
            select! {
                _ = token.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }

            let status = select! {
                _ = token.cancelled() => return Err(PollError::Cancelled),
                status = self.api.fetch_status(submission) => status?,
            };
            polls += 1;

            for message in memo.observe(&status) {
                on_progress(&message);
            }

            if status.is_finished() {
                info!("=> Test finished after {} status checks", polls);
                return Ok(status);
            }

            if Instant::now() >= deadline {
                return Err(PollError::TimedOut(self.max_wait));
            }

            debug!("Test still running (check {})", polls);
        }
    }
}
