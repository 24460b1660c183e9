//! Job domain types for work items in the queue.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffPolicy, RetryDecision};
use crate::{QueueConfig, ValidationError, WorkerId};

/// Exit code reported when the command could not be run at all, or timed out.
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// Longest output kept per attempt, in characters.
pub const MAX_OUTPUT_CHARS: usize = 65_500;

const TRUNCATION_MARKER: &str = "...(truncated)";

/// Unique identifier for a job, assigned from a store-wide sequence.
///
/// Ids only ever grow, so ordering by id is ordering by enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Wrap a raw sequence value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ValidationError::InvalidJobId(s.to_string()))
    }

    /// The raw sequence value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::str::FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed, possibly not before `next_eligible_at`.
    #[default]
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Finished with exit code 0.
    Completed,
    /// Accepted as a filter value. Retryable failures are stored as
    /// `Pending` with a backoff delay, so the engine never writes this state.
    Failed,
    /// Retries exhausted; parked in the dead letter queue.
    Dead,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// Get a simple state string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownState(s.to_string()))
    }
}

/// Result of one execution attempt, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Process exit code; zero means success.
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
    /// Failure description, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(exit_code: i32, output: impl Into<String>, error: Option<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            error,
        }
    }

    /// The command never produced an exit status (spawn error, timeout).
    pub fn execution_failure(description: impl Into<String>) -> Self {
        Self {
            exit_code: SYNTHETIC_EXIT_CODE,
            output: String::new(),
            error: Some(description.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Error text stored on the job for a failed attempt.
    pub fn error_summary(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        let summary = self
            .error
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exit code {}", self.exit_code));
        Some(summary)
    }
}

/// Cap output at [`MAX_OUTPUT_CHARS`] characters.
pub fn truncate_output(output: String) -> String {
    match output.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => {
            let mut kept = output[..cut].to_string();
            kept.push_str(TRUNCATION_MARKER);
            kept
        }
        None => output,
    }
}

/// A validated enqueue request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Opaque command string handed to the execution environment.
    pub command: String,
    /// Per-job override of the configured retry ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl NewJob {
    /// Create an enqueue request, rejecting blank commands.
    pub fn new(command: impl Into<String>) -> Result<Self, ValidationError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ValidationError::EmptyCommand);
        }
        Ok(Self {
            command,
            max_retries: None,
        })
    }

    /// Override the retry ceiling for this job only.
    pub fn with_max_retries(mut self, max_retries: u32) -> Result<Self, ValidationError> {
        if max_retries == 0 {
            return Err(ValidationError::invalid(
                "max_retries",
                "must be a positive integer",
            ));
        }
        self.max_retries = Some(max_retries);
        Ok(self)
    }
}

/// A job represents a unit of work to be executed by the queue system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Shell command to execute.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of completed execution attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Retry ceiling captured at enqueue time.
    pub max_retries: u32,
    /// Backoff base captured at enqueue time.
    pub backoff_base_seconds: f64,
    /// Backoff ceiling captured at enqueue time.
    pub max_backoff_seconds: u64,
    /// Not claimable before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// Owner while processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// When the current claim was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// Error from the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Exit code from the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Output from the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job, snapshotting the retry settings from `config`.
    pub fn new(id: JobId, request: NewJob, config: &QueueConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            command: request.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: request.max_retries.unwrap_or(config.max_retries),
            backoff_base_seconds: config.backoff_base_seconds,
            max_backoff_seconds: config.max_backoff_seconds,
            next_eligible_at: None,
            worker_id: None,
            claimed_at: None,
            last_error: None,
            exit_code: None,
            output: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Backoff policy captured for this job.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_seconds)
            .with_max_delay(std::time::Duration::from_secs(self.max_backoff_seconds))
    }

    /// Whether a worker may claim this job at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.next_eligible_at.is_none_or(|at| at <= now)
    }

    /// Apply one finished attempt and return the job as it should be stored.
    ///
    /// Only meaningful for a job in `Processing`; the store enforces that.
    pub fn record_outcome(&self, outcome: &JobOutcome, now: DateTime<Utc>) -> (Job, RetryDecision) {
        let attempts = self.attempts.saturating_add(1);
        let decision =
            self.backoff_policy()
                .decide(attempts, self.max_retries, outcome.exit_code);

        let mut next = self.clone();
        next.attempts = attempts;
        next.worker_id = None;
        next.claimed_at = None;
        next.exit_code = Some(outcome.exit_code);
        next.output = Some(truncate_output(outcome.output.clone()));
        next.last_error = outcome.error_summary();
        next.updated_at = now;

        match decision {
            RetryDecision::Complete => {
                next.state = JobState::Completed;
                next.next_eligible_at = None;
            }
            RetryDecision::Retry { delay } => {
                let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
                next.state = JobState::Pending;
                next.next_eligible_at =
                    Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
            }
            RetryDecision::Dead => {
                next.state = JobState::Dead;
                next.next_eligible_at = None;
            }
        }

        (next, decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing_job(max_retries: u32) -> Job {
        let config = QueueConfig::default();
        let request = NewJob::new("false")
            .and_then(|r| r.with_max_retries(max_retries))
            .unwrap();
        let mut job = Job::new(JobId::new(1), request, &config, Utc::now());
        job.state = JobState::Processing;
        job
    }

    #[test]
    fn blank_commands_are_rejected() {
        assert_eq!(NewJob::new("   "), Err(ValidationError::EmptyCommand));
        assert!(NewJob::new("echo ok").is_ok());
    }

    #[test]
    fn new_job_snapshots_config() {
        let config = QueueConfig {
            max_retries: 7,
            backoff_base_seconds: 3.0,
            ..QueueConfig::default()
        };
        let job = Job::new(JobId::new(9), NewJob::new("true").unwrap(), &config, Utc::now());
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 7);
        assert_eq!(job.backoff_base_seconds, 3.0);
        assert!(job.is_claimable_at(Utc::now()));
    }

    #[test]
    fn success_completes_on_first_attempt() {
        let job = processing_job(3);
        let (next, decision) = job.record_outcome(&JobOutcome::success("ok\n"), Utc::now());
        assert_eq!(decision, RetryDecision::Complete);
        assert_eq!(next.state, JobState::Completed);
        assert_eq!(next.attempts, 1);
        assert_eq!(next.last_error, None);
        assert_eq!(next.output.as_deref(), Some("ok\n"));
    }

    #[test]
    fn failures_back_off_then_die_at_the_ceiling() {
        let now = Utc::now();
        let mut job = processing_job(3);

        for (attempt, secs) in [(1, 2), (2, 4)] {
            let (next, decision) = job.record_outcome(&JobOutcome::failure(1, "", None), now);
            assert_eq!(next.attempts, attempt);
            assert_eq!(next.state, JobState::Pending);
            assert_eq!(next.next_eligible_at, Some(now + TimeDelta::seconds(secs)));
            assert_eq!(next.last_error.as_deref(), Some("exit code 1"));
            assert!(matches!(decision, RetryDecision::Retry { .. }));
            assert!(!next.is_claimable_at(now));
            job = next;
            job.state = JobState::Processing;
        }

        let (dead, decision) = job.record_outcome(&JobOutcome::failure(1, "", None), now);
        assert_eq!(decision, RetryDecision::Dead);
        assert_eq!(dead.state, JobState::Dead);
        assert_eq!(dead.attempts, 3);
        assert_eq!(dead.next_eligible_at, None);
    }

    #[test]
    fn execution_failures_carry_synthetic_exit_code() {
        let outcome = JobOutcome::execution_failure("spawn failed: no such file");
        assert_eq!(outcome.exit_code, SYNTHETIC_EXIT_CODE);
        assert_eq!(
            outcome.error_summary().as_deref(),
            Some("spawn failed: no such file")
        );
    }

    #[test]
    fn long_output_is_truncated() {
        let output = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let kept = truncate_output(output);
        assert!(kept.ends_with(TRUNCATION_MARKER));
        assert_eq!(kept.chars().count(), MAX_OUTPUT_CHARS + TRUNCATION_MARKER.len());
        assert_eq!(truncate_output("short".into()), "short");
    }

    #[test]
    fn states_parse_case_insensitively() {
        assert_eq!("DEAD".parse::<JobState>(), Ok(JobState::Dead));
        assert!("archived".parse::<JobState>().is_err());
        assert_eq!(JobId::parse(" 42 "), Ok(JobId::new(42)));
    }
}
