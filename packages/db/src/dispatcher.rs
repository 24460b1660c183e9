//! Atomic claim of the next eligible job.
//!
//! Claiming is select-then-swap: read a short list of eligible pending jobs
//! in id order, then try to flip each one to `processing` with an update that
//! only matches while the job is still pending and eligible. Exactly one
//! worker can win that update; everyone else sees an empty result (or a
//! transaction conflict) and moves on to the next candidate.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, trace};

use queue_core::{Job, WorkerId};

use crate::connection::is_conflict;
use crate::records::{JobRecord, to_millis};
use crate::{get_db, DbError};

/// Candidates fetched per claim attempt.
const CLAIM_CANDIDATES: i64 = 8;

const SELECT_CANDIDATES: &str = r#"
SELECT seq FROM job
WHERE state = "pending" AND (next_eligible_at IS NONE OR next_eligible_at <= $now)
ORDER BY seq ASC
LIMIT $limit
"#;

const CLAIM: &str = r#"
UPDATE type::thing("job", $seq)
SET state = "processing",
    worker_id = $worker_id,
    claimed_at = $now,
    updated_at = $now
WHERE state = "pending" AND (next_eligible_at IS NONE OR next_eligible_at <= $now)
RETURN AFTER
"#;

#[derive(Debug, Deserialize)]
struct Candidate {
    seq: i64,
}

/// Hands out pending jobs to workers, at most one owner per job.
pub struct Dispatcher;

impl Dispatcher {
    /// Claim the lowest-id eligible job for `worker_id`, if any.
    pub async fn claim(worker_id: WorkerId) -> Result<Option<Job>, DbError> {
        Self::claim_at(worker_id, Utc::now()).await
    }

    /// Claim as of `now`.
    pub async fn claim_at(worker_id: WorkerId, now: DateTime<Utc>) -> Result<Option<Job>, DbError> {
        let db = get_db()?;
        let now_ms = to_millis(now);

        let mut response = db
            .query(SELECT_CANDIDATES)
            .bind(("now", now_ms))
            .bind(("limit", CLAIM_CANDIDATES))
            .await?;
        let candidates: Vec<Candidate> = response.take(0)?;

        for candidate in candidates {
            let claimed = db
                .query(CLAIM)
                .bind(("seq", candidate.seq))
                .bind(("worker_id", worker_id.to_string()))
                .bind(("now", now_ms))
                .await
                .and_then(|mut r| r.take::<Vec<JobRecord>>(0));

            match claimed {
                Ok(mut records) => match records.pop() {
                    Some(record) => {
                        let job = Job::try_from(record)?;
                        debug!(job_id = %job.id, worker_id = %worker_id, "Claimed job");
                        return Ok(Some(job));
                    }
                    None => trace!(seq = candidate.seq, "Job taken by another worker"),
                },
                Err(e) if is_conflict(&e) => {
                    trace!(seq = candidate.seq, "Claim conflicted with another worker");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }
}
