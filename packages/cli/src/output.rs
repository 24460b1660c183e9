//! Human-readable and JSON rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;

use queue_core::{Job, QueueConfig, StatusSnapshot};

const COMMAND_WIDTH: usize = 40;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs");
        return;
    }
    println!(
        "{:>6}  {:<10}  {:>8}  {:<width$}  UPDATED",
        "ID",
        "STATE",
        "ATTEMPTS",
        "COMMAND",
        width = COMMAND_WIDTH
    );
    for job in jobs {
        println!(
            "{:>6}  {:<10}  {:>8}  {:<width$}  {}",
            job.id.to_string(),
            job.state.as_str(),
            format!("{}/{}", job.attempts, job.max_retries),
            clip(&job.command, COMMAND_WIDTH),
            timestamp(job.updated_at),
            width = COMMAND_WIDTH
        );
    }
}

pub fn print_dead_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("Dead letter queue is empty");
        return;
    }
    println!("{:>6}  {:>8}  {:<width$}  LAST ERROR", "ID", "ATTEMPTS", "COMMAND", width = COMMAND_WIDTH);
    for job in jobs {
        println!(
            "{:>6}  {:>8}  {:<width$}  {}",
            job.id.to_string(),
            job.attempts,
            clip(&job.command, COMMAND_WIDTH),
            job.last_error.as_deref().unwrap_or("-"),
            width = COMMAND_WIDTH
        );
    }
}

pub fn print_job(job: &Job) {
    println!("Job {}", job.id);
    println!("  command:      {}", job.command);
    println!("  state:        {}", job.state);
    println!("  attempts:     {}/{}", job.attempts, job.max_retries);
    println!("  backoff:      {}s base, {}s max", job.backoff_base_seconds, job.max_backoff_seconds);
    if let Some(at) = job.next_eligible_at {
        println!("  next attempt: {}", timestamp(at));
    }
    if let Some(worker) = job.worker_id {
        println!("  worker:       {}", worker);
    }
    if let Some(at) = job.claimed_at {
        println!("  claimed:      {}", timestamp(at));
    }
    if let Some(code) = job.exit_code {
        println!("  exit code:    {}", code);
    }
    if let Some(error) = &job.last_error {
        println!("  last error:   {}", error);
    }
    println!("  created:      {}", timestamp(job.created_at));
    println!("  updated:      {}", timestamp(job.updated_at));
    if let Some(output) = job.output.as_deref().filter(|o| !o.is_empty()) {
        println!("  output:");
        for line in output.lines() {
            println!("    {}", line);
        }
    }
}

pub fn print_status(snapshot: &StatusSnapshot) {
    println!("Jobs");
    for (state, count) in &snapshot.counts {
        println!("  {:<12}{}", state.as_str(), count);
    }
    println!("  {:<12}{}", "total", snapshot.total());

    println!();
    if snapshot.workers.is_empty() {
        println!("No registered workers");
        return;
    }
    println!("Workers ({} active)", snapshot.active_workers().count());
    for worker in &snapshot.workers {
        let info = &worker.info;
        let mut line = format!(
            "  {}  pid {}  {}  last seen {}",
            info.id,
            info.pid,
            if worker.alive { "live " } else { "stale" },
            timestamp(info.heartbeat_at)
        );
        if let Some(job) = info.current_job {
            line.push_str(&format!("  running job {}", job));
        }
        if info.stop_requested {
            line.push_str("  (stopping)");
        }
        println!("{}", line);
    }
}

pub fn print_config(config: &QueueConfig) {
    for (key, value) in config.entries() {
        println!("{:<22}{}", key.as_str(), value);
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Shorten to `width` characters on one line.
fn clip(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= width && line.len() == text.len() {
        return line.to_string();
    }
    let kept: String = line.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_keeps_short_single_lines() {
        assert_eq!(clip("echo hi", 10), "echo hi");
        assert_eq!(clip("echo hello world", 10), "echo he...");
        assert_eq!(clip("echo a\necho b", 20), "echo a...");
    }
}
