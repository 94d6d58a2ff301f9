// src/job.rs

//! Cancellable jobs with weighted progress
//!
//! Long-running operations (refresh, repository load, indexing) report
//! progress through a `Job`. A job can be split into sub-jobs that each own
//! a proportional slice of the parent's progress range, so nested
//! operations compose without knowing where in the overall task they run.
//!
//! Cancellation is cooperative: workers call `check_cancelled()` at
//! pipeline boundaries and between repository entries. Cancelling never
//! rolls back committed work.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

/// Events delivered to a job observer
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Human readable description of the current step
    Hint(String),
    /// Overall completion of the root job, 0.0 to 1.0
    Progress(f64),
}

type Observer = dyn Fn(JobEvent) + Send + Sync;

struct JobState {
    cancelled: AtomicBool,
    /// Root progress in millionths, shared by all sub-jobs
    progress_micro: AtomicU64,
    observer: Option<Box<Observer>>,
}

impl JobState {
    fn publish(&self, done: f64) {
        let micro = (done.clamp(0.0, 1.0) * 1_000_000.0) as u64;
        // progress never goes backwards
        let prev = self.progress_micro.fetch_max(micro, Ordering::Relaxed);
        if micro > prev {
            if let Some(cb) = &self.observer {
                cb(JobEvent::Progress(micro as f64 / 1_000_000.0));
            }
        }
    }
}

/// Handle for one slice of a long-running operation
#[derive(Clone)]
pub struct Job {
    state: Arc<JobState>,
    /// Start of this job's slice within the root range
    base: f64,
    /// Width of this job's slice
    weight: f64,
    /// Completion of this slice, 0.0 to 1.0
    done: f64,
}

impl Job {
    /// Create a root job covering the whole range
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a root job that reports events to `observer`
    pub fn with_observer<F>(observer: F) -> Self
    where
        F: Fn(JobEvent) + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(observer)))
    }

    fn build(observer: Option<Box<Observer>>) -> Self {
        Self {
            state: Arc::new(JobState {
                cancelled: AtomicBool::new(false),
                progress_micro: AtomicU64::new(0),
                observer,
            }),
            base: 0.0,
            weight: 1.0,
            done: 0.0,
        }
    }

    /// Request cancellation; takes effect at the next cooperative check
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Relaxed)
    }

    /// Return `Err(UserCancel)` if the job was cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::UserCancel)
        } else {
            Ok(())
        }
    }

    /// Describe the current step
    pub fn set_hint(&self, hint: &str) {
        debug!("{}", hint);
        if let Some(cb) = &self.state.observer {
            cb(JobEvent::Hint(hint.to_string()));
        }
    }

    /// Set this job's completion (0.0 to 1.0)
    pub fn set_progress(&mut self, done: f64) {
        self.done = done.clamp(0.0, 1.0);
        self.state.publish(self.base + self.weight * self.done);
    }

    /// Current completion of the root job
    pub fn progress(&self) -> f64 {
        self.state.progress_micro.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Split off a sub-job owning `weight` of this job's remaining range,
    /// starting at the current position
    pub fn sub_job(&self, weight: f64) -> Job {
        Job {
            state: Arc::clone(&self.state),
            base: self.base + self.weight * self.done,
            weight: self.weight * weight,
            done: 0.0,
        }
    }

    /// Mark this slice finished
    pub fn complete(&mut self) {
        self.set_progress(1.0);
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_moves_forward() {
        let mut job = Job::new();
        job.set_progress(0.25);
        assert!((job.progress() - 0.25).abs() < 1e-6);
        job.complete();
        assert!((job.progress() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sub_job_scales_into_parent_range() {
        let mut job = Job::new();
        job.set_progress(0.5);

        let mut sub = job.sub_job(0.5);
        sub.set_progress(0.5);
        // 0.5 + 0.5 * 0.5 = 0.75
        assert!((job.progress() - 0.75).abs() < 1e-6);

        sub.complete();
        assert!((job.progress() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nested_sub_jobs() {
        let job = Job::new();
        let sub = job.sub_job(0.5);
        let mut subsub = sub.sub_job(0.5);
        subsub.complete();
        assert!((job.progress() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let job = Job::new();
        let sub = job.sub_job(0.3);
        job.cancel();
        assert!(sub.is_cancelled());
        assert!(matches!(sub.check_cancelled(), Err(Error::UserCancel)));
    }

    #[test]
    fn test_observer_receives_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let mut job = Job::with_observer(move |e| {
            captured.lock().unwrap().push(e);
        });

        job.set_hint("working");
        job.set_progress(1.0);

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, JobEvent::Hint(h) if h == "working")));
        assert!(events
            .iter()
            .any(|e| matches!(e, JobEvent::Progress(p) if (*p - 1.0).abs() < 1e-6)));
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut job = Job::new();
        job.set_progress(0.8);
        job.set_progress(0.2);
        assert!((job.progress() - 0.8).abs() < 1e-6);
    }
}
