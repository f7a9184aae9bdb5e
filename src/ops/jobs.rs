// ============================================================================
// BACKGROUND FILTER JOBS - worker dispatch, generation tokens, debouncing
// ============================================================================
//
// Workers receive private copies of the pixels they process and only ever
// send new buffers back. The UI thread polls the channel and decides what to
// swap in; stale preview generations are dropped at that point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use image::GrayImage;
use uuid::Uuid;

use crate::canvas::RasterBuffer;
use crate::error::{EngineError, Result};
use crate::ops::filters::{EffectRequest, FilterService, run_filter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Live preview; superseded by the next preview request.
    Preview,
    /// Full apply whose result goes into history.
    Commit,
}

/// A finished job as delivered to the UI thread.
#[derive(Debug)]
pub struct JobResult {
    pub token: u64,
    pub kind: JobKind,
    pub layer_id: Uuid,
    pub description: String,
    pub outcome: Result<RasterBuffer>,
}

/// Work handed to a worker.
pub struct FilterJob {
    pub layer_id: Uuid,
    pub description: String,
    pub input: RasterBuffer,
    pub chain: Vec<EffectRequest>,
    pub selection: Option<GrayImage>,
}

pub struct FilterJobs {
    service: Arc<dyn FilterService>,
    sender: Sender<JobResult>,
    receiver: Receiver<JobResult>,
    next_token: u64,
    /// Token of the newest preview; older preview results are discarded.
    preview_token: u64,
    preview_cancel: Option<Arc<AtomicBool>>,
    pending: usize,
}

impl FilterJobs {
    pub fn new(service: Arc<dyn FilterService>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            service,
            sender,
            receiver,
            next_token: 0,
            preview_token: 0,
            preview_cancel: None,
            pending: 0,
        }
    }

    pub fn service(&self) -> &Arc<dyn FilterService> {
        &self.service
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending
    }

    pub fn current_preview_token(&self) -> u64 {
        self.preview_token
    }

    /// Start a preview, cancelling whichever preview is still running.
    pub fn submit_preview(&mut self, job: FilterJob) -> u64 {
        self.cancel_preview();
        let token = self.bump_token();
        let cancel = Arc::new(AtomicBool::new(false));
        self.preview_token = token;
        self.preview_cancel = Some(cancel.clone());
        self.spawn(token, JobKind::Preview, job, cancel);
        token
    }

    /// Start a full apply. Commits are never cancelled by previews.
    pub fn submit_commit(&mut self, job: FilterJob) -> u64 {
        let token = self.bump_token();
        self.spawn(token, JobKind::Commit, job, Arc::new(AtomicBool::new(false)));
        token
    }

    /// Flag the running preview as cancelled; its result will be dropped.
    pub fn cancel_preview(&mut self) {
        if let Some(flag) = self.preview_cancel.take() {
            flag.store(true, Ordering::Relaxed);
        }
        self.preview_token = 0;
    }

    /// Drain every finished job, dropping superseded previews.
    pub fn poll(&mut self) -> Vec<JobResult> {
        let mut ready = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            if let Some(result) = self.accept(result) {
                ready.push(result);
            }
        }
        ready
    }

    /// Block until a job that survives filtering arrives, or `timeout` runs out.
    pub fn wait(&mut self, timeout: Duration) -> Option<JobResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(result) => {
                    if let Some(result) = self.accept(result) {
                        return Some(result);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(&mut self, result: JobResult) -> Option<JobResult> {
        self.pending = self.pending.saturating_sub(1);
        if result.kind == JobKind::Preview && result.token != self.preview_token {
            log::debug!("dropping stale preview #{} ({})", result.token, result.description);
            return None;
        }
        if matches!(result.outcome, Err(EngineError::JobCancelled)) {
            return None;
        }
        if result.kind == JobKind::Preview {
            self.preview_cancel = None;
        }
        Some(result)
    }

    fn bump_token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1).max(1);
        self.next_token
    }

    fn spawn(&mut self, token: u64, kind: JobKind, job: FilterJob, cancel: Arc<AtomicBool>) {
        let sender = self.sender.clone();
        let service = self.service.clone();
        self.pending += 1;
        rayon::spawn(move || {
            let FilterJob { layer_id, description, input, chain, selection } = job;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_chain(service.as_ref(), input, &chain, selection.as_ref(), &cancel)
            }))
            .unwrap_or_else(|panic_info| {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                log::error!("filter job '{}' panicked: {}", description, msg);
                Err(EngineError::JobCancelled)
            });
            let _ = sender.send(JobResult { token, kind, layer_id, description, outcome });
        });
    }
}

/// Apply each effect in order, checking the cancel flag between passes.
fn run_chain(
    service: &dyn FilterService,
    input: RasterBuffer,
    chain: &[EffectRequest],
    selection: Option<&GrayImage>,
    cancel: &AtomicBool,
) -> Result<RasterBuffer> {
    let mut current = input;
    for request in chain {
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::JobCancelled);
        }
        current = run_filter(service, &current, request, selection)?;
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(EngineError::JobCancelled);
    }
    Ok(current)
}

// ============================================================================
// DEBOUNCE
// ============================================================================

/// Coalesces rapid parameter changes into one request, released once no
/// newer change has arrived for `delay`. Time is supplied by the caller.
#[derive(Debug)]
pub struct PreviewDebouncer<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> PreviewDebouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    /// Record a change; replaces any value still waiting.
    pub fn request(&mut self, now: Instant, value: T) {
        self.pending = Some((now + self.delay, value));
    }

    /// The latest value once its quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((due, _)) if *due <= now => self.pending.take().map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::filters::CpuFilters;
    use image::Rgba;
    use std::sync::Mutex;

    fn job(color: [u8; 4], chain: Vec<EffectRequest>) -> FilterJob {
        FilterJob {
            layer_id: Uuid::new_v4(),
            description: "Invert".into(),
            input: RasterBuffer::filled(4, 4, Rgba(color)).unwrap(),
            chain,
            selection: None,
        }
    }

    #[test]
    fn commit_delivers_filtered_copy() {
        let mut jobs = FilterJobs::new(Arc::new(CpuFilters));
        let token = jobs.submit_commit(job([10, 10, 10, 255], vec![EffectRequest::new("invert")]));
        let result = jobs.wait(Duration::from_secs(10)).unwrap();
        assert_eq!(result.token, token);
        assert_eq!(result.kind, JobKind::Commit);
        assert_eq!(result.outcome.unwrap().get(0, 0), Some(Rgba([245, 245, 245, 255])));
        assert_eq!(jobs.pending_jobs(), 0);
    }

    /// Blocks until released so a preview can be superseded mid-flight.
    struct Gate(Mutex<()>);

    impl FilterService for Gate {
        fn apply(&self, input: &RasterBuffer, _request: &EffectRequest) -> Result<RasterBuffer> {
            let _held = self.0.lock().unwrap();
            input.try_clone()
        }

        fn effects(&self) -> &'static [&'static str] {
            &["gate"]
        }
    }

    #[test]
    fn superseded_preview_is_dropped() {
        let gate = Arc::new(Gate(Mutex::new(())));
        let mut jobs = FilterJobs::new(gate.clone());
        let lock = gate.0.lock().unwrap();
        let first = jobs.submit_preview(job([1, 1, 1, 255], vec![EffectRequest::new("gate")]));
        let second = jobs.submit_preview(job([2, 2, 2, 255], vec![EffectRequest::new("gate")]));
        assert!(second > first);
        drop(lock);

        let result = jobs.wait(Duration::from_secs(10)).unwrap();
        assert_eq!(result.token, second);
        assert_eq!(result.outcome.unwrap().get(0, 0), Some(Rgba([2, 2, 2, 255])));
        assert!(jobs.wait(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn cancelled_preview_never_arrives() {
        let gate = Arc::new(Gate(Mutex::new(())));
        let mut jobs = FilterJobs::new(gate.clone());
        let lock = gate.0.lock().unwrap();
        jobs.submit_preview(job(
            [1, 1, 1, 255],
            vec![EffectRequest::new("gate"), EffectRequest::new("gate")],
        ));
        jobs.cancel_preview();
        drop(lock);
        assert!(jobs.wait(Duration::from_millis(500)).is_none());
    }

    #[test]
    fn debouncer_coalesces() {
        let t0 = Instant::now();
        let mut d = PreviewDebouncer::new(Duration::from_millis(120));
        d.request(t0, 1);
        d.request(t0 + Duration::from_millis(50), 2);
        assert_eq!(d.poll(t0 + Duration::from_millis(120)), None);
        assert_eq!(d.poll(t0 + Duration::from_millis(170)), Some(2));
        assert!(!d.is_pending());
        assert_eq!(d.poll(t0 + Duration::from_secs(5)), None);
    }
}
