//! Progress reporting for one export job.

use tokio::sync::mpsc::UnboundedSender;

use splice_core::JobContext;

use crate::protocol::Event;

/// Demux has started.
pub const DEMUX_START: f64 = 5.0;
/// Rendering spans `[RENDER_START, RENDER_START + RENDER_SPAN]`.
pub const RENDER_START: f64 = 20.0;
pub const RENDER_SPAN: f64 = 70.0;
/// Video is flushed.
pub const VIDEO_FLUSHED: f64 = 90.0;
pub const COMPLETE: f64 = 100.0;

/// Forwards progress events, never letting the value go backwards and
/// going silent once the job is cancelled.
pub struct ProgressReporter {
    ctx: JobContext,
    sink: Option<UnboundedSender<Event>>,
    last: Option<f64>,
}

impl ProgressReporter {
    pub fn new(ctx: &JobContext, sink: UnboundedSender<Event>) -> Self {
        Self {
            ctx: ctx.clone(),
            sink: Some(sink),
            last: None,
        }
    }

    /// A reporter that only tracks the value.
    pub fn silent(ctx: &JobContext) -> Self {
        Self {
            ctx: ctx.clone(),
            sink: None,
            last: None,
        }
    }

    pub fn report(&mut self, progress: f64) {
        if self.ctx.is_cancelled() {
            return;
        }
        let progress = progress.clamp(0.0, COMPLETE);
        if self.last.is_some_and(|last| progress <= last) {
            return;
        }
        self.last = Some(progress);
        tracing::trace!(progress, "progress");
        if let Some(sink) = &self.sink {
            let _ = sink.send(Event::Progress { progress });
        }
    }

    /// Rendering progress after `index` of `count` frames.
    pub fn report_frame(&mut self, index: u64, count: u64) {
        let fraction = if count == 0 {
            1.0
        } else {
            index as f64 / count as f64
        };
        self.report(RENDER_START + RENDER_SPAN * fraction);
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

/// Frames between rendering reports for `interval_secs` of output at `fps`.
pub fn frames_per_report(interval_secs: f64, fps: f64) -> u64 {
    ((interval_secs * fps).round() as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<f64> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Progress { progress } = event {
                out.push(progress);
            }
        }
        out
    }

    #[test]
    fn test_reports_are_monotonic() {
        let ctx = JobContext::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(&ctx, tx);
        reporter.report(DEMUX_START);
        reporter.report_frame(0, 10);
        reporter.report(12.0);
        reporter.report_frame(5, 10);
        reporter.report_frame(5, 10);
        reporter.report(150.0);
        assert_eq!(drain(&mut rx), vec![5.0, 20.0, 55.0, 100.0]);
    }

    #[test]
    fn test_silent_after_cancel() {
        let ctx = JobContext::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(&ctx, tx);
        reporter.report(DEMUX_START);
        ctx.cancel();
        reporter.report(VIDEO_FLUSHED);
        assert_eq!(drain(&mut rx), vec![5.0]);
        assert_eq!(reporter.last(), Some(5.0));
    }

    #[test]
    fn test_frames_per_report() {
        assert_eq!(frames_per_report(0.5, 30.0), 15);
        assert_eq!(frames_per_report(0.5, 1.0), 1);
        assert_eq!(frames_per_report(0.01, 24.0), 1);
    }
}
