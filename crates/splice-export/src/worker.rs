//! Message loop that runs export jobs on behalf of a caller.
//!
//! The worker announces `ready`, then serves `start`/`cancel` requests.
//! Each job runs on its own task with its own [`JobContext`]; only one job
//! runs at a time, and a `start` that arrives meanwhile is answered with a
//! `debug` message.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use splice_core::codec::CodecFactory;
use splice_core::{ExportConfig, JobContext, SpliceResult};
use splice_ir::{Project, ProjectDescriptor};

use crate::driver::ExportDriver;
use crate::progress::ProgressReporter;
use crate::protocol::{Event, Request};

struct ActiveJob {
    ctx: JobContext,
    handle: JoinHandle<()>,
}

pub struct Worker {
    config: Arc<ExportConfig>,
    codecs: Arc<dyn CodecFactory>,
}

impl Worker {
    pub fn new(config: Arc<ExportConfig>, codecs: Arc<dyn CodecFactory>) -> Self {
        Self { config, codecs }
    }

    /// Serve requests until the request channel closes. A job still
    /// running at that point is cancelled and awaited.
    pub async fn run(self, mut requests: mpsc::Receiver<Request>, events: UnboundedSender<Event>) {
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<String>();
        let mut active: Option<ActiveJob> = None;
        let _ = events.send(Event::Ready);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Start { project }) => {
                        if active.as_ref().is_some_and(|job| !job.handle.is_finished()) {
                            // `error` is terminal for the running job.
                            warn!("start rejected, an export is already running");
                            let _ = events.send(Event::Debug {
                                message: "start ignored: an export is already running".into(),
                            });
                            continue;
                        }
                        if let Some(job) = active.take() {
                            let _ = job.handle.await;
                        }
                        let job = self.spawn_job(*project, events.clone(), finished_tx.clone());
                        active = Some(job);
                    }
                    Some(Request::Cancel) => match &active {
                        Some(job) => {
                            info!(job = %job.ctx.id(), "cancel requested");
                            job.ctx.cancel();
                        }
                        None => info!("cancel ignored, no export running"),
                    },
                    None => {
                        if let Some(job) = active.take() {
                            job.ctx.cancel();
                            if let Err(e) = job.handle.await {
                                warn!(error = %e, "export task ended abnormally");
                            }
                        }
                        break;
                    }
                },
                Some(id) = finished_rx.recv() => {
                    if active.as_ref().is_some_and(|job| job.ctx.id() == id) {
                        if let Some(job) = active.take() {
                            if let Err(e) = job.handle.await {
                                warn!(error = %e, "export task ended abnormally");
                            }
                        }
                    }
                }
            }
        }
    }

    fn spawn_job(
        &self,
        project: ProjectDescriptor,
        events: UnboundedSender<Event>,
        finished: UnboundedSender<String>,
    ) -> ActiveJob {
        let debug_tx = events.clone();
        let ctx = JobContext::new()
            .with_debug(self.config.job.debug)
            .with_diagnostics(Arc::new(move |message| {
                let _ = debug_tx.send(Event::Debug { message });
            }));
        info!(job = %ctx.id(), "export job accepted");

        let job_ctx = ctx.clone();
        let config = self.config.clone();
        let codecs = self.codecs.clone();
        let handle = tokio::spawn(async move {
            let outcome = run_job(&job_ctx, config, codecs, project, events.clone()).await;
            match outcome {
                Ok(bytes) if !job_ctx.is_cancelled() => {
                    let _ = events.send(Event::Done {
                        buffer: Arc::new(bytes),
                    });
                }
                Ok(_) => info!(job = %job_ctx.id(), "output discarded after cancel"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    let _ = events.send(Event::Error {
                        message: e.to_string(),
                    });
                }
            }
            let _ = finished.send(job_ctx.id().to_string());
        });
        ActiveJob { ctx, handle }
    }
}

async fn run_job(
    ctx: &JobContext,
    config: Arc<ExportConfig>,
    codecs: Arc<dyn CodecFactory>,
    descriptor: ProjectDescriptor,
    events: UnboundedSender<Event>,
) -> SpliceResult<Vec<u8>> {
    let project = Project::from_descriptor(descriptor)?;
    let progress = ProgressReporter::new(ctx, events);
    let mut driver = ExportDriver::new(ctx.clone(), config, codecs, progress);
    driver.run(&project).await
}
