//! Three-phase upload coordinator
//!
//! Plans the object, asks the coordination service for destinations, runs
//! the transfer pool over them and submits the collected etags.

use tracing::{debug, info};

use super::api::{Completion, CoordinationService, InitializeRequest};
use super::session::{SessionPhase, UploadSession};
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::metrics::Timer;
use crate::plan::plan_parts;
use crate::report::UploadReport;
use crate::runtime::TransferPool;
use crate::storage::TransferFactory;

/// Drives upload sessions against one coordination service
pub struct UploadCoordinator<S, F> {
    service: S,
    factory: F,
    config: UploadConfig,
}

impl<S, F> UploadCoordinator<S, F>
where
    S: CoordinationService,
    F: TransferFactory,
{
    /// `factory` builds the transfer client of every pool worker
    pub fn new(service: S, factory: F, config: UploadConfig) -> Self {
        Self {
            service,
            factory,
            config,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Plan a session for an object of `total_size` bytes
    pub fn begin(&self, total_size: u64) -> Result<UploadSession> {
        if total_size == 0 {
            return Err(UploadError::configuration("cannot upload an empty object"));
        }
        let plan = plan_parts(total_size, self.config.part_size, &self.config.limits)?;
        debug!(
            "Planned {} parts of {} bytes for {} bytes",
            plan.len(),
            plan.part_size(),
            total_size
        );
        Ok(UploadSession::new(plan))
    }

    /// Open the upload and record the granted destinations
    pub async fn initialize(&self, session: &mut UploadSession) -> Result<()> {
        session.expect_phase(SessionPhase::Initializing)?;
        let mut timer = Timer::start();

        let request = InitializeRequest {
            content_size: session.plan().total_size(),
            digest: self.config.digest.clone(),
            dandiset: self.config.dandiset.clone(),
        };

        let outcome = self.service.initialize(&request, session.plan()).await;
        if let Err(e) = outcome.and_then(|grant| session.accept_grant(grant)) {
            session.fail(&e);
            return Err(e);
        }

        session.timings.initialize = timer.mark();
        session.advance(SessionPhase::Transferring)
    }

    /// Transfer every part; successful results are kept even when a part fails
    pub async fn transfer(&self, session: &mut UploadSession) -> Result<()> {
        session.expect_phase(SessionPhase::Transferring)?;
        let mut timer = Timer::start();

        let units = match session.work_units() {
            Ok(units) => units,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };

        let pool = TransferPool::new(self.config.pool.clone());
        let report = match pool.run(units, &self.factory).await {
            Ok(report) => report,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };

        session.record_results(report.results);
        session.timings.transfer = timer.mark();

        if let Some(e) = report.first_failure {
            session.fail(&e);
            return Err(e);
        }

        info!(
            "Transferred {} parts ({} bytes) in {:?}",
            session.results().len(),
            session.transferred_bytes(),
            session.timings.transfer
        );
        session.advance(SessionPhase::Completing)
    }

    /// Submit the part etags and replay a presigned completion if one is returned
    pub async fn complete(&self, session: &mut UploadSession) -> Result<()> {
        session.expect_phase(SessionPhase::Completing)?;
        let upload_id = session
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| UploadError::Internal {
                message: "completing a session without an upload id".into(),
            })?;

        let mut timer = Timer::start();
        let parts = session.sorted_results();

        let completion = match self.service.complete(&upload_id, &parts).await {
            Ok(completion) => completion,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };
        session.timings.complete = timer.mark();

        if let Completion::Presigned(presigned) = completion {
            if let Err(e) = self.service.finalize(&presigned).await {
                session.fail(&e);
                return Err(e);
            }
            session.timings.post_complete = timer.mark();
        }

        info!("Upload {} complete", upload_id);
        session.advance(SessionPhase::Done)
    }

    /// Run all remaining phases of `session`
    pub async fn run(&self, session: &mut UploadSession) -> Result<UploadReport> {
        self.initialize(session).await?;
        self.transfer(session).await?;
        self.complete(session).await?;

        Ok(UploadReport {
            upload_id: session.upload_id().unwrap_or_default().to_string(),
            total_size: session.plan().total_size(),
            transferred_bytes: session.transferred_bytes(),
            parts: session.sorted_results(),
            timings: *session.timings(),
        })
    }

    /// Upload an object of `total_size` bytes from start to finish
    pub async fn upload(&self, total_size: u64) -> Result<UploadReport> {
        let mut session = self.begin(total_size)?;
        self.run(&mut session).await
    }
}
