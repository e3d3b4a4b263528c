//! Control handler implementation for missive
//!
//! This module implements the `CommandHandler` trait to process control
//! requests against the running dispatcher.

use std::{str::FromStr, sync::Arc, time::Instant};

use async_trait::async_trait;
use missive_control::{
    ControlAuthConfig, ControlError, JobCommand, JobDetails, JobSummary, Request, RequestCommand,
    Response, ResponseData, StopResult, SystemCommand, SystemStatus, server::CommandHandler,
};
use missive_dispatch::Dispatcher;
use missive_store::JobId;

/// Handler for control commands
pub struct MissiveControlHandler {
    /// The dispatcher every job command is routed to
    dispatcher: Arc<Dispatcher>,
    /// Token authentication settings
    auth: ControlAuthConfig,
    /// Server start time for uptime calculation
    start_time: Instant,
}

impl MissiveControlHandler {
    /// Create a new control handler
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, auth: ControlAuthConfig) -> Self {
        Self {
            dispatcher,
            auth,
            start_time: Instant::now(),
        }
    }
}

#[async_trait]
impl CommandHandler for MissiveControlHandler {
    async fn handle_request(&self, request: Request) -> missive_control::Result<Response> {
        if !request.is_version_compatible() {
            return Ok(Response::error(format!(
                "Protocol version mismatch: client sent {}, server expects {}",
                request.version,
                missive_control::PROTOCOL_VERSION
            )));
        }

        if let Err(reason) = self.auth.validate_token_option(request.token.as_deref()) {
            return Ok(Response::error(reason));
        }

        match request.command {
            RequestCommand::Job(job_cmd) => self.handle_job_command(job_cmd).await,
            RequestCommand::System(sys_cmd) => self.handle_system_command(sys_cmd).await,
        }
    }
}

impl MissiveControlHandler {
    /// Handle dispatch job commands
    async fn handle_job_command(&self, command: JobCommand) -> missive_control::Result<Response> {
        match command {
            JobCommand::Submit { records, config } => {
                match self.dispatcher.submit(records, config).await {
                    Ok(job_id) => Ok(Response::data(ResponseData::JobSubmitted(
                        job_id.to_string(),
                    ))),
                    Err(e) => Err(ControlError::ServerError(format!(
                        "Failed to submit job: {e}"
                    ))),
                }
            }

            JobCommand::Resume {
                job_id,
                records,
                config,
            } => {
                let id = parse_job_id(&job_id)?;
                match self.dispatcher.resume(id, records, config).await {
                    Ok(()) => Ok(Response::data(ResponseData::Message(format!(
                        "Job {id} resumed"
                    )))),
                    Err(e) => Err(ControlError::ServerError(format!(
                        "Failed to resume job {id}: {e}"
                    ))),
                }
            }

            JobCommand::Status { job_id } => {
                let id = parse_job_id(&job_id)?;
                match self.dispatcher.job_state(&id).await {
                    Ok(state) => Ok(Response::data(ResponseData::JobDetails(Box::new(
                        JobDetails::from_state(&state),
                    )))),
                    Err(e) => Err(ControlError::ServerError(format!("Job {id}: {e}"))),
                }
            }

            JobCommand::Stop { job_id } => {
                let id = parse_job_id(&job_id)?;
                let signaled = self.dispatcher.request_stop(&id);
                Ok(Response::data(ResponseData::StopResult(StopResult {
                    job_id: id.to_string(),
                    signaled,
                })))
            }

            JobCommand::List { status_filter } => {
                let states = self
                    .dispatcher
                    .list_jobs()
                    .await
                    .map_err(|e| ControlError::ServerError(format!("Failed to list jobs: {e}")))?;

                let summaries: Vec<JobSummary> = states
                    .iter()
                    .map(JobSummary::from_state)
                    .filter(|summary| {
                        status_filter
                            .as_deref()
                            .is_none_or(|filter| summary.status.eq_ignore_ascii_case(filter))
                    })
                    .collect();

                Ok(Response::data(ResponseData::JobList(summaries)))
            }
        }
    }

    /// Handle system management commands
    async fn handle_system_command(
        &self,
        command: SystemCommand,
    ) -> missive_control::Result<Response> {
        match command {
            SystemCommand::Ping => Ok(Response::ok()),

            SystemCommand::Status => {
                let stored_jobs = self
                    .dispatcher
                    .list_jobs()
                    .await
                    .map_or(0, |states| states.len());

                let status = SystemStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    live_jobs: self.dispatcher.live_jobs().len(),
                    stored_jobs,
                };

                Ok(Response::data(ResponseData::SystemStatus(status)))
            }
        }
    }
}

fn parse_job_id(raw: &str) -> missive_control::Result<JobId> {
    JobId::from_str(raw).map_err(|e| ControlError::InvalidJobId(format!("{raw}: {e}")))
}
