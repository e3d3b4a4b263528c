//! Dispatcher orchestration: accepting jobs, spawning their runs, and
//! sweeping expired state.

use std::{sync::Arc, time::Duration};

use missive_common::{Signal, internal};
use missive_store::{JobId, JobState, ProgressStore, StoreConfig, StoreError};
use serde::Deserialize;

use crate::{
    batch::{RecipientBatch, RecipientRecord},
    error::DispatchError,
    job::DispatchJob,
    registry::{JobHandle, JobRegistry, StopToken},
    transport::SmtpRelayTransport,
    types::{JobConfig, SmtpTimeouts},
};

fn default_relay_host() -> String {
    "smtp.gmail.com".to_string()
}

const fn default_relay_port() -> u16 {
    587
}

const fn default_require_tls() -> bool {
    true
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

const fn default_inter_send_delay() -> u64 {
    5
}

const fn default_checkpoint_attempts() -> u32 {
    3
}

const fn default_retention() -> u64 {
    86400 // 24 hours
}

const fn default_sweep_interval() -> u64 {
    60
}

/// The dispatch component: owns the progress store and the live-job registry,
/// accepts submit/resume/stop requests, and sweeps expired job state.
///
/// Each accepted job runs on its own spawned task with its own relay session;
/// the dispatcher itself never touches the wire.
#[derive(Debug, Deserialize)]
pub struct Dispatcher {
    /// Hostname of the SMTP relay to deliver through
    #[serde(default = "default_relay_host")]
    pub relay_host: String,

    /// Port of the SMTP relay (587 for submission with STARTTLS)
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    /// Require STARTTLS before authenticating
    ///
    /// When `true`, a relay that refuses STARTTLS fails the session rather
    /// than falling back to cleartext.
    #[serde(default = "default_require_tls")]
    pub require_tls: bool,

    /// Accept invalid TLS certificates (for testing only)
    ///
    /// **SECURITY WARNING**: disables certificate validation for the relay
    /// connection. Only enable for testing with self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Name to present in EHLO
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// SMTP operation timeout configuration
    #[serde(default)]
    pub smtp_timeouts: SmtpTimeouts,

    /// Default pause between consecutive sends (in seconds)
    ///
    /// A job's own [`JobConfig`] may override this per job.
    #[serde(default = "default_inter_send_delay")]
    pub inter_send_delay_secs: u64,

    /// How many times a failed checkpoint write is attempted before the job
    /// is failed
    #[serde(default = "default_checkpoint_attempts")]
    pub checkpoint_attempts: u32,

    /// How long terminal job state is retained before the sweeper removes it
    /// (in seconds)
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How often to sweep expired job state (in seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Progress store backend configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// The progress store (initialized in `init()`)
    #[serde(skip)]
    store_handle: Option<Arc<dyn ProgressStore>>,

    /// Live-job registry
    #[serde(skip)]
    registry: JobRegistry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            relay_host: default_relay_host(),
            relay_port: default_relay_port(),
            require_tls: default_require_tls(),
            accept_invalid_certs: false,
            helo_name: default_helo_name(),
            smtp_timeouts: SmtpTimeouts::default(),
            inter_send_delay_secs: default_inter_send_delay(),
            checkpoint_attempts: default_checkpoint_attempts(),
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
            store: StoreConfig::default(),
            store_handle: None,
            registry: JobRegistry::new(),
        }
    }
}

impl Dispatcher {
    /// Initialize the dispatcher, opening the configured progress store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store backend cannot be opened.
    pub fn init(&mut self) -> Result<(), DispatchError> {
        internal!("Initialising Dispatcher ...");
        self.store_handle = Some(self.store.clone().into_store()?);
        internal!(
            "Dispatcher ready: relay {}:{}, retention {}s",
            self.relay_host,
            self.relay_port,
            self.retention_secs
        );
        Ok(())
    }

    fn store(&self) -> Result<Arc<dyn ProgressStore>, DispatchError> {
        self.store_handle.clone().ok_or_else(|| {
            DispatchError::NotInitialized("Dispatcher not initialised. Call init() first.".into())
        })
    }

    /// Accept a new batch, persist its initial state, and start its run.
    ///
    /// Returns the generated job ID immediately; the run continues on its own
    /// task.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial state cannot be persisted.
    pub async fn submit(
        &self,
        records: Vec<RecipientRecord>,
        config: JobConfig,
    ) -> Result<JobId, DispatchError> {
        let store = self.store()?;
        let job_id = JobId::generate();
        let batch = RecipientBatch::new(records);

        store.create(&JobState::queued(job_id, batch.len())).await?;

        // A freshly generated ULID cannot be live, but the registry stays
        // the single authority on that.
        let Some(token) = self.registry.register(job_id) else {
            return Err(DispatchError::AlreadyRunning(job_id));
        };

        internal!(
            "Job {job_id} submitted with {} record(s)",
            batch.len()
        );
        self.spawn_run(job_id, batch, config, token, store);
        Ok(job_id)
    }

    /// Resume an interrupted job with its (re-supplied) batch.
    ///
    /// Refused while the job is live. If no state survives for the ID, fresh
    /// state is created and the whole batch runs from the start.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRunning`] for a live job, or a store
    /// error if state cannot be read or created.
    pub async fn resume(
        &self,
        job_id: JobId,
        records: Vec<RecipientRecord>,
        config: JobConfig,
    ) -> Result<(), DispatchError> {
        let store = self.store()?;
        let batch = RecipientBatch::new(records);

        let Some(token) = self.registry.register(job_id) else {
            return Err(DispatchError::AlreadyRunning(job_id));
        };

        let result = match store.read(&job_id).await {
            Ok(state) => {
                internal!(
                    "Job {job_id} resuming: {} of {} already processed",
                    state.last_processed_index,
                    state.total
                );
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                internal!("Job {job_id} has no stored state, starting from the beginning");
                store.create(&JobState::queued(job_id, batch.len())).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.registry.unregister(&job_id);
            return Err(e.into());
        }

        self.spawn_run(job_id, batch, config, token, store);
        Ok(())
    }

    fn spawn_run(
        &self,
        job_id: JobId,
        batch: RecipientBatch,
        config: JobConfig,
        token: StopToken,
        store: Arc<dyn ProgressStore>,
    ) {
        let delay = Duration::from_secs(
            config
                .inter_send_delay_secs
                .unwrap_or(self.inter_send_delay_secs),
        );
        let transport = SmtpRelayTransport::new(
            self.relay_host.clone(),
            self.relay_port,
            self.helo_name.clone(),
            self.require_tls,
            self.accept_invalid_certs,
            self.smtp_timeouts.clone(),
            config,
        );
        let job = DispatchJob::new(
            job_id,
            batch,
            store,
            self.registry.clone(),
            token,
            delay,
            self.checkpoint_attempts,
            Duration::from_secs(self.retention_secs),
        );

        tokio::spawn(job.run(transport));
    }

    /// Snapshot of one job's stored state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the job does not exist.
    pub async fn job_state(&self, job_id: &JobId) -> Result<JobState, DispatchError> {
        Ok(self.store()?.read(job_id).await?)
    }

    /// All stored jobs in creation order.
    ///
    /// Jobs swept between the listing and the read are skipped rather than
    /// failing the whole listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub async fn list_jobs(&self) -> Result<Vec<JobState>, DispatchError> {
        let store = self.store()?;
        let mut states = Vec::new();

        for job_id in store.list().await? {
            match store.read(&job_id).await {
                Ok(state) => states.push(state),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(states)
    }

    /// Raise the stop flag on a live job. Returns `false` when the job is
    /// not live.
    pub fn request_stop(&self, job_id: &JobId) -> bool {
        self.registry.request_stop(job_id)
    }

    /// Handles for every currently running job.
    #[must_use]
    pub fn live_jobs(&self) -> Vec<JobHandle> {
        self.registry.live_jobs()
    }

    /// Run the dispatcher supervisor until shutdown.
    ///
    /// Sweeps expired job state at the configured interval. On shutdown,
    /// every live job is signaled to stop and the supervisor waits (up to
    /// 30s) for them to drain; jobs that outlive the wait resume from their
    /// last checkpoint on the next start.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher was never initialised.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        internal!("Dispatcher starting");

        let store = self.store()?;

        let mut sweep_timer =
            tokio::time::interval(Duration::from_secs(self.sweep_interval_secs));

        // Skip the first tick to avoid immediate execution
        sweep_timer.tick().await;

        loop {
            tokio::select! {
                _ = sweep_timer.tick() => {
                    match store.remove_expired().await {
                        Ok(removed) if !removed.is_empty() => {
                            internal!(
                                level = INFO,
                                "Swept {} expired job(s)",
                                removed.len()
                            );
                        }
                        Ok(_) => {
                            tracing::debug!("Sweep found no expired jobs");
                        }
                        Err(e) => {
                            tracing::error!("Error sweeping expired jobs: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Dispatcher received shutdown signal");

                            let signaled = self.registry.stop_all();
                            if signaled > 0 {
                                internal!(
                                    level = INFO,
                                    "Signaled {signaled} running job(s) to stop"
                                );
                            }

                            // Wait for live jobs to reach their record
                            // boundary and checkpoint (with 30s timeout)
                            let drain_timeout = Duration::from_secs(30);
                            let start = std::time::Instant::now();

                            while !self.registry.is_empty() {
                                if start.elapsed() >= drain_timeout {
                                    tracing::warn!(
                                        "Shutdown timeout exceeded, {} job(s) will resume from their last checkpoint on restart",
                                        self.registry.len()
                                    );
                                    break;
                                }

                                tracing::debug!(
                                    "Waiting for {} running job(s) to stop ({:.1}s elapsed)...",
                                    self.registry.len(),
                                    start.elapsed().as_secs_f64()
                                );
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }

                            if self.registry.is_empty() {
                                internal!("All running jobs stopped cleanly");
                            }

                            internal!("Dispatcher shutdown complete");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("Dispatcher shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
