//! Command handlers.
//!
//! Each handler resolves its tart, lets the registry or pipeline enforce
//! ownership under the tart's lock, and reports the result as text.

use std::io::Write;
use std::sync::Arc;

use tart_core::Principal;
use tart_deploy::{DeployPipeline, DeployReport, ScriptOutcome, TreeMaterializer};
use tart_metrics::{StatsCollector, format_bytes, format_duration};
use tart_state::Tart;
use tart_supervisor::{Supervisor, TartError, TartRegistry, TartResult, authorize};
use tracing::{info, warn};

use crate::requests::{Params, Request};

/// Whether a command failed, for the transport's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed,
}

impl CommandOutcome {
    pub fn failed(self) -> bool {
        self == CommandOutcome::Failed
    }
}

/// Everything a command can reach, assembled once per server.
pub struct Orchestrator<M> {
    registry: TartRegistry,
    pipeline: DeployPipeline<M>,
    stats: StatsCollector,
}

impl<M: TreeMaterializer> Orchestrator<M> {
    pub fn new(supervisor: Arc<Supervisor>, materializer: M) -> Self {
        Self {
            registry: TartRegistry::new(supervisor.clone()),
            pipeline: DeployPipeline::new(supervisor.clone(), materializer),
            stats: StatsCollector::new(supervisor),
        }
    }

    /// Transport entry point: run `command` for `username` (empty for the
    /// management console) and write the response to `sink`.
    pub async fn dispatch(
        &self,
        command: &str,
        params: &Params,
        sink: &mut (dyn Write + Send),
        username: &str,
    ) -> CommandOutcome {
        let principal = Principal::from_username(username);
        let request = match Request::parse(command, params) {
            Ok(request) => request,
            Err(e) => {
                for line in e.lines() {
                    let _ = writeln!(sink, "{line}");
                }
                return CommandOutcome::Failed;
            }
        };

        info!(%command, user = %principal, "command received");
        let outcome = match self.execute(request, &principal, sink).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%command, user = %principal, error = %e, "command failed");
                let _ = writeln!(sink, "Err: {e}");
                CommandOutcome::Failed
            }
        };
        let _ = sink.flush();
        outcome
    }

    /// Run an already parsed request.
    pub async fn execute(
        &self,
        request: Request,
        principal: &Principal,
        sink: &mut (dyn Write + Send),
    ) -> TartResult<CommandOutcome> {
        match request {
            Request::ListTarts => {
                for tart in self.registry.list()? {
                    write_tart_summary(sink, &tart);
                }
            }
            Request::NewTart { tart, owner } => {
                let owner = match (principal, owner) {
                    (Principal::User(name), _) => name.clone(),
                    (Principal::Trusted, Some(owner)) => owner,
                    (Principal::Trusted, None) => {
                        return Err(TartError::InvalidArgument(
                            "Tarts created from the management console need --owner <username>."
                                .to_string(),
                        ));
                    }
                };
                let created = self.registry.create(&tart, &owner).await?;
                self.pipeline
                    .pre_git_receive(principal, &created.push_url)
                    .await?;
                let _ = writeln!(
                    sink,
                    "Created tart {} owned by {owner}. Push to it to deploy.",
                    created.push_url
                );
            }
            Request::StartTart { tart } => {
                let tart = self.registry.resolve(&tart)?;
                let pid = self.registry.start(principal, &tart.push_url).await?;
                let _ = writeln!(sink, "Started {} (PID {pid}).", tart.push_url);
            }
            Request::StopTart { tart } => {
                let tart = self.registry.resolve(&tart)?;
                self.registry.stop(principal, &tart.push_url).await?;
                let _ = writeln!(sink, "Stopped {}.", tart.push_url);
            }
            Request::EditTart { tart, edit } => {
                let tart = self.registry.resolve(&tart)?;
                let updated = self.registry.edit(principal, &tart.push_url, &edit).await?;
                write_tart_summary(sink, &updated);
            }
            Request::RestartMode { tart, policy } => {
                let tart = self.registry.resolve(&tart)?;
                let updated = self
                    .registry
                    .set_restart_policy(principal, &tart.push_url, policy)
                    .await?;
                if updated.restart_on_stop {
                    let _ = writeln!(
                        sink,
                        "Restart on stop ENABLED for {} (lull period {}s).",
                        updated.push_url, updated.restart_delay_secs
                    );
                } else {
                    let _ = writeln!(sink, "Restart on stop disabled for {}.", updated.push_url);
                }
            }
            Request::AddOwner { tart, username } => {
                let tart = self.registry.resolve(&tart)?;
                let updated = self
                    .registry
                    .add_owner(principal, &tart.push_url, &username)
                    .await?;
                write_owners(sink, &updated);
            }
            Request::RemoveOwner { tart, username } => {
                let tart = self.registry.resolve(&tart)?;
                let updated = self
                    .registry
                    .remove_owner(principal, &tart.push_url, &username)
                    .await?;
                write_owners(sink, &updated);
            }
            Request::DigestTartconfig { tart } => {
                let tart = self.registry.resolve(&tart)?;
                match self.pipeline.digest(principal, &tart.push_url, sink).await? {
                    ScriptOutcome::Missing => {
                        let _ = writeln!(
                            sink,
                            "No tartconfig in the deployment of {}.",
                            tart.push_url
                        );
                    }
                    ScriptOutcome::Succeeded => {}
                    ScriptOutcome::Failed { .. } => return Ok(CommandOutcome::Failed),
                }
            }
            Request::DeleteTart { tart } => {
                let tart = self.registry.resolve(&tart)?;
                self.registry.delete(principal, &tart.push_url).await?;
                let _ = writeln!(sink, "Deleted {}.", tart.push_url);
            }
            Request::TartStats { tart } => {
                let tart = self.registry.resolve(&tart)?;
                authorize(principal, &tart)?;
                let metrics = self.stats.stats_for(&tart)?;
                let _ = writeln!(
                    sink,
                    "{} ({}): PID {} ({} processes)",
                    tart.name, tart.push_url, metrics.pid, metrics.processes
                );
                let _ = writeln!(
                    sink,
                    "\tMemory: {} resident, {} virtual",
                    format_bytes(metrics.resident_memory_bytes),
                    format_bytes(metrics.virtual_memory_bytes)
                );
                let _ = writeln!(sink, "\tCPU time: {}", format_duration(metrics.cpu_time));
                let _ = writeln!(sink, "\tUptime: {}", format_duration(metrics.run_time));
            }
        }
        Ok(CommandOutcome::Succeeded)
    }

    /// Deploy the latest push to `push_url`. Called by the transport once a
    /// push has been received.
    pub async fn deploy(
        &self,
        push_url: &str,
        sink: &mut (dyn Write + Send),
        username: &str,
    ) -> TartResult<DeployReport> {
        let principal = Principal::from_username(username);
        let tart = self.registry.resolve(push_url)?;
        self.pipeline.deploy(&principal, &tart.push_url, sink).await
    }
}

fn write_tart_summary(sink: &mut (dyn Write + Send), tart: &Tart) {
    let _ = write!(sink, "{} ({}): ", tart.name, tart.push_url);
    let _ = match (tart.is_running, tart.pid) {
        (true, Some(pid)) => write!(sink, "Running (PID {pid}) "),
        (true, None) => write!(sink, "Running "),
        (false, _) => write!(sink, "Stopped. "),
    };
    let _ = if tart.log_stdout {
        writeln!(sink, "[Stdout -> Log is ENABLED]")
    } else {
        writeln!(sink, "[Stdout -> Log is disabled]")
    };
    for entry in &tart.env {
        let _ = writeln!(sink, "\t{entry}");
    }
}

fn write_owners(sink: &mut (dyn Write + Send), tart: &Tart) {
    let _ = writeln!(sink, "Owners of {}: {}", tart.push_url, tart.owners.join(", "));
}
