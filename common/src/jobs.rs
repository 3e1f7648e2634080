// Job submission and queue queries against an instance's job endpoint

use crate::config::Settings;
use crate::errors::{JobClientError, ValidationError};
use crate::rpc::RpcClient;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub type JobId = i64;

/// Columns in one `list_jobs` row
pub const JOB_ROW_COLUMNS: usize = 10;

/// One queued or running job as reported by `list_jobs`
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub job_name: String,
    pub state: String,
    /// Seconds
    pub runtime: f64,
    pub cpus: u32,
    pub partition: String,
    pub node: String,
    pub arch_use: f64,
    pub active_use: f64,
    pub dcache_use: f64,
}

impl JobSummary {
    /// Decode one positional row
    pub fn from_row(row: &Value) -> Result<Self, JobClientError> {
        let unexpected = |reason: String| JobClientError::UnexpectedResponse {
            method: "list_jobs".to_string(),
            reason,
        };

        let cols = row
            .as_array()
            .ok_or_else(|| unexpected(format!("row is not a list: {}", row)))?;
        if cols.len() != JOB_ROW_COLUMNS {
            return Err(unexpected(format!(
                "expected {} columns, got {}",
                JOB_ROW_COLUMNS,
                cols.len()
            )));
        }

        let job_id = job_id_from(&cols[0]).ok_or_else(|| unexpected(format!("bad job id {}", cols[0])))?;

        Ok(Self {
            job_id,
            job_name: text(&cols[1]),
            state: text(&cols[2]),
            runtime: number(&cols[3]),
            cpus: number(&cols[4]).max(0.0) as u32,
            partition: text(&cols[5]),
            node: text(&cols[6]),
            arch_use: number(&cols[7]),
            active_use: number(&cols[8]),
            dcache_use: number(&cols[9]),
        })
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}

fn job_id_from(value: &Value) -> Option<JobId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Minutes requested by a `[D-][H:]M[:S]` runtime; any nonzero seconds
/// count as one more minute
pub fn parse_runtime(raw: &str) -> Result<u64, ValidationError> {
    let invalid = || ValidationError::InvalidFieldValue {
        field: "runtime".to_string(),
        reason: format!("Incorrect time format: {}", raw),
    };
    let int = |part: &str| part.trim().parse::<u64>().map_err(|_| invalid());

    let day_parts: Vec<&str> = raw.split('-').collect();
    let (days, clock) = match day_parts.as_slice() {
        [days, clock] => (int(days)?, *clock),
        [clock] => (0, *clock),
        _ => return Err(invalid()),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let (hours, rest) = if fields.len() == 3 {
        (int(fields[0])?, &fields[1..])
    } else {
        (0, &fields[..])
    };
    let (minutes, seconds) = match rest {
        [minutes] => (int(minutes)?, 0),
        [minutes, seconds] => (int(minutes)?, int(seconds)?),
        _ => return Err(invalid()),
    };

    days.checked_mul(24 * 60)
        .and_then(|m| hours.checked_mul(60).and_then(|h| m.checked_add(h)))
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_add(u64::from(seconds > 0)))
        .ok_or_else(invalid)
}

/// A batch job request
#[derive(Debug, Clone, PartialEq)]
pub struct JobSubmission {
    /// Program and arguments; joined with spaces for the remote side
    pub command: Vec<String>,
    pub job_name: Option<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub cpus: u32,
    pub mem_mb: u64,
    /// `[D-][H:]M[:S]`
    pub runtime: String,
    pub ntasks: u32,
    pub requeue: bool,
    pub dependency: Option<String>,
    pub arch_use_add: f64,
    pub arch_use_remove: f64,
    pub active_use_add: f64,
    pub active_use_remove: f64,
    pub partition: String,
}

impl JobSubmission {
    /// Request for `command` from the current directory with the current
    /// environment and default resources
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            job_name: None,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: std::env::vars().collect(),
            cpus: 1,
            mem_mb: 1024,
            runtime: "1:0:0".to_string(),
            ntasks: 1,
            requeue: false,
            dependency: None,
            arch_use_add: 0.0,
            arch_use_remove: 0.0,
            active_use_add: 0.0,
            active_use_remove: 0.0,
            partition: "compute".to_string(),
        }
    }

    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn mem_mb(mut self, mem_mb: u64) -> Self {
        self.mem_mb = mem_mb;
        self
    }

    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn ntasks(mut self, ntasks: u32) -> Self {
        self.ntasks = ntasks;
        self
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Explicit name, else the file name of the program
    pub fn effective_job_name(&self) -> String {
        if let Some(name) = self.job_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        self.command
            .first()
            .and_then(|program| Path::new(program).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Check the request and return the runtime in minutes
    pub fn validate(&self) -> Result<u64, ValidationError> {
        if self.command.iter().all(|arg| arg.trim().is_empty()) {
            return Err(ValidationError::MissingField("command".to_string()));
        }
        if self.cpus == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "cpus".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ntasks == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "ntasks".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        parse_runtime(&self.runtime)
    }

    /// Positional `submit_job` arguments
    fn rpc_params(&self, runtime_minutes: u64) -> Vec<Value> {
        vec![
            json!(self.effective_job_name()),
            json!(self.command_line()),
            json!(self.cwd.to_string_lossy()),
            json!(self.env),
            json!(self.cpus),
            json!(self.mem_mb),
            json!(runtime_minutes),
            json!(u8::from(self.requeue)),
            json!(self.dependency),
            json!(self.arch_use_add),
            json!(self.arch_use_remove),
            json!(self.active_use_add),
            json!(self.active_use_remove),
            json!(self.partition),
        ]
    }
}

/// Client for the job endpoint of one instance
#[derive(Debug, Clone)]
pub struct JobClient {
    rpc: RpcClient,
}

impl JobClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Resolve `requested` through the registry under the settings' config
    /// home and bind to its job endpoint
    pub fn for_instance(
        settings: &Settings,
        requested: Option<&str>,
        override_host: Option<&str>,
    ) -> Result<Self, JobClientError> {
        let url = settings
            .endpoint_resolver()
            .job_url(requested, override_host)?;
        Ok(Self::new(settings.rpc_client(url)?))
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }

    #[instrument(skip(self), fields(url = %self.url()))]
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, JobClientError> {
        let result = self.rpc.call_with_retry("list_jobs", Vec::new()).await?;
        match result {
            Value::Array(rows) => rows.iter().map(JobSummary::from_row).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(JobClientError::UnexpectedResponse {
                method: "list_jobs".to_string(),
                reason: format!("expected a list, got {}", other),
            }),
        }
    }

    pub async fn list_job_ids(&self) -> Result<Vec<JobId>, JobClientError> {
        Ok(self
            .list_jobs()
            .await?
            .into_iter()
            .map(|job| job.job_id)
            .collect())
    }

    /// Submit one job per task; returns the ids in submission order
    #[instrument(skip(self, submission), fields(url = %self.url(), ntasks = submission.ntasks))]
    pub async fn submit(&self, submission: &JobSubmission) -> Result<Vec<JobId>, JobClientError> {
        let runtime_minutes = submission.validate()?;
        let params = submission.rpc_params(runtime_minutes);

        let mut ids = Vec::with_capacity(submission.ntasks as usize);
        for _ in 0..submission.ntasks {
            let result = self.rpc.call_with_retry("submit_job", params.clone()).await?;
            let id = job_id_from(&result).ok_or_else(|| JobClientError::UnexpectedResponse {
                method: "submit_job".to_string(),
                reason: format!("bad job id {}", result),
            })?;
            ids.push(id);
        }

        info!(job_ids = ?ids, job_name = %submission.effective_job_name(), "Jobs submitted");
        Ok(ids)
    }
}
