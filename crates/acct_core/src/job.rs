//! Typed, lenient view of one job-history document (`_source` of a search hit).
//!
//! The history store is not consistent about value types: the same attribute
//! may arrive as a JSON number, a numeric string or a boolean. Every field is
//! optional and numeric fields accept all three shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::UNKNOWN;

/// Vanilla universe, assumed when `JobUniverse` is missing.
pub const UNIVERSE_VANILLA: i64 = 5;
/// Scheduler universe (runs without a shadow).
pub const UNIVERSE_SCHEDULER: i64 = 7;
/// Local universe (runs without a shadow).
pub const UNIVERSE_LOCAL: i64 = 12;
/// `JobStatus` of a removed job.
pub const STATUS_REMOVED: i64 = 3;

/// Grouping attribute used by the per-dimension tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GroupField {
    User,
    Project,
    Schedd,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobAd {
    #[serde(rename = "User", deserialize_with = "lenient::string")]
    pub user: Option<String>,
    #[serde(rename = "ProjectName", deserialize_with = "lenient::string")]
    pub project_name: Option<String>,
    #[serde(rename = "ScheddName", deserialize_with = "lenient::string")]
    pub schedd_name: Option<String>,
    #[serde(rename = "GlobalJobId", deserialize_with = "lenient::string")]
    pub global_job_id: Option<String>,

    #[serde(rename = "RemoteWallClockTime", deserialize_with = "lenient::number")]
    pub remote_wall_clock_time: Option<f64>,
    #[serde(rename = "CommittedTime", deserialize_with = "lenient::number")]
    pub committed_time: Option<f64>,
    #[serde(rename = "RequestCpus", deserialize_with = "lenient::number")]
    pub request_cpus: Option<f64>,
    #[serde(rename = "RequestGpus", deserialize_with = "lenient::number")]
    pub request_gpus: Option<f64>,
    #[serde(rename = "RequestMemory", deserialize_with = "lenient::number")]
    pub request_memory: Option<f64>,
    #[serde(rename = "RequestDisk", deserialize_with = "lenient::number")]
    pub request_disk: Option<f64>,
    #[serde(rename = "RecordTime", deserialize_with = "lenient::number")]
    pub record_time: Option<f64>,
    #[serde(rename = "JobStartDate", deserialize_with = "lenient::number")]
    pub job_start_date: Option<f64>,
    #[serde(rename = "JobCurrentStartDate", deserialize_with = "lenient::number")]
    pub job_current_start_date: Option<f64>,
    #[serde(rename = "MemoryUsage", deserialize_with = "lenient::number")]
    pub memory_usage: Option<f64>,
    #[serde(rename = "DiskUsage", deserialize_with = "lenient::number")]
    pub disk_usage: Option<f64>,
    #[serde(rename = "NumJobStarts", deserialize_with = "lenient::number")]
    pub num_job_starts: Option<f64>,
    #[serde(rename = "NumShadowStarts", deserialize_with = "lenient::number")]
    pub num_shadow_starts: Option<f64>,
    #[serde(rename = "NumHolds", deserialize_with = "lenient::number")]
    pub num_holds: Option<f64>,
    #[serde(rename = "NumHoldsByReason", deserialize_with = "lenient::number_map")]
    pub num_holds_by_reason: Option<BTreeMap<String, f64>>,
    #[serde(rename = "JobUniverse", deserialize_with = "lenient::integer")]
    pub job_universe: Option<i64>,
    #[serde(rename = "JobStatus", deserialize_with = "lenient::integer")]
    pub job_status: Option<i64>,
    #[serde(rename = "EnteredCurrentStatus", deserialize_with = "lenient::number")]
    pub entered_current_status: Option<f64>,
    #[serde(rename = "BytesSent", deserialize_with = "lenient::number")]
    pub bytes_sent: Option<f64>,
    #[serde(rename = "BytesRecvd", deserialize_with = "lenient::number")]
    pub bytes_recvd: Option<f64>,
    #[serde(rename = "TransferInputStats", deserialize_with = "lenient::number_map")]
    pub transfer_input_stats: Option<BTreeMap<String, f64>>,
    #[serde(rename = "TransferOutputStats", deserialize_with = "lenient::number_map")]
    pub transfer_output_stats: Option<BTreeMap<String, f64>>,
    #[serde(rename = "SingularityImage", deserialize_with = "lenient::string")]
    pub singularity_image: Option<String>,
    #[serde(rename = "ActivationDuration", deserialize_with = "lenient::number")]
    pub activation_duration: Option<f64>,
    #[serde(rename = "ActivationSetupDuration", deserialize_with = "lenient::number")]
    pub activation_setup_duration: Option<f64>,
    #[serde(rename = "CondorVersion", deserialize_with = "lenient::string")]
    pub condor_version: Option<String>,
    #[serde(rename = "DAGNodeName", deserialize_with = "lenient::string")]
    pub dag_node_name: Option<String>,
    #[serde(rename = "SuccessCheckpointExitBySignal", deserialize_with = "lenient::boolean")]
    pub success_checkpoint_exit_by_signal: Option<bool>,
    #[serde(rename = "SuccessCheckpointExitCode", deserialize_with = "lenient::number")]
    pub success_checkpoint_exit_code: Option<f64>,
    #[serde(rename = "WhenToTransferOutput", deserialize_with = "lenient::string")]
    pub when_to_transfer_output: Option<String>,
    #[serde(rename = "Is_resumable", deserialize_with = "lenient::boolean")]
    pub is_resumable: Option<bool>,
    #[serde(rename = "LastRemotePool", deserialize_with = "lenient::string")]
    pub last_remote_pool: Option<String>,
    #[serde(rename = "MachineAttrGLIDEIN_ResourceName0", deserialize_with = "lenient::string")]
    pub machine_attr_glidein_resource_name0: Option<String>,
    #[serde(rename = "MATCH_EXP_JOBGLIDEIN_ResourceName", deserialize_with = "lenient::string")]
    pub match_exp_job_glidein_resource_name: Option<String>,
    #[serde(rename = "LastRemoteHost", deserialize_with = "lenient::string")]
    pub last_remote_host: Option<String>,
    #[serde(rename = "MachineAttrMips0", deserialize_with = "lenient::number")]
    pub machine_attr_mips0: Option<f64>,
    #[serde(rename = "CPUsUsage", deserialize_with = "lenient::number")]
    pub cpus_usage: Option<f64>,
}

impl JobAd {
    /// Deserialize one `_source` object.
    pub fn from_value(v: &Value) -> Result<Self, serde_json::Error> {
        JobAd::deserialize(v)
    }

    pub fn universe(&self) -> i64 {
        self.job_universe.unwrap_or(UNIVERSE_VANILLA)
    }

    /// Scheduler and local universe jobs never start a shadow.
    pub fn has_no_shadow(&self) -> bool {
        matches!(self.universe(), UNIVERSE_SCHEDULER | UNIVERSE_LOCAL)
    }

    pub fn is_removed(&self) -> bool {
        self.job_status == Some(STATUS_REMOVED)
    }

    pub fn is_dag_node(&self) -> bool {
        self.dag_node_name.is_some() && self.job_universe != Some(UNIVERSE_LOCAL)
    }

    pub fn is_checkpointable(&self, include_resumable: bool) -> bool {
        if self.universe() != UNIVERSE_VANILLA {
            return false;
        }
        if self.success_checkpoint_exit_by_signal.unwrap_or(false)
            || self.success_checkpoint_exit_code.is_some()
        {
            return true;
        }
        include_resumable
            && self
                .when_to_transfer_output
                .as_deref()
                .is_some_and(|w| w.eq_ignore_ascii_case("ON_EXIT_OR_EVICT"))
            && self.is_resumable.unwrap_or(false)
    }

    /// Wall time and execution attempts lost to restarts: `(bad_secs, bad_starts)`.
    pub fn badput(&self) -> Option<(f64, f64)> {
        let starts = self.num_job_starts.unwrap_or(0.0);
        let rwct = self.remote_wall_clock_time?;
        if self.has_no_shadow() || starts <= 1.0 || rwct <= 0.0 {
            return None;
        }
        if Some(rwct) == self.committed_time {
            return None;
        }
        Some((rwct - self.committed_time.unwrap_or(0.0), starts - 1.0))
    }

    /// Jobs that ran for less than a minute. `None` when undecidable.
    pub fn is_short(&self) -> Option<bool> {
        match self.committed_time {
            Some(t) if t > 0.0 => Some(t < 60.0),
            _ => match (self.record_time, self.job_current_start_date) {
                (Some(rec), Some(start)) => Some(rec - start < 60.0),
                _ => None,
            },
        }
    }

    /// Requested CPUs, at least one, when present.
    pub fn cpus(&self) -> Option<f64> {
        self.request_cpus.map(|c| c.max(1.0))
    }

    pub fn group_key(&self, field: GroupField) -> String {
        let raw = match field {
            GroupField::User => self.user.as_deref(),
            GroupField::Project => self.project_name.as_deref(),
            GroupField::Schedd => self.schedd_name.as_deref(),
        };
        label_or_unknown(raw)
    }

    /// Glidein resource name of the last execution slot.
    pub fn resource_name(&self) -> Option<&str> {
        self.machine_attr_glidein_resource_name0
            .as_deref()
            .or(self.match_exp_job_glidein_resource_name.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Access point name: the `GlobalJobId` prefix before the first `#`.
    pub fn submit_host(&self) -> &str {
        let id = self.global_job_id.as_deref().unwrap_or(UNKNOWN);
        id.split('#').next().unwrap_or(id)
    }

    /// Cluster.proc part of `GlobalJobId`.
    pub fn job_id(&self) -> Option<&str> {
        self.global_job_id.as_deref().and_then(|id| id.split('#').nth(1))
    }

    /// Execute host from `LastRemoteHost` (`slot@host` → `host`).
    pub fn execute_host(&self) -> Option<&str> {
        self.last_remote_host
            .as_deref()
            .and_then(|h| h.rsplit('@').next())
            .filter(|h| !h.is_empty())
    }

    /// `(major, minor, patch)` parsed from `$CondorVersion: 10.2.0 ... $`.
    pub fn condor_version(&self) -> Option<(u32, u32, u32)> {
        parse_condor_version(self.condor_version.as_deref()?)
    }
}

/// Missing or blank labels group under `UNKNOWN`.
pub fn label_or_unknown(raw: Option<&str>) -> String {
    match raw {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

pub fn parse_condor_version(raw: &str) -> Option<(u32, u32, u32)> {
    let token = raw.split_whitespace().nth(1)?;
    let mut parts = token.split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/* ---------------- lenient field decoders ---------------- */

mod lenient {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_f64(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(v.as_ref().and_then(as_f64))
    }

    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(number(d)?.map(|f| f as i64))
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn number_map<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<BTreeMap<String, f64>>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::Object(obj)) => Some(
                obj.iter()
                    .filter_map(|(k, v)| as_f64(v).map(|f| (k.clone(), f)))
                    .collect(),
            ),
            _ => None,
        })
    }
}
