//! Scheduling data model.
//!
//! A [`Job`] is a persisted unit of work with a priority and a
//! [`ResourceProfile`]. A [`WorkerProcess`] is the cluster's view of a job
//! being executed. [`Capacity`] is the allocatable total for the whole
//! cluster at the start of a cycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::PayloadHash;
use crate::ModelError;

/// Stable job identifier, assigned by the job store on first persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| ModelError::InvalidJobId(s.to_string()))
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unit a job's memory figures are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryUnit {
    Bytes,
    KiB,
    MiB,
    GiB,
}

impl MemoryUnit {
    /// Number of bytes in one unit.
    pub const fn bytes_per_unit(self) -> u64 {
        match self {
            Self::Bytes => 1,
            Self::KiB => 1024,
            Self::MiB => 1024 * 1024,
            Self::GiB => 1024 * 1024 * 1024,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::KiB => "kib",
            Self::MiB => "mib",
            Self::GiB => "gib",
        }
    }
}

impl fmt::Display for MemoryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryUnit {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bytes" | "b" => Ok(Self::Bytes),
            "kib" => Ok(Self::KiB),
            "mib" => Ok(Self::MiB),
            "gib" => Ok(Self::GiB),
            _ => Err(ModelError::InvalidMemoryUnit(s.to_string())),
        }
    }
}

/// Requested and limit resources for a job.
///
/// Only the limits take part in admission; requests are forwarded to the
/// worker start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub request_cpu: Option<f64>,
    pub limit_cpu: f64,
    pub request_memory: Option<u64>,
    pub limit_memory: u64,
    pub memory_unit: MemoryUnit,
}

impl ResourceProfile {
    /// A profile with only limits set.
    pub fn limits(cpu: f64, memory: u64, memory_unit: MemoryUnit) -> Self {
        Self {
            request_cpu: None,
            limit_cpu: cpu,
            request_memory: None,
            limit_memory: memory,
            memory_unit,
        }
    }

    pub fn with_requests(mut self, cpu: f64, memory: u64) -> Self {
        self.request_cpu = Some(cpu);
        self.request_memory = Some(memory);
        self
    }

    pub fn limit_memory_bytes(&self) -> u64 {
        self.limit_memory
            .saturating_mul(self.memory_unit.bytes_per_unit())
    }

    pub fn request_memory_bytes(&self) -> Option<u64> {
        self.request_memory
            .map(|m| m.saturating_mul(self.memory_unit.bytes_per_unit()))
    }
}

/// Category of work a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    Cache,
    NetworkPoll,
    Patcherex,
    RopCache,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::NetworkPoll => "network_poll",
            Self::Patcherex => "patcherex",
            Self::RopCache => "rop_cache",
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobCategory {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Self::Cache),
            "network_poll" => Ok(Self::NetworkPoll),
            "patcherex" => Ok(Self::Patcherex),
            "rop_cache" => Ok(Self::RopCache),
            _ => Err(ModelError::InvalidCategory(s.to_string())),
        }
    }
}

/// Category-specific job payload. Opaque to scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum JobPayload {
    Cache { binary_id: i64 },
    NetworkPoll { traffic_id: i64 },
    Patcherex { binary_id: i64, patch_type: String },
    RopCache { challenge_set_id: i64 },
}

impl JobPayload {
    pub fn category(&self) -> JobCategory {
        match self {
            Self::Cache { .. } => JobCategory::Cache,
            Self::NetworkPoll { .. } => JobCategory::NetworkPoll,
            Self::Patcherex { .. } => JobCategory::Patcherex,
            Self::RopCache { .. } => JobCategory::RopCache,
        }
    }

    /// Key identifying the logical unit of work this payload describes.
    ///
    /// Two descriptors with the same category and dedup key are the same job.
    pub fn dedup_key(&self) -> PayloadHash {
        // Serializing a plain enum of integers and strings cannot fail.
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        PayloadHash::from_json(&value)
    }
}

/// A job descriptor that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub priority: i32,
    pub resources: ResourceProfile,
    pub payload: JobPayload,
}

impl NewJob {
    pub fn new(priority: i32, resources: ResourceProfile, payload: JobPayload) -> Self {
        Self {
            priority,
            resources,
            payload,
        }
    }

    pub fn category(&self) -> JobCategory {
        self.payload.category()
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub priority: i32,
    pub resources: ResourceProfile,
    pub payload: JobPayload,
    pub created_at: DateTime<Utc>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a persisted job from a descriptor and the id the store assigned.
    pub fn from_new(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            priority: new.priority,
            resources: new.resources,
            payload: new.payload,
            created_at: Utc::now(),
            admitted_at: None,
            completed_at: None,
        }
    }

    pub fn category(&self) -> JobCategory {
        self.payload.category()
    }

    /// Completed jobs are terminal: never admitted again, never killed.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn worker_name(&self) -> String {
        worker_name(self.id)
    }
}

/// Name of the worker process executing a job.
pub fn worker_name(job_id: JobId) -> String {
    format!("job-{job_id}")
}

/// Total allocatable resources for the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Capacity {
    /// CPU cores, fractional allowed.
    pub cpu: f64,
    pub memory_bytes: u64,
    /// Worker process slots.
    pub slots: u32,
}

impl Capacity {
    pub fn new(cpu: f64, memory_bytes: u64, slots: u32) -> Self {
        Self {
            cpu,
            memory_bytes,
            slots,
        }
    }

    /// Returns true if the job's limits fit in what is left.
    pub fn fits(&self, resources: &ResourceProfile) -> bool {
        self.cpu >= resources.limit_cpu
            && self.memory_bytes >= resources.limit_memory_bytes()
            && self.slots >= 1
    }

    /// Take a job's limits out of the remaining capacity.
    pub fn reserve(&mut self, resources: &ResourceProfile) {
        self.cpu -= resources.limit_cpu;
        self.memory_bytes = self
            .memory_bytes
            .saturating_sub(resources.limit_memory_bytes());
        self.slots = self.slots.saturating_sub(1);
    }

    /// Remove a reserved overhead, clamping every dimension at zero.
    pub fn saturating_sub(&self, other: &Capacity) -> Capacity {
        Capacity {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            slots: self.slots.saturating_sub(other.slots),
        }
    }
}

/// Lifecycle phase of a worker process, as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse a phase string. Anything unrecognised maps to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Succeeded or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Pending or Running.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker process as observed in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProcess {
    pub name: String,
    /// Job label; workers without one were not started by us.
    pub job_id: Option<JobId>,
    pub phase: WorkerPhase,
}

impl WorkerProcess {
    pub fn new(name: impl Into<String>, job_id: Option<JobId>, phase: WorkerPhase) -> Self {
        Self {
            name: name.into(),
            job_id,
            phase,
        }
    }

    /// A worker for `job_id` with the conventional name.
    pub fn for_job(job_id: JobId, phase: WorkerPhase) -> Self {
        Self::new(worker_name(job_id), Some(job_id), phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_memory_scaling() {
        let profile = ResourceProfile::limits(1.0, 8, MemoryUnit::GiB);
        assert_eq!(profile.limit_memory_bytes(), 8 * 1024 * 1024 * 1024);

        let profile = ResourceProfile::limits(1.0, 16384, MemoryUnit::MiB).with_requests(1.0, 3584);
        assert_eq!(profile.limit_memory_bytes(), 16 * 1024 * 1024 * 1024);
        assert_eq!(profile.request_memory_bytes(), Some(3584 * 1024 * 1024));
    }

    #[rstest]
    #[case("Pending", WorkerPhase::Pending)]
    #[case("Running", WorkerPhase::Running)]
    #[case("Succeeded", WorkerPhase::Succeeded)]
    #[case("Failed", WorkerPhase::Failed)]
    #[case("Unknown", WorkerPhase::Unknown)]
    #[case("Evicted", WorkerPhase::Unknown)]
    #[case("", WorkerPhase::Unknown)]
    fn test_phase_parse(#[case] input: &str, #[case] expected: WorkerPhase) {
        assert_eq!(WorkerPhase::parse(input), expected);
    }

    #[test]
    fn test_phase_classes() {
        assert!(WorkerPhase::Succeeded.is_terminal());
        assert!(WorkerPhase::Failed.is_terminal());
        assert!(WorkerPhase::Pending.is_live());
        assert!(WorkerPhase::Running.is_live());
        assert!(!WorkerPhase::Unknown.is_live());
        assert!(!WorkerPhase::Unknown.is_terminal());
    }

    #[test]
    fn test_capacity_fits_and_reserve() {
        let mut capacity = Capacity::new(2.0, 4096, 1);
        let job = ResourceProfile::limits(1.5, 4, MemoryUnit::KiB);

        assert!(capacity.fits(&job));
        capacity.reserve(&job);
        assert_eq!(capacity.slots, 0);
        assert_eq!(capacity.memory_bytes, 0);
        assert!((capacity.cpu - 0.5).abs() < f64::EPSILON);
        assert!(!capacity.fits(&ResourceProfile::limits(0.1, 0, MemoryUnit::Bytes)));
    }

    #[test]
    fn test_capacity_saturating_sub() {
        let total = Capacity::new(4.0, 100, 10);
        let left = total.saturating_sub(&Capacity::new(5.0, 40, 2));
        assert_eq!(left, Capacity::new(0.0, 60, 8));
    }

    #[test]
    fn test_category_roundtrip_names() {
        for category in [
            JobCategory::Cache,
            JobCategory::NetworkPoll,
            JobCategory::Patcherex,
            JobCategory::RopCache,
        ] {
            assert_eq!(category.as_str().parse::<JobCategory>().unwrap(), category);
        }
        assert!("bogus".parse::<JobCategory>().is_err());
    }

    #[test]
    fn test_payload_dedup_key() {
        let a = JobPayload::Cache { binary_id: 7 };
        let b = JobPayload::Cache { binary_id: 7 };
        let c = JobPayload::Cache { binary_id: 8 };
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());

        let p1 = JobPayload::Patcherex {
            binary_id: 7,
            patch_type: "detour".to_string(),
        };
        let p2 = JobPayload::Patcherex {
            binary_id: 7,
            patch_type: "reassembler".to_string(),
        };
        assert_ne!(p1.dedup_key(), p2.dedup_key());
        assert_eq!(p1.category(), JobCategory::Patcherex);
    }

    #[test]
    fn test_worker_name() {
        assert_eq!(worker_name(JobId::new(42)), "job-42");
        assert_eq!("42".parse::<JobId>().unwrap(), JobId::new(42));
        assert!("abc".parse::<JobId>().is_err());
    }
}
