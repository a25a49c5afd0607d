//! Shared sandbox data model.
//!
//! Defines the status enums, the sandbox request and the two documents that
//! cross the container boundary: the runner-parameters document written
//! into the scratch directory before the container starts, and the
//! runner-result document the in-container supervisor writes back before it
//! exits. Durations cross the boundary as integer nanoseconds and statuses
//! as stable integers, so both sides can evolve independently of each
//! other's serialization defaults.

pub mod container;
pub mod manager;
pub mod path;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::languages::Language;
use crate::mem::MemSize;
use crate::profile::Profile;

/// Lifecycle and terminal state of one sandbox execution.
///
/// The lifecycle states (`Created` through `Killed`) are driven by the
/// daemon event stream; the terminal outcomes are adopted from the
/// runner-result document on `destroy`. Wire values are stable integers in
/// declaration order, starting at zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(into = "u8", from = "u8")]
#[repr(u8)]
pub enum ContainerStatus {
    NotRan = 0,
    Created = 1,
    Running = 2,
    Killing = 3,
    Killed = 4,
    Finished = 5,
    MemoryConstraintExceeded = 6,
    TimeLimitExceeded = 7,
    /// Reserved wire slot. Test outcomes are reported through
    /// [`ContainerTestStatus`]; this value is never emitted.
    ProvidedTestFailed = 8,
    CompilationFailed = 9,
    RunTimeError = 10,
    NonDeterministicError = 11,
}

impl From<ContainerStatus> for u8 {
    fn from(status: ContainerStatus) -> u8 {
        status as u8
    }
}

impl From<u8> for ContainerStatus {
    fn from(value: u8) -> ContainerStatus {
        match value {
            0 => ContainerStatus::NotRan,
            1 => ContainerStatus::Created,
            2 => ContainerStatus::Running,
            3 => ContainerStatus::Killing,
            4 => ContainerStatus::Killed,
            5 => ContainerStatus::Finished,
            6 => ContainerStatus::MemoryConstraintExceeded,
            7 => ContainerStatus::TimeLimitExceeded,
            8 => ContainerStatus::ProvidedTestFailed,
            9 => ContainerStatus::CompilationFailed,
            10 => ContainerStatus::RunTimeError,
            _ => ContainerStatus::NonDeterministicError,
        }
    }
}

/// Outcome of comparing captured stdout against the expected stdout,
/// independent of the execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ContainerTestStatus {
    NoTest,
    TestNotRan,
    TestFailed,
    TestPassed,
}

/// Optional per-request test: stdin lines fed to the program and the
/// stdout lines it is expected to produce.
#[derive(Debug, Clone)]
pub struct Test {
    pub id: String,
    pub stdin_data: Vec<String>,
    pub expected_stdout_data: Vec<String>,
}

/// One sandbox execution request, bound to a language and a profile.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Externally assigned id, stable across the whole pipeline.
    pub id: String,
    pub profile: Profile,
    /// Host directory materialized for this execution and bind-mounted
    /// into the container; owned by exactly one container and deleted on
    /// its termination.
    pub scratch_path: PathBuf,
    pub source_code: String,
    pub language: &'static Language,
    pub test: Option<Test>,
}

/// Runner-parameters document, written to `runner.json` in the scratch
/// directory and consumed by the in-container supervisor. The `runSteps`
/// and `*Sec` field names are legacy wire names kept for compatibility
/// with existing sandbox images; both timeouts carry nanoseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionParameters {
    pub id: String,
    pub language: String,
    /// Filename (relative to the mount) the program's stdin is read from.
    pub standard_input: String,
    pub compile_steps: Vec<String>,
    #[serde(rename = "runSteps")]
    pub run_command: String,
    #[serde(rename = "runTimeoutSec", alias = "runTimeout", with = "duration_nanos")]
    pub run_timeout: Duration,
    #[serde(rename = "compileTimeoutSec", alias = "compileTimeout", with = "duration_nanos")]
    pub compile_timeout: Duration,
    /// Cap enforced against the supervised process's sampled RSS.
    pub execution_memory: MemSize,
}

/// Runner-result document, written to `runner-out.json` by the supervisor
/// exactly once before the container exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub status: ContainerStatus,
    #[serde(rename = "runTime", with = "duration_nanos")]
    pub runtime: Duration,
    #[serde(with = "duration_nanos")]
    pub compile_time: Duration,
    pub output: Vec<String>,
    pub output_err: Vec<String>,
    pub compiler_output: Vec<String>,
    /// Peak resident memory observed for the supervised process.
    pub runtime_memory_bytes: MemSize,
}

impl ExecutionResponse {
    /// Result adopted when the container terminated without a readable
    /// result document.
    pub fn non_deterministic() -> Self {
        ExecutionResponse {
            status: ContainerStatus::NonDeterministicError,
            runtime: Duration::ZERO,
            compile_time: Duration::ZERO,
            output: Vec::new(),
            output_err: Vec::new(),
            compiler_output: Vec::new(),
            runtime_memory_bytes: MemSize::from_bytes(0),
        }
    }
}

/// Final response for one execution, assembled once the container has been
/// destroyed and the result document ingested.
#[derive(Debug, Clone)]
pub struct Response {
    pub compiler_output: Vec<String>,
    pub output: Vec<String>,
    pub output_err: Vec<String>,
    pub status: ContainerStatus,
    pub test_status: ContainerTestStatus,
    pub runtime: Duration,
    pub compile_time: Duration,
    pub memory: MemSize,
}

/// Durations serialized as integer nanoseconds.
pub(crate) mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
