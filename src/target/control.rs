//! Interfaces consumed from the underlying process-control engine.
//!
//! The engine owns breakpoints, frames and raw memory access. cprobe never
//! drives the target directly: it hands the engine a [`StopHandler`] and the
//! engine invokes it synchronously each time the stopped target reaches an
//! intercepted location or an armed return trap.

use crate::config::types::Result;
use crate::intercept::stats::ArgSnapshot;
use crate::safety::ownership::ControlLock;
use crate::target::types::{ByteOrder, FunctionSignature, TargetType};
use crate::values::encoded::EncodedValue;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Type name → structural description
pub trait TypeResolver {
    /// Resolve a type by name. Unknown names fail with `EncodingError::UnknownType`.
    fn resolve_type(&self, name: &str) -> Result<TargetType>;

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::native()
    }

    fn pointer_size(&self) -> usize {
        8
    }
}

/// Raw byte access to the target's address space
pub trait TargetMemory {
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>>;
    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<()>;
}

/// Allocation in the target's heap, as used by the value marshaller
pub trait RemoteHeap: TargetMemory + TypeResolver {
    fn allocate(&mut self, size: usize) -> Result<u64>;
    fn release(&mut self, address: u64) -> Result<()>;
}

/// Handle of a one-shot return trap armed for a single invocation
pub type ReturnTrapId = u64;

/// Reasons a return trap cannot be armed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrapUnavailable {
    /// The caller is a synthetic frame pushed by the controller
    SyntheticCaller,
    /// The engine cannot place a trap for this frame
    Unsupported(String),
}

/// View of the target while it is stopped at an intercepted location
pub trait StoppedTarget: TargetMemory + TypeResolver {
    /// Function whose breakpoint was hit
    fn function(&self) -> &str;

    /// Arguments of the current frame in declaration order, or None when the
    /// frame's scope cannot be resolved
    fn frame_arguments(&mut self) -> Option<Vec<ArgSnapshot>>;

    /// Arm a one-shot trap reporting this invocation's return value
    fn arm_return_trap(&mut self) -> std::result::Result<ReturnTrapId, TrapUnavailable>;

    /// Return from the current call immediately without running its body
    fn force_return(&mut self, value: Option<&EncodedValue>) -> Result<()>;

    /// Set the target's errno
    fn write_errno(&mut self, errno: i32) -> Result<()>;
}

/// Callbacks invoked synchronously by the engine while the target is stopped
pub trait StopHandler {
    fn on_breakpoint(&mut self, target: &mut dyn StoppedTarget) -> Result<()>;
    fn on_return(&mut self, trap: ReturnTrapId, value: Option<EncodedValue>);
}

/// How to start the target program
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// Result of running a function inside the target
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    /// The call completed; None for `void`
    Returned(Option<EncodedValue>),
    /// The target stopped on a signal before the call completed
    Signaled(Signal),
}

/// One frame of a stopped target's backtrace
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub function: String,
    pub location: Option<String>,
}

/// Rendered variable of the innermost frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableSummary {
    pub name: String,
    pub type_name: String,
    pub value: String,
}

/// State captured from a target stopped by a signal
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StopInspection {
    pub backtrace: Vec<FrameSummary>,
    pub locals: Vec<VariableSummary>,
}

/// The process-control engine: launch, breakpoints, calls and teardown
pub trait ProcessControl: TargetMemory + TypeResolver {
    /// Single-owner lock guarding this engine
    fn control_lock(&self) -> ControlLock {
        ControlLock::global()
    }

    /// Load and start the program, stopping at its entry point. Returns its pid.
    fn launch(&mut self, request: &LaunchRequest) -> Result<u32>;

    fn set_breakpoint(&mut self, function: &str) -> Result<()>;
    fn remove_breakpoint(&mut self, function: &str) -> Result<()>;

    fn function_signature(&self, function: &str) -> Result<FunctionSignature>;

    /// Call `function` in the target from a synthetic frame. Breakpoints hit
    /// during the call are reported to `handler`.
    fn call_function(
        &mut self,
        function: &str,
        args: &[EncodedValue],
        handler: &mut dyn StopHandler,
    ) -> Result<CallOutcome>;

    /// Ask the target to deliver SIGALRM to itself after `seconds`
    fn request_alarm(&mut self, seconds: u32) -> Result<()>;

    /// Capture backtrace and locals of a target stopped by a signal
    fn inspect_stopped(&mut self) -> Result<StopInspection>;

    fn thread_count(&self) -> Result<usize>;

    /// Let the process run on its own. Returns its pid when it is still alive.
    fn detach(&mut self) -> Result<Option<u32>>;

    /// Forget the loaded program and every breakpoint
    fn unload(&mut self) -> Result<()>;
}
