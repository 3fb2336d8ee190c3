//! Session lifecycle: exclusive control of one target from `start` to `finish`.
//!
//! A session acquires the engine's control lock, launches the program, owns
//! the interception registry and the marshaller's allocations, and runs every
//! call into the target with its interceptor as the stop handler.

use crate::config::types::{ProbeError, Result, SessionConfig};
use crate::config::validator::validate_session_config;
use crate::intercept::failure::FailureSpec;
use crate::intercept::protocol::Interceptor;
use crate::intercept::registry::{EntryState, InterceptScope};
use crate::intercept::stats::StatsMap;
use crate::observability::audit::{self, CorrelationIds};
use crate::safety::cleanup::ReleaseReport;
use crate::safety::ownership::{OwnershipToken, SessionId};
use crate::session::crash::CrashReport;
use crate::target::control::{
    CallOutcome, LaunchRequest, ProcessControl, RemoteHeap, TargetMemory, TypeResolver,
};
use crate::target::process::{wait_for_exit, ExitObservation};
use crate::target::types::{ByteOrder, TargetType};
use crate::values::encoded::EncodedValue;
use crate::values::marshaller::ValueMarshaller;
use crate::values::template::ValueTemplate;
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::time::Duration;

/// Argument of a call into the target
#[derive(Clone, Debug, PartialEq)]
pub enum CallArg {
    /// Already encoded, passed as is
    Value(EncodedValue),
    /// Encoded against the parameter's declared type at call time
    Template(ValueTemplate),
}

impl From<EncodedValue> for CallArg {
    fn from(value: EncodedValue) -> Self {
        CallArg::Value(value)
    }
}

impl From<&EncodedValue> for CallArg {
    fn from(value: &EncodedValue) -> Self {
        CallArg::Value(value.clone())
    }
}

impl From<ValueTemplate> for CallArg {
    fn from(template: ValueTemplate) -> Self {
        CallArg::Template(template)
    }
}

/// Exclusive controller of one target program
pub struct Session<E: ProcessControl> {
    engine: E,
    config: SessionConfig,
    id: SessionId,
    token: Option<OwnershipToken>,
    interceptor: Interceptor,
    marshaller: ValueMarshaller,
    correlation: CorrelationIds,
    pid: Option<u32>,
    last_crash: Option<CrashReport>,
}

impl<E: ProcessControl> Session<E> {
    pub fn new(engine: E, config: SessionConfig) -> Self {
        let id = SessionId::new();
        let correlation = CorrelationIds::new().with_session(id);
        let interceptor = Interceptor::new(config.dealloc_function.clone(), &config.alloc_functions)
            .with_correlation(correlation.clone());
        Self {
            engine,
            config,
            id,
            token: None,
            interceptor,
            marshaller: ValueMarshaller::new(),
            correlation,
            pid: None,
            last_crash: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    /// Take control of the engine and launch the program, stopped at entry
    pub fn start(&mut self) -> Result<u32> {
        if self.token.is_some() {
            return Err(ProbeError::usage("session is already started"));
        }

        let validation = validate_session_config(&self.config)?;
        for warning in &validation.warnings {
            warn!("{}", warning);
        }
        if let Some(path) = &self.config.audit_log {
            audit::init_audit_logger(path)?;
        }

        let token = self
            .engine
            .control_lock()
            .try_acquire(self.id)
            .map_err(|e| {
                audit::ownership_rejected(&e.to_string());
                e
            })?;

        let request = LaunchRequest {
            program: self.config.program.clone(),
            args: self.config.args.clone(),
            environment: self.config.launch_environment(),
            stdout: self
                .config
                .save_output
                .then(|| self.config.stdout_path.clone()),
            stderr: self
                .config
                .save_output
                .then(|| self.config.stderr_path.clone()),
        };
        let pid = self.engine.launch(&request)?;

        if let Err(e) = self.prepare_target() {
            if let Err(unload) = self.engine.unload() {
                warn!("Failed to unload after a failed start: {}", unload);
            }
            return Err(e);
        }

        self.correlation = CorrelationIds::new()
            .with_session(self.id)
            .with_target_pid(pid);
        self.interceptor.set_correlation(self.correlation.clone());
        self.interceptor.clear_stats();
        self.token = Some(token);
        self.pid = Some(pid);
        self.last_crash = None;

        info!(
            "Session {} started {} as pid {}",
            self.id,
            self.config.program.display(),
            pid
        );
        audit::session_start(&self.correlation, &self.config.program);
        Ok(pid)
    }

    fn prepare_target(&mut self) -> Result<()> {
        let hook = self.config.dealloc_function.clone();
        if self.engine.function_signature(&hook).is_ok() {
            self.interceptor
                .registry_mut()
                .hook_always(&mut self.engine, &hook)?;
        } else {
            warn!("Target has no `{}`, heap bookkeeping through it is off", hook);
        }

        if let Some(timeout) = self.config.timeout() {
            debug!("Requesting an alarm after {:?}", timeout);
            self.engine.request_alarm(self.config.timeout_secs)?;
        }
        Ok(())
    }

    /// Release what the session allocated, remove every hook and let the
    /// program run on its own. Valid after a signal stopped the target.
    pub fn finish(&mut self) -> Result<ReleaseReport> {
        self.verify()?;

        let report = if self.config.free_on_finish {
            self.free_all()?
        } else {
            ReleaseReport::default()
        };

        self.interceptor.discard_pending();
        if let Err(e) = self.interceptor.registry_mut().clear(&mut self.engine) {
            warn!("Failed to remove breakpoints: {}", e);
        }

        match self.engine.detach() {
            Ok(Some(pid)) => match wait_for_exit(pid, self.config.detach_wait()) {
                Ok(ExitObservation::StillRunning) => {
                    warn!("Detached target {} is still running", pid)
                }
                Ok(observation) => debug!("Detached target {}: {:?}", pid, observation),
                Err(e) => warn!("Failed to wait for detached target {}: {}", pid, e),
            },
            Ok(None) => debug!("Target already gone after detach"),
            Err(e) => warn!("Failed to detach from the target: {}", e),
        }
        if let Err(e) = self.engine.unload() {
            warn!("Failed to unload the program: {}", e);
        }

        if let Some(token) = self.token.take() {
            token.release();
        }
        self.pid = None;

        info!(
            "Session {} finished ({} released, {} failed)",
            self.id,
            report.released.len(),
            report.failed.len()
        );
        audit::session_finish(&self.correlation, report.released.len(), report.failed.len());
        Ok(report)
    }

    fn verify(&self) -> Result<()> {
        match &self.token {
            Some(token) => token.verify(&self.engine.control_lock()),
            None => Err(ProbeError::usage("session is not started")),
        }
    }

    fn split(&mut self) -> (SessionHeap<'_, E>, &mut ValueMarshaller) {
        let allocator = self
            .config
            .alloc_functions
            .first()
            .map(String::as_str)
            .unwrap_or("malloc");
        (
            SessionHeap {
                engine: &mut self.engine,
                interceptor: &mut self.interceptor,
                allocator,
                deallocator: &self.config.dealloc_function,
            },
            &mut self.marshaller,
        )
    }

    /// Forget marshalled blocks the target freed on its own
    fn sync_released(&mut self) {
        for address in self.interceptor.take_released() {
            if self.marshaller.forget(address) {
                debug!("Target released marshalled block {:#x}", address);
            }
        }
    }

    // ---- interception ----

    /// Count calls and capture arguments at `locations` until the scope closes
    pub fn watch<I, S>(&mut self, locations: I) -> Result<InterceptScope>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.verify()?;
        let locations: Vec<String> = locations
            .into_iter()
            .map(|location| location.as_ref().to_string())
            .collect();
        for location in &locations {
            self.engine.function_signature(location)?;
        }

        let scope = self
            .interceptor
            .registry_mut()
            .watch(&mut self.engine, &locations)?;
        audit::scope_opened(&self.correlation, scope.kind().as_str(), scope.locations());
        Ok(scope)
    }

    /// Replace the outcome of calls to `location` until the scope closes
    pub fn fail(&mut self, location: &str, spec: FailureSpec) -> Result<InterceptScope> {
        self.verify()?;
        let signature = self.engine.function_signature(location)?;
        let armed = {
            let (mut heap, marshaller) = self.split();
            spec.arm(&signature, &mut heap, marshaller)?
        };
        let scope = self
            .interceptor
            .registry_mut()
            .fail(&mut self.engine, armed)?;
        audit::scope_opened(&self.correlation, scope.kind().as_str(), scope.locations());
        Ok(scope)
    }

    pub fn close(&mut self, scope: InterceptScope) -> Result<()> {
        self.verify()?;
        let kind = scope.kind();
        let locations = scope.locations().to_vec();
        self.interceptor
            .registry_mut()
            .close(&mut self.engine, scope)?;
        audit::scope_closed(&self.correlation, kind.as_str(), &locations);
        Ok(())
    }

    /// Run `body` with `locations` watched. The scope closes on every exit path.
    pub fn with_watch<I, S, T, F>(&mut self, locations: I, body: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let scope = self.watch(locations)?;
        let result = body(self);
        let closed = self.close(scope);
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Run `body` with `location` failing per `spec`. The scope closes on every exit path.
    pub fn with_fail<T, F>(&mut self, location: &str, spec: FailureSpec, body: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let scope = self.fail(location, spec)?;
        let result = body(self);
        let closed = self.close(scope);
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn entry_state(&self, location: &str) -> EntryState {
        self.interceptor.registry().state(location)
    }

    pub fn stats(&self) -> &StatsMap {
        self.interceptor.stats()
    }

    pub fn clear_stats(&mut self) {
        self.interceptor.clear_stats();
    }

    // ---- values ----

    pub fn resolve_type(&self, type_name: &str) -> Result<TargetType> {
        self.verify()?;
        self.engine.resolve_type(type_name)
    }

    /// Encode `template` as a value of `type_name`
    pub fn value<T: Into<ValueTemplate>>(&mut self, type_name: &str, template: T) -> Result<EncodedValue> {
        let ty = self.resolve_type(type_name)?;
        let template = template.into();
        let (mut heap, marshaller) = self.split();
        marshaller.encode(&mut heap, &ty, &template)
    }

    /// Encode `template` into fresh target memory and return a pointer to it
    pub fn allocate<T: Into<ValueTemplate>>(
        &mut self,
        type_name: &str,
        template: T,
    ) -> Result<EncodedValue> {
        let ty = self.resolve_type(type_name)?;
        let template = template.into();
        let (mut heap, marshaller) = self.split();
        marshaller.allocate(&mut heap, &ty, &template)
    }

    /// Copy `value` into fresh target memory and return a pointer to it
    pub fn pointer_to(&mut self, value: &EncodedValue) -> Result<EncodedValue> {
        self.verify()?;
        let (mut heap, marshaller) = self.split();
        marshaller.pointer_to(&mut heap, value)
    }

    /// Null pointer to `type_name`
    pub fn null_pointer(&self, type_name: &str) -> Result<EncodedValue> {
        self.raw_pointer(type_name, 0)
    }

    /// Pointer to `type_name` holding `address` verbatim
    pub fn raw_pointer(&self, type_name: &str, address: u64) -> Result<EncodedValue> {
        let pointee = self.resolve_type(type_name)?;
        Ok(EncodedValue::from_int(
            pointee.pointer_to(self.engine.pointer_size()),
            i128::from(address),
            self.engine.byte_order(),
        ))
    }

    /// NUL-terminated `char` array holding `text`
    pub fn string(&mut self, text: &str) -> Result<EncodedValue> {
        self.verify()?;
        let (mut heap, marshaller) = self.split();
        marshaller.string(&mut heap, text)
    }

    /// `char *` to a fresh copy of `text` in target memory
    pub fn string_allocated(&mut self, text: &str) -> Result<EncodedValue> {
        self.verify()?;
        let (mut heap, marshaller) = self.split();
        marshaller.string_allocated(&mut heap, text)
    }

    // ---- calls ----

    /// Call `function` in the target. Templates are encoded against the
    /// declared parameter types first.
    pub fn call(&mut self, function: &str, args: &[CallArg]) -> Result<Option<EncodedValue>> {
        self.verify()?;
        let signature = self.engine.function_signature(function)?;
        let arity_ok = if signature.variadic {
            args.len() >= signature.params.len()
        } else {
            args.len() == signature.params.len()
        };
        if !arity_ok {
            return Err(ProbeError::usage(format!(
                "{} takes {} arguments, {} given",
                function,
                signature.params.len(),
                args.len()
            )));
        }

        let mut encoded = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let value = match arg {
                CallArg::Value(value) => value.clone(),
                CallArg::Template(template) => {
                    let param = signature.param(index).ok_or_else(|| {
                        ProbeError::usage(format!(
                            "variadic argument {} of {} must be an encoded value",
                            index, function
                        ))
                    })?;
                    let ty = param.ty.clone();
                    let (mut heap, marshaller) = self.split();
                    marshaller.encode(&mut heap, &ty, template)?
                }
            };
            encoded.push(value);
        }

        debug!("Calling {} with {} arguments", function, encoded.len());
        let outcome = self
            .engine
            .call_function(function, &encoded, &mut self.interceptor);
        self.sync_released();
        match outcome? {
            CallOutcome::Returned(value) => Ok(value),
            CallOutcome::Signaled(signal) => Err(self.on_signal(signal)),
        }
    }

    fn on_signal(&mut self, signal: Signal) -> ProbeError {
        self.interceptor.discard_pending();

        if signal == Signal::SIGALRM {
            warn!("Target timed out after {} seconds", self.config.timeout_secs);
            audit::timeout_expired(&self.correlation, self.config.timeout_secs);
            return ProbeError::Timeout(Duration::from_secs(u64::from(self.config.timeout_secs)));
        }

        let report = match self.engine.inspect_stopped() {
            Ok(inspection) => CrashReport::new(signal, inspection),
            Err(e) => {
                warn!("Failed to inspect the stopped target: {}", e);
                CrashReport::signal_only(signal)
            }
        };
        match &self.config.crash_log_path {
            Some(path) => match report.write_to(path) {
                Ok(()) => warn!(
                    "Target received {} (check '{}' for details)",
                    report.signal,
                    path.display()
                ),
                Err(e) => warn!("Target received {}; {}", report.signal, e),
            },
            None => warn!("Target received {}", report.signal),
        }
        audit::signal_captured(&self.correlation, &report.signal, report.faulting_function());

        self.last_crash = Some(report.clone());
        ProbeError::TargetSignal {
            signal,
            report: Box::new(report),
        }
    }

    pub fn last_crash(&self) -> Option<&CrashReport> {
        self.last_crash.as_ref()
    }

    // ---- memory ----

    /// Read the value `pointer` points to
    pub fn dereference(&mut self, pointer: &EncodedValue) -> Result<EncodedValue> {
        self.verify()?;
        let pointee = pointer.ty().pointee().ok_or_else(|| {
            ProbeError::usage(format!("cannot dereference a {}", pointer.ty().name))
        })?;
        let ty = self.engine.resolve_type(pointee)?;
        if ty.is_void() {
            return Err(ProbeError::usage("cannot dereference a void pointer"));
        }
        let address = pointer.address()?;
        if address == 0 {
            return Err(ProbeError::usage("cannot dereference a null pointer"));
        }
        self.read_typed(ty, address)
    }

    pub fn read_value(&mut self, type_name: &str, address: u64) -> Result<EncodedValue> {
        let ty = self.resolve_type(type_name)?;
        self.read_typed(ty, address)
    }

    fn read_typed(&mut self, ty: TargetType, address: u64) -> Result<EncodedValue> {
        let bytes = self.engine.read_memory(address, ty.size)?;
        Ok(EncodedValue::new(ty, bytes, self.engine.byte_order()))
    }

    pub fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        self.verify()?;
        self.engine.write_memory(address, bytes)
    }

    pub fn write_value(&mut self, address: u64, value: &EncodedValue) -> Result<()> {
        self.write_memory(address, value.bytes())
    }

    /// Whether `address` lies inside a block the target holds from its
    /// allocation primitives
    pub fn malloced(&self, address: u64) -> bool {
        self.interceptor.heap().contains(address)
    }

    /// Bytes held by live tracked blocks
    pub fn allocated_size(&self) -> usize {
        self.interceptor.heap().total_size()
    }

    /// Allocations made by the marshaller and not yet released
    pub fn marshalled_allocations(&self) -> usize {
        self.marshaller.allocation_count()
    }

    pub fn thread_count(&self) -> Result<usize> {
        self.verify()?;
        self.engine.thread_count()
    }

    /// Release every marshalled allocation, newest first
    pub fn free_all(&mut self) -> Result<ReleaseReport> {
        self.verify()?;
        let report = {
            let (mut heap, marshaller) = self.split();
            marshaller.free_all(&mut heap)
        };
        self.sync_released();

        for (address, error) in &report.failed {
            warn!("Failed to release {:#x}: {}", address, error);
            audit::release_failed(&self.correlation, *address, error);
        }
        audit::allocations_released(
            &self.correlation,
            report.released.len(),
            report.skipped.len(),
        );
        Ok(report)
    }
}

/// Target heap reached through the program's own allocation primitives.
/// Calls run with the interceptor attached, so hooks observe them.
struct SessionHeap<'a, E: ProcessControl> {
    engine: &'a mut E,
    interceptor: &'a mut Interceptor,
    allocator: &'a str,
    deallocator: &'a str,
}

impl<E: ProcessControl> TypeResolver for SessionHeap<'_, E> {
    fn resolve_type(&self, name: &str) -> Result<TargetType> {
        self.engine.resolve_type(name)
    }

    fn byte_order(&self) -> ByteOrder {
        self.engine.byte_order()
    }

    fn pointer_size(&self) -> usize {
        self.engine.pointer_size()
    }
}

impl<E: ProcessControl> TargetMemory for SessionHeap<'_, E> {
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.engine.read_memory(address, len)
    }

    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        self.engine.write_memory(address, bytes)
    }
}

impl<E: ProcessControl> RemoteHeap for SessionHeap<'_, E> {
    fn allocate(&mut self, size: usize) -> Result<u64> {
        let signature = self.engine.function_signature(self.allocator)?;
        let order = self.engine.byte_order();
        let size = size as i128;
        let args = match signature.params.as_slice() {
            [bytes] => vec![EncodedValue::from_int(bytes.ty.clone(), size, order)],
            [count, bytes] => vec![
                EncodedValue::from_int(count.ty.clone(), 1, order),
                EncodedValue::from_int(bytes.ty.clone(), size, order),
            ],
            _ => {
                return Err(ProbeError::Config(format!(
                    "allocator {} must take a byte count",
                    self.allocator
                )))
            }
        };

        match self
            .engine
            .call_function(self.allocator, &args, &mut *self.interceptor)?
        {
            CallOutcome::Returned(Some(pointer)) => {
                pointer.as_u64()
            }
            CallOutcome::Returned(None) => Err(ProbeError::Config(format!(
                "allocator {} returns nothing",
                self.allocator
            ))),
            CallOutcome::Signaled(signal) => Err(ProbeError::target_access(format!(
                "{} interrupted by {}",
                self.allocator, signal
            ))),
        }
    }

    fn release(&mut self, address: u64) -> Result<()> {
        let signature = self.engine.function_signature(self.deallocator)?;
        let param = signature.param(0).ok_or_else(|| {
            ProbeError::Config(format!("{} must take an address", self.deallocator))
        })?;
        let pointer = EncodedValue::from_int(
            param.ty.clone(),
            i128::from(address),
            self.engine.byte_order(),
        );
        match self
            .engine
            .call_function(self.deallocator, &[pointer], &mut *self.interceptor)?
        {
            CallOutcome::Returned(_) => Ok(()),
            CallOutcome::Signaled(signal) => Err(ProbeError::target_access(format!(
                "{}({:#x}) interrupted by {}",
                self.deallocator, address, signal
            ))),
        }
    }
}
