//! In-memory process-control engine.
//!
//! `SimInferior` stands in for a debugger-driven target: functions are Rust
//! closures over a byte-addressed heap, breakpoints and return traps are
//! reported to the [`StopHandler`] exactly where a real engine would stop, and
//! faults surface as signals. The outermost call made through
//! [`ProcessControl::call_function`] runs from a synthetic frame, so its
//! return cannot be trapped.

use crate::config::types::{ProbeError, Result};
use crate::intercept::stats::ArgSnapshot;
use crate::safety::ownership::ControlLock;
use crate::target::catalog::TypeCatalog;
use crate::target::control::{
    CallOutcome, FrameSummary, LaunchRequest, ProcessControl, ReturnTrapId, StopHandler,
    StopInspection, StoppedTarget, TargetMemory, TrapUnavailable, TypeResolver, VariableSummary,
};
use crate::target::types::{ByteOrder, FunctionSignature, Param, TargetType, TypeKind};
use crate::values::encoded::EncodedValue;
use log::{debug, trace};
use nix::sys::signal::Signal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

const HEAP_START: u64 = 0x5555_0000_1000;
const BLOCK_ALIGN: u64 = 16;
const MAX_BLOCK: usize = 1 << 30;

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

/// How a simulated call stops early
#[derive(Debug)]
pub enum SimFault {
    /// The target received a signal
    Signal(Signal),
    /// The controller side failed
    Error(ProbeError),
}

impl From<ProbeError> for SimFault {
    fn from(e: ProbeError) -> Self {
        SimFault::Error(e)
    }
}

pub type SimResult<T> = std::result::Result<T, SimFault>;

/// Body of a simulated function
pub type NativeFn = Rc<dyn Fn(&mut SimContext<'_>, &[EncodedValue]) -> SimResult<Option<EncodedValue>>>;

#[derive(Clone)]
struct SimFunction {
    signature: FunctionSignature,
    body: NativeFn,
    debug_info: bool,
}

impl fmt::Debug for SimFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimFunction")
            .field("signature", &self.signature.name)
            .field("debug_info", &self.debug_info)
            .finish()
    }
}

#[derive(Debug)]
struct SimBlock {
    data: Vec<u8>,
    freed: bool,
}

/// Bump-allocated heap; freed blocks stay as tombstones
#[derive(Debug)]
struct SimHeap {
    blocks: BTreeMap<u64, SimBlock>,
    next: u64,
}

impl SimHeap {
    fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            next: HEAP_START,
        }
    }

    fn allocate(&mut self, size: usize) -> u64 {
        let address = self.next;
        let span = (size as u64).max(1).div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN;
        // one empty line between blocks so overruns never land in a neighbour
        self.next += span + BLOCK_ALIGN;
        self.blocks.insert(
            address,
            SimBlock {
                data: vec![0; size],
                freed: false,
            },
        );
        address
    }

    /// Live block containing `address..address + len`
    fn locate(&mut self, address: u64, len: usize) -> Option<(&mut SimBlock, usize)> {
        let (&start, block) = self.blocks.range_mut(..=address).next_back()?;
        let offset = usize::try_from(address - start).ok()?;
        if block.freed || offset + len > block.data.len() {
            return None;
        }
        Some((block, offset))
    }

    fn read(&mut self, address: u64, len: usize) -> Option<Vec<u8>> {
        let (block, offset) = self.locate(address, len)?;
        Some(block.data[offset..offset + len].to_vec())
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> bool {
        match self.locate(address, bytes.len()) {
            Some((block, offset)) => {
                block.data[offset..offset + bytes.len()].copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn size_of(&self, address: u64) -> Option<usize> {
        self.blocks
            .get(&address)
            .filter(|block| !block.freed)
            .map(|block| block.data.len())
    }

    fn free(&mut self, address: u64) -> bool {
        match self.blocks.get_mut(&address) {
            Some(block) if !block.freed => {
                block.freed = true;
                true
            }
            _ => false,
        }
    }

    fn live(&self) -> usize {
        self.blocks.values().filter(|b| !b.freed).count()
    }
}

#[derive(Debug)]
struct FrameRecord {
    function: String,
    locals: Vec<VariableSummary>,
}

/// Simulated target program plus the engine controlling it
#[derive(Debug)]
pub struct SimInferior {
    catalog: TypeCatalog,
    functions: BTreeMap<String, SimFunction>,
    heap: SimHeap,
    breakpoints: BTreeSet<String>,
    lock: ControlLock,
    pid: Option<u32>,
    launched: Option<LaunchRequest>,
    detached: bool,
    errno: i32,
    errno_available: bool,
    alarm: Option<u32>,
    next_trap: ReturnTrapId,
    stack: Vec<FrameRecord>,
    stopped: Option<(Signal, StopInspection)>,
    threads: usize,
    executed: BTreeMap<String, usize>,
}

impl SimInferior {
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            catalog,
            functions: BTreeMap::new(),
            heap: SimHeap::new(),
            breakpoints: BTreeSet::new(),
            lock: ControlLock::new(),
            pid: None,
            launched: None,
            detached: false,
            errno: 0,
            errno_available: true,
            alarm: None,
            next_trap: 1,
            stack: Vec::new(),
            stopped: None,
            threads: 1,
            executed: BTreeMap::new(),
        }
    }

    /// LP64 catalog with `malloc`, `calloc`, `free`, `strlen` and `abort`
    pub fn with_libc() -> Self {
        Self::new(TypeCatalog::lp64()).with_libc_functions()
    }

    /// Add the libc subset to an existing simulation
    pub fn with_libc_functions(mut self) -> Self {
        let size_t = TargetType::new("size_t", 8, 8, TypeKind::Int { signed: false });
        let void_ptr = TargetType::new(
            "void *",
            8,
            8,
            TypeKind::Pointer {
                pointee: "void".to_string(),
            },
        );
        let char_ptr = TargetType::new(
            "const char *",
            8,
            8,
            TypeKind::Pointer {
                pointee: "const char".to_string(),
            },
        );
        let param = |name: &str, ty: &TargetType| Param {
            name: name.to_string(),
            ty: ty.clone(),
        };

        self.install(
            signature("malloc", Some(&void_ptr), vec![param("size", &size_t)]),
            |ctx, args| {
                let size = usize::try_from(args[0].as_u64()?).unwrap_or(usize::MAX);
                let address = ctx.allocate(size);
                ctx.return_int(i128::from(address))
            },
        );
        self.install(
            signature(
                "calloc",
                Some(&void_ptr),
                vec![param("nmemb", &size_t), param("size", &size_t)],
            ),
            |ctx, args| {
                let total = args[0].as_u64()?.saturating_mul(args[1].as_u64()?);
                let address = ctx.allocate(usize::try_from(total).unwrap_or(usize::MAX));
                ctx.return_int(i128::from(address))
            },
        );
        self.install(
            signature("free", None, vec![param("ptr", &void_ptr)]),
            |ctx, args| {
                let address = args[0].address()?;
                if address != 0 {
                    ctx.release(address)?;
                }
                Ok(None)
            },
        );
        self.install(
            signature("strlen", Some(&size_t), vec![param("s", &char_ptr)]),
            |ctx, args| {
                let text = ctx.c_string(args[0].address()?)?;
                ctx.return_int(text.len() as i128)
            },
        );
        self.install(
            signature("abort", None, Vec::new()),
            |ctx, _| Err(ctx.raise(Signal::SIGABRT)),
        );
        self
    }

    /// Define a function whose types are resolved through the catalog
    pub fn define<F>(
        mut self,
        name: &str,
        returns: &str,
        params: &[(&str, &str)],
        body: F,
    ) -> Result<Self>
    where
        F: Fn(&mut SimContext<'_>, &[EncodedValue]) -> SimResult<Option<EncodedValue>> + 'static,
    {
        let return_type = self.catalog.lookup(returns)?;
        let params = params
            .iter()
            .map(|(pname, ptype)| {
                Ok(Param {
                    name: pname.to_string(),
                    ty: self.catalog.lookup(ptype)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let returns = (!return_type.is_void()).then_some(&return_type);
        self.install(signature(name, returns, params), body);
        Ok(self)
    }

    /// Frames of `function` no longer expose their arguments
    pub fn without_debug_info(mut self, function: &str) -> Self {
        if let Some(f) = self.functions.get_mut(function) {
            f.debug_info = false;
        }
        self
    }

    /// Writing errno fails, as for a program linked without it
    pub fn without_errno(mut self) -> Self {
        self.errno_available = false;
        self
    }

    pub fn catalog_mut(&mut self) -> &mut TypeCatalog {
        &mut self.catalog
    }

    fn install<F>(&mut self, signature: FunctionSignature, body: F)
    where
        F: Fn(&mut SimContext<'_>, &[EncodedValue]) -> SimResult<Option<EncodedValue>> + 'static,
    {
        let body: NativeFn = Rc::new(body);
        self.functions.insert(
            signature.name.clone(),
            SimFunction {
                signature,
                body,
                debug_info: true,
            },
        );
    }

    pub fn has_breakpoint(&self, function: &str) -> bool {
        self.breakpoints.contains(function)
    }

    pub fn errno(&self) -> i32 {
        self.errno
    }

    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    pub fn was_detached(&self) -> bool {
        self.detached
    }

    pub fn launch_request(&self) -> Option<&LaunchRequest> {
        self.launched.as_ref()
    }

    /// How many times the body of `function` actually ran
    pub fn executed(&self, function: &str) -> usize {
        self.executed.get(function).copied().unwrap_or(0)
    }

    /// Heap blocks not yet freed
    pub fn live_blocks(&self) -> usize {
        self.heap.live()
    }

    /// Size of the live block starting at `address`
    pub fn block_size(&self, address: u64) -> Option<usize> {
        self.heap.size_of(address)
    }

    pub fn pending_alarm(&self) -> Option<u32> {
        self.alarm
    }

    fn invoke(
        &mut self,
        name: &str,
        args: &[EncodedValue],
        handler: &mut dyn StopHandler,
        synthetic: bool,
    ) -> SimResult<Option<EncodedValue>> {
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| ProbeError::usage(format!("no function named `{}`", name)))?;
        let args = self.coerce_args(&function.signature, args)?;

        let mut trap = None;
        if self.breakpoints.contains(name) {
            let mut stop = SimStop {
                sim: self,
                function: &function,
                args: &args,
                synthetic,
                forced: None,
                trap: None,
            };
            handler.on_breakpoint(&mut stop)?;
            let (forced, armed) = (stop.forced, stop.trap);
            if let Some(value) = forced {
                trace!("{} returned early", name);
                return Ok(value);
            }
            trap = armed;
        }

        self.stack.push(FrameRecord {
            function: name.to_string(),
            locals: Vec::new(),
        });
        *self.executed.entry(name.to_string()).or_default() += 1;
        let result = {
            let mut ctx = SimContext {
                sim: self,
                handler: &mut *handler,
                signature: &function.signature,
            };
            (function.body)(&mut ctx, &args)
        };
        if let Err(SimFault::Signal(signal)) = &result {
            if self.stopped.is_none() {
                self.stopped = Some((*signal, self.capture()));
            }
        }
        self.stack.pop();

        let value = match (result?, &function.signature.return_type) {
            (Some(value), Some(ty)) => Some(coerce(value, ty)?),
            (_, None) => None,
            (None, Some(ty)) => Some(EncodedValue::new(
                ty.clone(),
                vec![0; ty.size],
                self.catalog_byte_order(),
            )),
        };
        if let Some(trap) = trap {
            handler.on_return(trap, value.clone());
        }
        Ok(value)
    }

    fn coerce_args(
        &self,
        signature: &FunctionSignature,
        args: &[EncodedValue],
    ) -> Result<Vec<EncodedValue>> {
        if args.len() < signature.params.len()
            || (!signature.variadic && args.len() > signature.params.len())
        {
            return Err(ProbeError::usage(format!(
                "`{}` takes {} arguments, {} given",
                signature.name,
                signature.params.len(),
                args.len()
            )));
        }
        args.iter()
            .enumerate()
            .map(|(i, arg)| match signature.param(i) {
                Some(param) => coerce(arg.clone(), &param.ty),
                None => Ok(arg.clone()),
            })
            .collect()
    }

    fn capture(&self) -> StopInspection {
        StopInspection {
            backtrace: self
                .stack
                .iter()
                .rev()
                .map(|frame| FrameSummary {
                    function: frame.function.clone(),
                    location: None,
                })
                .collect(),
            locals: self
                .stack
                .last()
                .map(|frame| frame.locals.clone())
                .unwrap_or_default(),
        }
    }

    fn catalog_byte_order(&self) -> ByteOrder {
        TypeResolver::byte_order(&self.catalog)
    }

    fn require_running(&self) -> Result<u32> {
        self.pid
            .ok_or_else(|| ProbeError::usage("no program is running"))
    }
}

fn signature(name: &str, returns: Option<&TargetType>, params: Vec<Param>) -> FunctionSignature {
    FunctionSignature {
        name: name.to_string(),
        return_type: returns.cloned(),
        params,
        variadic: false,
    }
}

/// Reinterpret `value` as `ty`, widening or narrowing integer-like values
fn coerce(value: EncodedValue, ty: &TargetType) -> Result<EncodedValue> {
    if value.ty() == ty {
        return Ok(value);
    }
    let integer_like = |t: &TargetType| {
        matches!(
            t.kind,
            TypeKind::Int { .. }
                | TypeKind::Char { .. }
                | TypeKind::Bool
                | TypeKind::Enum { .. }
                | TypeKind::Pointer { .. }
        )
    };
    if integer_like(ty) && integer_like(value.ty()) {
        let order = value.byte_order();
        return Ok(EncodedValue::from_int(ty.clone(), value.as_i128()?, order));
    }
    if value.len() == ty.size {
        let order = value.byte_order();
        return Ok(EncodedValue::new(ty.clone(), value.into_bytes(), order));
    }
    Err(ProbeError::usage(format!(
        "cannot pass {} ({} bytes) as {} ({} bytes)",
        value.ty().name,
        value.len(),
        ty.name,
        ty.size
    )))
}

/// Execution context handed to simulated function bodies
pub struct SimContext<'a> {
    sim: &'a mut SimInferior,
    handler: &'a mut dyn StopHandler,
    signature: &'a FunctionSignature,
}

impl SimContext<'_> {
    /// Call another simulated function; breakpoints on it are honoured
    pub fn call(&mut self, function: &str, args: &[EncodedValue]) -> SimResult<Option<EncodedValue>> {
        self.sim.invoke(function, args, &mut *self.handler, false)
    }

    /// Integer-like value of a catalog type
    pub fn value(&self, type_name: &str, value: i128) -> SimResult<EncodedValue> {
        let ty = self.sim.catalog.lookup(type_name)?;
        Ok(EncodedValue::from_int(ty, value, self.sim.catalog_byte_order()))
    }

    /// Return `value` as the current function's return type
    pub fn return_int(&self, value: i128) -> SimResult<Option<EncodedValue>> {
        let ty = self.signature.return_type.clone().ok_or_else(|| {
            ProbeError::usage(format!("`{}` returns void", self.signature.name))
        })?;
        Ok(Some(EncodedValue::from_int(
            ty,
            value,
            self.sim.catalog_byte_order(),
        )))
    }

    pub fn read(&mut self, address: u64, len: usize) -> SimResult<Vec<u8>> {
        self.sim
            .heap
            .read(address, len)
            .ok_or(SimFault::Signal(Signal::SIGSEGV))
    }

    pub fn write(&mut self, address: u64, bytes: &[u8]) -> SimResult<()> {
        if self.sim.heap.write(address, bytes) {
            Ok(())
        } else {
            Err(SimFault::Signal(Signal::SIGSEGV))
        }
    }

    pub fn read_value(&mut self, type_name: &str, address: u64) -> SimResult<EncodedValue> {
        let ty = self.sim.catalog.lookup(type_name)?;
        let bytes = self.read(address, ty.size)?;
        Ok(EncodedValue::new(ty, bytes, self.sim.catalog_byte_order()))
    }

    /// NUL-terminated string at `address`
    pub fn c_string(&mut self, address: u64) -> SimResult<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read(address + bytes.len() as u64, 1)?[0];
            if byte == 0 {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
        }
    }

    /// Fresh heap block, or 0 when `size` is unreasonably large
    pub fn allocate(&mut self, size: usize) -> u64 {
        if size > MAX_BLOCK {
            return 0;
        }
        self.sim.heap.allocate(size)
    }

    /// Free a heap block; invalid and double frees abort
    pub fn release(&mut self, address: u64) -> SimResult<()> {
        if self.sim.heap.free(address) {
            Ok(())
        } else {
            Err(self.raise(Signal::SIGABRT))
        }
    }

    pub fn errno(&self) -> i32 {
        self.sim.errno
    }

    pub fn set_errno(&mut self, errno: i32) {
        self.sim.errno = errno;
    }

    /// Record a local variable of the current frame for crash inspection
    pub fn local<V: fmt::Display>(&mut self, name: &str, type_name: &str, value: V) {
        if let Some(frame) = self.sim.stack.last_mut() {
            frame.locals.push(VariableSummary {
                name: name.to_string(),
                type_name: type_name.to_string(),
                value: value.to_string(),
            });
        }
    }

    pub fn spawn_thread(&mut self) {
        self.sim.threads += 1;
    }

    /// Loop forever: only an armed alarm interrupts it
    pub fn spin(&mut self) -> SimFault {
        match self.sim.alarm.take() {
            Some(seconds) => {
                debug!("Alarm of {}s fired while spinning", seconds);
                SimFault::Signal(Signal::SIGALRM)
            }
            None => SimFault::Error(ProbeError::target_access(
                "target loops forever and no alarm was requested",
            )),
        }
    }

    pub fn raise(&mut self, signal: Signal) -> SimFault {
        SimFault::Signal(signal)
    }
}

/// The target stopped at a breakpoint
struct SimStop<'a> {
    sim: &'a mut SimInferior,
    function: &'a SimFunction,
    args: &'a [EncodedValue],
    synthetic: bool,
    forced: Option<Option<EncodedValue>>,
    trap: Option<ReturnTrapId>,
}

impl TypeResolver for SimStop<'_> {
    fn resolve_type(&self, name: &str) -> Result<TargetType> {
        self.sim.resolve_type(name)
    }

    fn byte_order(&self) -> ByteOrder {
        self.sim.catalog_byte_order()
    }
}

impl TargetMemory for SimStop<'_> {
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.sim.read_memory(address, len)
    }

    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        self.sim.write_memory(address, bytes)
    }
}

impl StoppedTarget for SimStop<'_> {
    fn function(&self) -> &str {
        &self.function.signature.name
    }

    fn frame_arguments(&mut self) -> Option<Vec<ArgSnapshot>> {
        if !self.function.debug_info {
            return None;
        }
        let params = &self.function.signature.params;
        Some(
            self.args
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let name = params
                        .get(i)
                        .map_or_else(|| format!("arg{}", i), |p| p.name.clone());
                    ArgSnapshot::new(name, value.clone())
                })
                .collect(),
        )
    }

    fn arm_return_trap(&mut self) -> std::result::Result<ReturnTrapId, TrapUnavailable> {
        if self.synthetic {
            return Err(TrapUnavailable::SyntheticCaller);
        }
        let trap = self.sim.next_trap;
        self.sim.next_trap += 1;
        self.trap = Some(trap);
        Ok(trap)
    }

    fn force_return(&mut self, value: Option<&EncodedValue>) -> Result<()> {
        let returned = match (&self.function.signature.return_type, value) {
            (None, None) => None,
            (None, Some(_)) => {
                return Err(ProbeError::usage(format!(
                    "`{}` returns void",
                    self.function.signature.name
                )))
            }
            (Some(ty), Some(value)) => Some(coerce(value.clone(), ty)?),
            (Some(ty), None) => Some(EncodedValue::new(
                ty.clone(),
                vec![0; ty.size],
                self.sim.catalog_byte_order(),
            )),
        };
        self.forced = Some(returned);
        self.trap = None;
        Ok(())
    }

    fn write_errno(&mut self, errno: i32) -> Result<()> {
        if !self.sim.errno_available {
            return Err(ProbeError::target_access("errno is not addressable"));
        }
        self.sim.errno = errno;
        Ok(())
    }
}

impl TypeResolver for SimInferior {
    fn resolve_type(&self, name: &str) -> Result<TargetType> {
        self.catalog.lookup(name)
    }

    fn byte_order(&self) -> ByteOrder {
        self.catalog_byte_order()
    }
}

impl TargetMemory for SimInferior {
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.heap.read(address, len).ok_or_else(|| {
            ProbeError::target_access(format!("cannot read {} bytes at {:#x}", len, address))
        })
    }

    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        if self.heap.write(address, bytes) {
            Ok(())
        } else {
            Err(ProbeError::target_access(format!(
                "cannot write {} bytes at {:#x}",
                bytes.len(),
                address
            )))
        }
    }
}

impl ProcessControl for SimInferior {
    fn control_lock(&self) -> ControlLock {
        self.lock.clone()
    }

    fn launch(&mut self, request: &LaunchRequest) -> Result<u32> {
        if self.pid.is_some() {
            return Err(ProbeError::usage("a program is already running"));
        }
        if request.program.as_os_str().is_empty() {
            return Err(ProbeError::usage("no program to launch"));
        }
        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        self.pid = Some(pid);
        self.launched = Some(request.clone());
        self.detached = false;
        debug!("Simulated {} as pid {}", request.program.display(), pid);
        Ok(pid)
    }

    fn set_breakpoint(&mut self, function: &str) -> Result<()> {
        if !self.functions.contains_key(function) {
            return Err(ProbeError::usage(format!("no function named `{}`", function)));
        }
        self.breakpoints.insert(function.to_string());
        Ok(())
    }

    fn remove_breakpoint(&mut self, function: &str) -> Result<()> {
        self.breakpoints.remove(function);
        Ok(())
    }

    fn function_signature(&self, function: &str) -> Result<FunctionSignature> {
        self.functions
            .get(function)
            .map(|f| f.signature.clone())
            .ok_or_else(|| ProbeError::usage(format!("no function named `{}`", function)))
    }

    fn call_function(
        &mut self,
        function: &str,
        args: &[EncodedValue],
        handler: &mut dyn StopHandler,
    ) -> Result<CallOutcome> {
        self.require_running()?;
        self.stopped = None;
        match self.invoke(function, args, handler, true) {
            Ok(value) => Ok(CallOutcome::Returned(value)),
            Err(SimFault::Signal(signal)) => Ok(CallOutcome::Signaled(signal)),
            Err(SimFault::Error(e)) => Err(e),
        }
    }

    fn request_alarm(&mut self, seconds: u32) -> Result<()> {
        self.require_running()?;
        self.alarm = (seconds > 0).then_some(seconds);
        Ok(())
    }

    fn inspect_stopped(&mut self) -> Result<StopInspection> {
        self.stopped
            .as_ref()
            .map(|(_, inspection)| inspection.clone())
            .ok_or_else(|| ProbeError::usage("the target is not stopped by a signal"))
    }

    fn thread_count(&self) -> Result<usize> {
        self.require_running()?;
        Ok(self.threads)
    }

    fn detach(&mut self) -> Result<Option<u32>> {
        self.require_running()?;
        self.pid = None;
        self.detached = true;
        // the simulated process exits as soon as it runs on its own
        Ok(None)
    }

    fn unload(&mut self) -> Result<()> {
        self.breakpoints.clear();
        self.pid = None;
        self.launched = None;
        self.stopped = None;
        self.alarm = None;
        Ok(())
    }
}
