//! Allocation error taxonomy, process-wide replaceable handlers, and the
//! diagnostic statistics every allocator in the crate feeds.

use core::alloc::Layout;
use core::fmt;
#[cfg(feature = "std")]
use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "std")]
use parking_lot::RwLock;

/// Opaque identity of a concrete allocator instance, carried in every error
/// so a handler can tell which allocator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorInfo {
    pub name: &'static str,
    pub identity: usize,
}

impl AllocatorInfo {
    pub const fn new(name: &'static str, identity: usize) -> Self {
        Self { name, identity }
    }
}

impl fmt::Display for AllocatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.name, self.identity)
    }
}

/// The kind of failure an allocator ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocErrorKind {
    /// The upstream allocator refused to supply a new block.
    OutOfMemory,
    /// The request exceeds what this allocator's contract supports
    /// (e.g. bigger than the largest free-list-array bucket).
    BadAllocationSize,
    /// A pointer passed to `deallocate` does not belong to this allocator.
    /// Only ever surfaced when debug checks are enabled.
    InvalidPointer,
    /// The same pointer was deallocated twice. Debug-only.
    DoubleFree,
    /// Fence bytes around a node were disturbed. Debug-only.
    BufferOverflow,
    /// Cells remained allocated at shutdown. Debug-only.
    Leak,
    /// A caller-supplied `Layout` could not be constructed or satisfied.
    InvalidLayout,
}

impl AllocErrorKind {
    pub const fn severity(self) -> ErrorSeverity {
        match self {
            AllocErrorKind::OutOfMemory => ErrorSeverity::Error,
            AllocErrorKind::BadAllocationSize => ErrorSeverity::Warning,
            AllocErrorKind::InvalidPointer => ErrorSeverity::Critical,
            AllocErrorKind::DoubleFree => ErrorSeverity::Critical,
            AllocErrorKind::BufferOverflow => ErrorSeverity::Critical,
            AllocErrorKind::Leak => ErrorSeverity::Warning,
            AllocErrorKind::InvalidLayout => ErrorSeverity::Error,
        }
    }

    pub const fn recovery_hint(self) -> &'static str {
        match self {
            AllocErrorKind::OutOfMemory => {
                "release memory elsewhere, lower the working set, or grow the initial block size"
            }
            AllocErrorKind::BadAllocationSize => "request a size within the allocator's contract",
            AllocErrorKind::InvalidPointer => "the pointer was not allocated by this allocator",
            AllocErrorKind::DoubleFree => "the pointer was already returned to the free list",
            AllocErrorKind::BufferOverflow => "a write past the node's end corrupted fence bytes",
            AllocErrorKind::Leak => "cells remained allocated when the allocator was torn down",
            AllocErrorKind::InvalidLayout => "construct a valid Layout before allocating",
        }
    }
}

impl fmt::Display for AllocErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocErrorKind::OutOfMemory => "out of memory",
            AllocErrorKind::BadAllocationSize => "bad allocation size",
            AllocErrorKind::InvalidPointer => "invalid pointer",
            AllocErrorKind::DoubleFree => "double free",
            AllocErrorKind::BufferOverflow => "buffer overflow",
            AllocErrorKind::Leak => "memory leak",
            AllocErrorKind::InvalidLayout => "invalid layout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

/// Call-site diagnostics attached to an [`AllocError`]: where it was raised
/// and, optionally, a human-readable note. Boxed inside `AllocError` so the
/// common case (no context captured) doesn't grow every error by a pointer
/// and a `&'static str`.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: Option<&'static str>,
    pub location: Option<&'static core::panic::Location<'static>>,
}

impl ErrorContext {
    pub const fn new() -> Self {
        Self { message: None, location: None }
    }

    #[track_caller]
    pub fn with_caller() -> Self {
        Self { message: None, location: Some(core::panic::Location::caller()) }
    }

    pub fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An allocation or deallocation failure.
#[derive(Debug, Clone)]
pub struct AllocError {
    kind: AllocErrorKind,
    layout: Option<Layout>,
    info: Option<AllocatorInfo>,
    message: Option<&'static str>,
    context: Option<Box<ErrorContext>>,
}

impl AllocError {
    pub const fn new(kind: AllocErrorKind) -> Self {
        Self { kind, layout: None, info: None, message: None, context: None }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_info(mut self, info: AllocatorInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    #[track_caller]
    pub fn out_of_memory(info: AllocatorInfo, layout: Layout) -> Self {
        record(AllocErrorKind::OutOfMemory);
        let err = Self::new(AllocErrorKind::OutOfMemory)
            .with_info(info)
            .with_layout(layout)
            .with_context(ErrorContext::with_caller());
        invoke_out_of_memory(&info, layout.size());
        err
    }

    #[track_caller]
    pub fn bad_size(info: AllocatorInfo, layout: Layout, supported_upper_bound: usize) -> Self {
        record(AllocErrorKind::BadAllocationSize);
        invoke_bad_size(&info, layout.size(), supported_upper_bound);
        Self::new(AllocErrorKind::BadAllocationSize)
            .with_info(info)
            .with_layout(layout)
            .with_context(ErrorContext::with_caller())
    }

    #[track_caller]
    pub fn invalid_pointer(info: AllocatorInfo, pointer: *const u8) -> Self {
        record(AllocErrorKind::InvalidPointer);
        invoke_invalid_pointer(&info, pointer);
        Self::new(AllocErrorKind::InvalidPointer)
            .with_info(info)
            .with_context(ErrorContext::with_caller())
    }

    #[track_caller]
    pub fn leak(info: AllocatorInfo, bytes_leaked: usize) -> Self {
        record(AllocErrorKind::Leak);
        invoke_leak(&info, bytes_leaked);
        Self::new(AllocErrorKind::Leak).with_info(info).with_context(ErrorContext::with_caller())
    }

    pub fn kind(&self) -> AllocErrorKind {
        self.kind
    }

    pub fn layout(&self) -> Option<Layout> {
        self.layout
    }

    pub fn info(&self) -> Option<AllocatorInfo> {
        self.info
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        self.context.as_deref()
    }

    pub fn location(&self) -> Option<&'static core::panic::Location<'static>> {
        self.context.as_ref().and_then(|c| c.location)
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(info) = self.info {
            write!(f, " in {}", info)?;
        }
        if let Some(layout) = self.layout {
            write!(f, " (size={}, align={})", layout.size(), layout.align())?;
        }
        if let Some(message) = self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(location) = self.location() {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}

pub type AllocResult<T> = Result<T, AllocError>;

/// Runs `f`, and on `Err` stamps the allocator's identity onto the error.
pub trait AllocResultExt<T> {
    fn with_allocator_info(self, info: AllocatorInfo) -> AllocResult<T>;
}

impl<T> AllocResultExt<T> for AllocResult<T> {
    fn with_allocator_info(self, info: AllocatorInfo) -> AllocResult<T> {
        self.map_err(|e| e.with_info(info))
    }
}

// ---------------------------------------------------------------------
// Process-wide error statistics
// ---------------------------------------------------------------------

#[cfg(feature = "std")]
struct ErrorStats {
    out_of_memory: AtomicU64,
    bad_size: AtomicU64,
    invalid_pointer: AtomicU64,
    double_free: AtomicU64,
    buffer_overflow: AtomicU64,
    leak: AtomicU64,
}

#[cfg(feature = "std")]
static ERROR_STATS: ErrorStats = ErrorStats {
    out_of_memory: AtomicU64::new(0),
    bad_size: AtomicU64::new(0),
    invalid_pointer: AtomicU64::new(0),
    double_free: AtomicU64::new(0),
    buffer_overflow: AtomicU64::new(0),
    leak: AtomicU64::new(0),
};

/// A point-in-time snapshot of how many errors of each kind have occurred
/// process-wide since the last [`reset_error_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorStatsSnapshot {
    pub out_of_memory: u64,
    pub bad_size: u64,
    pub invalid_pointer: u64,
    pub double_free: u64,
    pub buffer_overflow: u64,
    pub leak: u64,
}

#[cfg(feature = "std")]
fn record(kind: AllocErrorKind) {
    let counter = match kind {
        AllocErrorKind::OutOfMemory => &ERROR_STATS.out_of_memory,
        AllocErrorKind::BadAllocationSize => &ERROR_STATS.bad_size,
        AllocErrorKind::InvalidPointer => &ERROR_STATS.invalid_pointer,
        AllocErrorKind::DoubleFree => &ERROR_STATS.double_free,
        AllocErrorKind::BufferOverflow => &ERROR_STATS.buffer_overflow,
        AllocErrorKind::Leak => &ERROR_STATS.leak,
        AllocErrorKind::InvalidLayout => return,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(not(feature = "std"))]
fn record(_kind: AllocErrorKind) {}

#[cfg(feature = "std")]
pub fn error_stats() -> ErrorStatsSnapshot {
    ErrorStatsSnapshot {
        out_of_memory: ERROR_STATS.out_of_memory.load(Ordering::Relaxed),
        bad_size: ERROR_STATS.bad_size.load(Ordering::Relaxed),
        invalid_pointer: ERROR_STATS.invalid_pointer.load(Ordering::Relaxed),
        double_free: ERROR_STATS.double_free.load(Ordering::Relaxed),
        buffer_overflow: ERROR_STATS.buffer_overflow.load(Ordering::Relaxed),
        leak: ERROR_STATS.leak.load(Ordering::Relaxed),
    }
}

#[cfg(feature = "std")]
pub fn reset_error_stats() {
    ERROR_STATS.out_of_memory.store(0, Ordering::Relaxed);
    ERROR_STATS.bad_size.store(0, Ordering::Relaxed);
    ERROR_STATS.invalid_pointer.store(0, Ordering::Relaxed);
    ERROR_STATS.double_free.store(0, Ordering::Relaxed);
    ERROR_STATS.buffer_overflow.store(0, Ordering::Relaxed);
    ERROR_STATS.leak.store(0, Ordering::Relaxed);
}

// ---------------------------------------------------------------------
// Process-wide replaceable handlers
// ---------------------------------------------------------------------

type OomHandler = dyn Fn(&AllocatorInfo, usize) + Send + Sync;
type BadSizeHandler = dyn Fn(&AllocatorInfo, usize, usize) + Send + Sync;
type LeakHandler = dyn Fn(&AllocatorInfo, usize) + Send + Sync;
type InvalidPointerHandler = dyn Fn(&AllocatorInfo, *const u8) + Send + Sync;

#[cfg(feature = "std")]
static OOM_HANDLER: RwLock<Option<Box<OomHandler>>> = RwLock::new(None);
#[cfg(feature = "std")]
static BAD_SIZE_HANDLER: RwLock<Option<Box<BadSizeHandler>>> = RwLock::new(None);
#[cfg(feature = "std")]
static LEAK_HANDLER: RwLock<Option<Box<LeakHandler>>> = RwLock::new(None);
#[cfg(feature = "std")]
static INVALID_POINTER_HANDLER: RwLock<Option<Box<InvalidPointerHandler>>> = RwLock::new(None);

fn default_log(severity: ErrorSeverity, message: &str) {
    #[cfg(feature = "logging")]
    {
        match severity {
            ErrorSeverity::Warning => tracing::warn!("{message}"),
            ErrorSeverity::Error => tracing::error!("{message}"),
            ErrorSeverity::Critical => tracing::error!(critical = true, "{message}"),
        }
    }
    #[cfg(not(feature = "logging"))]
    {
        let _ = (severity, message);
    }
}

/// Installs a handler for out-of-memory failures. `None` restores the
/// default, which logs and returns (the caller then still receives an
/// `Err`).
#[cfg(feature = "std")]
pub fn set_out_of_memory_handler(handler: Option<Box<OomHandler>>) {
    *OOM_HANDLER.write() = handler;
}

#[cfg(feature = "std")]
pub fn set_bad_size_handler(handler: Option<Box<BadSizeHandler>>) {
    *BAD_SIZE_HANDLER.write() = handler;
}

#[cfg(feature = "std")]
pub fn set_leak_handler(handler: Option<Box<LeakHandler>>) {
    *LEAK_HANDLER.write() = handler;
}

#[cfg(feature = "std")]
pub fn set_invalid_pointer_handler(handler: Option<Box<InvalidPointerHandler>>) {
    *INVALID_POINTER_HANDLER.write() = handler;
}

#[cfg(feature = "std")]
fn invoke_out_of_memory(info: &AllocatorInfo, requested_size: usize) {
    let guard = OOM_HANDLER.read();
    match guard.as_ref() {
        Some(handler) => handler(info, requested_size),
        None => default_log(
            ErrorSeverity::Error,
            &format!("{info}: out of memory requesting {requested_size} bytes"),
        ),
    }
}

#[cfg(feature = "std")]
fn invoke_bad_size(info: &AllocatorInfo, passed: usize, supported_upper_bound: usize) {
    let guard = BAD_SIZE_HANDLER.read();
    match guard.as_ref() {
        Some(handler) => handler(info, passed, supported_upper_bound),
        None => default_log(
            ErrorSeverity::Warning,
            &format!("{info}: request {passed} exceeds bound {supported_upper_bound}"),
        ),
    }
}

#[cfg(feature = "std")]
fn invoke_leak(info: &AllocatorInfo, bytes_leaked: usize) {
    let guard = LEAK_HANDLER.read();
    match guard.as_ref() {
        Some(handler) => handler(info, bytes_leaked),
        None => default_log(ErrorSeverity::Warning, &format!("{info}: leaked {bytes_leaked} bytes")),
    }
}

#[cfg(feature = "std")]
fn invoke_invalid_pointer(info: &AllocatorInfo, pointer: *const u8) {
    let guard = INVALID_POINTER_HANDLER.read();
    match guard.as_ref() {
        Some(handler) => handler(info, pointer),
        None => default_log(
            ErrorSeverity::Critical,
            &format!("{info}: invalid pointer {pointer:p} on deallocate"),
        ),
    }
}

#[cfg(not(feature = "std"))]
fn invoke_out_of_memory(_info: &AllocatorInfo, _requested_size: usize) {}
#[cfg(not(feature = "std"))]
fn invoke_bad_size(_info: &AllocatorInfo, _passed: usize, _supported_upper_bound: usize) {}
#[cfg(not(feature = "std"))]
fn invoke_leak(_info: &AllocatorInfo, _bytes_leaked: usize) {}
#[cfg(not(feature = "std"))]
fn invoke_invalid_pointer(_info: &AllocatorInfo, _pointer: *const u8) {}

/// Calls the fallible upstream allocation `f` once. On failure, invokes the
/// out-of-memory handler and returns the resulting error. There is no
/// platform out-of-memory callback to cooperate with in hosted Rust, so
/// unlike the design this helper generalizes from, there is no second
/// attempt — one call, then the handler, then propagate.
pub fn try_allocate<T>(
    f: impl FnOnce() -> Option<T>,
    info: AllocatorInfo,
    layout: Layout,
) -> AllocResult<T> {
    match f() {
        Some(value) => Ok(value),
        None => Err(AllocError::out_of_memory(info, layout)),
    }
}
