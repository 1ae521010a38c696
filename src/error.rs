//! Adapter error taxonomy
//!
//! Every error here is fatal at the call site: the instrumented program has no
//! way to recover from a missing region handle, so the adapter reports the
//! construct at fault and aborts. Configuration problems are the exception and
//! live in [`crate::config::ConfigError`].

use std::collections::TryReserveError;
use thiserror::Error;

/// Failures raised on the instrumentation path
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The descriptor table could not grow to register a new region
    #[error("failed to grow region table while registering {descriptor:?}: {source}")]
    TableGrowth {
        descriptor: String,
        #[source]
        source: TryReserveError,
    },

    /// An exit/end call arrived for a slot that was never entered
    #[error("exit called on unresolved region handle slot {slot:#x} ({construct})")]
    UnresolvedHandle { slot: usize, construct: &'static str },

    /// First use of a slot without an initialization string
    #[error("region handle slot {slot:#x} used before initialization without a descriptor")]
    MissingDescriptor { slot: usize },

    /// A resolved slot entered again with a different descriptor
    #[error("region handle slot {slot:#x} reused: registered as {registered:?}, entered as {entered:?}")]
    DescriptorMismatch {
        slot: usize,
        registered: String,
        entered: String,
    },
}

/// Report a fatal adapter error and abort the process.
///
/// Unwinding is not an option here: the caller is usually a C frame in the
/// middle of an OpenMP construct.
#[cold]
#[inline(never)]
pub fn fatal(error: AdapterError) -> ! {
    tracing::error!(%error, "fatal POMP2 adapter error");
    eprintln!("hilo: fatal: {}", error);
    std::process::abort()
}
