//! This crate runs JavaScript code inside isolated contexts on top of
//! [`jsvm_runtime`].
//!
//! A [`Vm`] owns one QuickJS runtime. Code can run in the runtime's main
//! realm, in a fresh realm seeded from a sandbox object, or in a long-lived
//! context object. Scripts can be compiled once into script objects and run many
//! times. Every run can be bounded by a timeout enforced by a [`Watchdog`].
//!
//! The same operations are available to scripts through the `Context` and
//! `NodeScript` constructors installed by [`binding::install`].
#![deny(dead_code, missing_docs, unused_mut)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(any(test, debug_assertions), allow(clippy::disallowed_macros))]

mod cloner;
mod context;
mod error;
mod metrics;
mod object_wrap;
mod script;
mod vm;
mod vm_builder;

/// The script-land `Context` and `NodeScript` constructors.
pub mod binding;
/// The evaluation engine shared by every entry point.
pub mod eval;
/// Execution deadlines.
pub mod watchdog;

/// Native state of a context object.
pub use context::{ContextHandle, Environment};
/// Errors and the script exceptions they carry.
pub use error::{ErrorKind, EvalError, Exception, Location, TIMEOUT_MESSAGE, VmError};
/// Describes one evaluation entry point.
pub use eval::EvalConfig;
/// Attaching native values to script objects.
pub use object_wrap::{ObjectWrap, Wrappable};
/// Native state of a script object.
pub use script::{CompiledScript, DEFAULT_FILENAME};
/// A running runtime, its per-call options and the handles it hands out.
pub use vm::{ContextRef, Pinned, RunOptions, ScriptRef, Vm};
/// A builder for creating a new `Vm`
pub use vm_builder::VmBuilder;
/// Bounds the running time of a script.
pub use watchdog::Watchdog;

/// Engine types that appear in this crate's API.
pub use jsvm_runtime::{InterruptHandle, RootKey, Roots, RuntimeConfig, rquickjs};

/// The Result of a vm operation
pub type Result<T> = std::result::Result<T, VmError>;
