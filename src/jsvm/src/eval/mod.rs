//! The evaluation state machine behind every public entry point.
//!
//! All entry points run through [`eval_machine`]; they differ only in the
//! [`EvalConfig`] they pass, which fixes where the code comes from, which
//! environment runs it, what is returned and whether a deadline applies.
//! Arguments are positional, with positions derived from the configuration.
//!
//! For isolated runs the sandbox object is copied onto the global object of
//! the selected realm before the script runs, and the global object is
//! copied back onto the sandbox after it succeeded. A failed run leaves the
//! sandbox untouched. A context created for a failed run is not torn down
//! eagerly; its realm goes away once nothing references it.

use std::io::Write as _;
use std::time::Duration;

use jsvm_runtime::{Artifact, InterruptHandle};
use rquickjs::{Coerced, Ctx, FromJs, Object, Value};
use tracing::{Level, instrument};

use crate::cloner::clone_properties;
use crate::context::ContextHandle;
use crate::metrics::{METRIC_SCRIPT_TIMEOUTS, METRIC_SCRIPTS_COMPILED};
use crate::object_wrap::ObjectWrap;
use crate::script::{CompiledScript, DEFAULT_FILENAME};
use crate::watchdog::Watchdog;
use crate::{ErrorKind, EvalError, Exception};

pub(crate) mod config;

pub use config::{ContextSelection, EvalConfig, Input, Output, Timeout};

const NEEDS_CODE: &str = "needs at least 'code' argument.";
const NEEDS_CONTEXT: &str = "needs a 'context' argument.";
const NEEDS_MS: &str = "needs an unsigned integer 'ms' argument.";
const NOT_A_SCRIPT: &str = "Must be called as a method of Script.";
const NOT_COMPILED: &str = "'this' must be a result of previous new Script(code) call.";
const SANDBOX_NOT_OBJECT: &str = "createContext() accept only object as first argument.";

/// What an evaluation returns while still inside the runtime.
pub type EvalResult<'js, T> = std::result::Result<T, EvalError<'js>>;

/// Arguments resolved against an entry point's layout.
struct Resolved<'js> {
    code: Option<String>,
    sandbox: Option<Object<'js>>,
    filename: String,
    timeout_ms: u32,
    display_errors: bool,
}

/// An optional argument. An explicit `undefined` counts as omitted.
fn optional<'a, 'js>(args: &'a [Value<'js>], index: usize) -> Option<&'a Value<'js>> {
    args.get(index).filter(|value| !value.is_undefined())
}

fn to_text<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> EvalResult<'js, String> {
    Coerced::<String>::from_js(ctx, value.clone())
        .map(|text| text.0)
        .map_err(|e| EvalError::from_js(ctx, e))
}

/// A non-negative integral number that fits in 32 bits.
fn as_u32(value: &Value<'_>) -> Option<u32> {
    let n = value.as_number()?;
    (n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&n)).then_some(n as u32)
}

fn resolve<'js>(
    ctx: &Ctx<'js>,
    config: &EvalConfig,
    args: &[Value<'js>],
) -> EvalResult<'js, Resolved<'js>> {
    let layout = config.layout();

    if layout.code.is_some() && args.is_empty() {
        return Err(EvalError::usage(ErrorKind::TypeError, NEEDS_CODE));
    }
    let sandbox_arg = layout.sandbox.and_then(|index| args.get(index));
    if config.context == ContextSelection::UserContext
        && !sandbox_arg.is_some_and(ContextHandle::is_instance)
    {
        return Err(EvalError::usage(ErrorKind::TypeError, NEEDS_CONTEXT));
    }

    let code = match layout.code {
        Some(index) => Some(to_text(ctx, &args[index])?),
        None => None,
    };

    let sandbox = match config.context {
        ContextSelection::ThisContext => None,
        ContextSelection::UserContext => sandbox_arg.and_then(|value| value.as_object().cloned()),
        ContextSelection::NewContext => match sandbox_arg.and_then(Value::as_object) {
            Some(object) => Some(object.clone()),
            None => Some(Object::new(ctx.clone()).map_err(|e| EvalError::from_js(ctx, e))?),
        },
    };

    let filename = match optional(args, layout.filename) {
        Some(value) => to_text(ctx, value)?,
        None => DEFAULT_FILENAME.to_string(),
    };

    let timeout_ms = match layout.timeout.and_then(|index| optional(args, index)) {
        Some(value) => {
            as_u32(value).ok_or_else(|| EvalError::usage(ErrorKind::TypeError, NEEDS_MS))?
        }
        None => 0,
    };

    let display_errors = args
        .get(layout.display_errors)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(Resolved {
        code,
        sandbox,
        filename,
        timeout_ms,
        display_errors,
    })
}

/// Prints a failed compile or run to stderr, with the offending line when it
/// belongs to the script being evaluated.
fn display_error<'js>(ctx: &Ctx<'js>, err: &EvalError<'js>, source: &str, filename: &str) {
    let (EvalError::Compile(value) | EvalError::Runtime(value)) = err else {
        return;
    };
    let exception = Exception::describe(ctx, value);
    let mut stderr = std::io::stderr().lock();
    if exception
        .location
        .as_ref()
        .is_some_and(|location| location.filename == filename)
        && let Some(diagnostic) = exception.diagnostic(source)
    {
        let _ = writeln!(stderr, "{diagnostic}");
    }
    let _ = writeln!(stderr, "{}", exception.message);
}

fn compile<'js>(env: &Ctx<'js>, code: &str, filename: &str) -> EvalResult<'js, Artifact> {
    match Artifact::compile(env, code, filename) {
        Ok(artifact) => {
            metrics::counter!(METRIC_SCRIPTS_COMPILED).increment(1);
            Ok(artifact)
        }
        Err(rquickjs::Error::Exception) => Err(EvalError::Compile(env.catch())),
        Err(e) => Err(EvalError::Engine(e.to_string())),
    }
}

/// Runs `artifact` in the realm of `env`, under a watchdog when `timeout_ms`
/// is non-zero.
fn run<'js>(env: &Ctx<'js>, artifact: &Artifact, timeout_ms: u32) -> EvalResult<'js, Value<'js>> {
    let interrupt = InterruptHandle::from_ctx(env).map_err(|e| EvalError::from_js(env, e))?;
    let watchdog = match timeout_ms {
        0 => None,
        ms => Some(Watchdog::start(
            Duration::from_millis(u64::from(ms)),
            interrupt.clone(),
        )?),
    };
    let result = artifact
        .run(env)
        .map_err(|e| EvalError::from_js(env, e));
    let fired = watchdog.is_some_and(Watchdog::stop);
    if fired {
        // Whatever the script was doing when the deadline passed, the
        // deadline is what ended it.
        metrics::counter!(METRIC_SCRIPT_TIMEOUTS).increment(1);
        return Err(EvalError::TimedOut);
    }
    match result {
        Err(EvalError::Runtime(value)) if interrupt.is_pending() => {
            Err(EvalError::Terminated(value))
        }
        other => other,
    }
}

/// The steps that run against the selected environment.
fn eval_in_env<'js>(
    ctx: &Ctx<'js>,
    env: &Ctx<'js>,
    builtins: Option<&[String]>,
    config: &EvalConfig,
    receiver: &Value<'js>,
    args: Resolved<'js>,
) -> EvalResult<'js, Value<'js>> {
    let global = env.globals();
    if let Some(sandbox) = &args.sandbox {
        clone_properties(ctx, sandbox, &global, None).map_err(|e| EvalError::from_js(ctx, e))?;
    }

    let artifact = match (config.input, &args.code) {
        (Input::CompileCode, Some(code)) => {
            compile(env, code, &args.filename).inspect_err(|e| {
                if args.display_errors {
                    display_error(ctx, e, code, &args.filename);
                }
            })?
        }
        _ => ObjectWrap::<CompiledScript>::get(receiver, |script| script.artifact().cloned())
            .ok_or_else(|| EvalError::usage(ErrorKind::Error, NOT_A_SCRIPT))?
            .ok_or_else(|| EvalError::usage(ErrorKind::Error, NOT_COMPILED))?,
    };

    let result = match config.output {
        Output::ReturnResult => {
            run(env, &artifact, args.timeout_ms).inspect_err(|e| {
                if args.display_errors {
                    display_error(ctx, e, artifact.source(), artifact.filename());
                }
            })?
        }
        Output::WrapArtifact => {
            ObjectWrap::<CompiledScript>::unwrap_mut(receiver, |script| {
                script.set_artifact(artifact)
            })
            .map_err(|_| EvalError::usage(ErrorKind::Error, NOT_A_SCRIPT))?;
            receiver.clone()
        }
    };

    if let Some(sandbox) = &args.sandbox {
        clone_properties(ctx, &global, sandbox, builtins)
            .map_err(|e| EvalError::from_js(ctx, e))?;
    }
    Ok(result)
}

/// Runs one evaluation as configured by `config`.
///
/// `receiver` is the script object for [`Input::UseCompiled`] and
/// [`Output::WrapArtifact`] configurations and is ignored otherwise. `args`
/// follow the layout of the configuration: code, then context or sandbox,
/// then filename, timeout in milliseconds and the display-errors flag, each
/// present only when the configuration calls for it.
#[instrument(skip_all, level=Level::DEBUG, fields(entry_point = config.name))]
pub fn eval_machine<'js>(
    ctx: &Ctx<'js>,
    config: EvalConfig,
    receiver: &Value<'js>,
    args: &[Value<'js>],
) -> EvalResult<'js, Value<'js>> {
    #[cfg(feature = "eval_metrics")]
    let _metric_guard = crate::metrics::EvalMetricGuard::new(config.name);

    let resolved = resolve(ctx, &config, args)?;

    // `_context` keeps a temporary context object, and with it the realm,
    // alive until the evaluation is done.
    let (env, builtins, _context) = match config.context {
        ContextSelection::ThisContext => (ctx.clone(), None, None),
        ContextSelection::NewContext => {
            let context = ContextHandle::create(ctx)?.into_value();
            let env = ContextHandle::environment(ctx, &context)?;
            (env.ctx, Some(env.builtins), Some(context))
        }
        ContextSelection::UserContext => {
            let context = resolved
                .sandbox
                .clone()
                .map(Object::into_value)
                .unwrap_or_else(|| Value::new_undefined(ctx.clone()));
            let env = ContextHandle::environment(ctx, &context)?;
            (env.ctx, Some(env.builtins), None)
        }
    };

    let result = eval_in_env(ctx, &env, builtins.as_deref(), &config, receiver, resolved);
    if let Err(e) = &result {
        tracing::debug!(error = ?e, "evaluation failed");
    }
    result
}

/// Creates a context object, seeded with the own properties of `sandbox`
/// when it is an object.
///
/// # Errors
///
/// A usage error when `sandbox` is neither an object nor omitted.
#[instrument(skip_all, level=Level::DEBUG)]
pub fn create_context<'js>(
    ctx: &Ctx<'js>,
    sandbox: Option<&Value<'js>>,
) -> EvalResult<'js, Object<'js>> {
    let sandbox = match sandbox.filter(|value| !value.is_undefined()) {
        None => None,
        Some(value) => Some(
            value
                .as_object()
                .cloned()
                .ok_or_else(|| EvalError::usage(ErrorKind::TypeError, SANDBOX_NOT_OBJECT))?,
        ),
    };
    let context = ContextHandle::create(ctx)?;
    if let Some(sandbox) = sandbox {
        clone_properties(ctx, &sandbox, &context, None).map_err(|e| EvalError::from_js(ctx, e))?;
    }
    Ok(context)
}

/// Compiles `args[0]` into a new script object. The code is not run.
pub fn new_script<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> EvalResult<'js, Object<'js>> {
    let script = CompiledScript::create(ctx)?;
    bind_script(ctx, &script, args)?;
    Ok(script)
}

/// Compiles `args[0]` and stores the artifact on `script`, an existing
/// script object.
pub(crate) fn bind_script<'js>(
    ctx: &Ctx<'js>,
    script: &Object<'js>,
    args: &[Value<'js>],
) -> EvalResult<'js, ()> {
    let receiver = script.clone().into_value();
    eval_machine(ctx, EvalConfig::NEW_SCRIPT, &receiver, args).map(|_| ())
}
