use std::fmt;

use rquickjs::{Coerced, Ctx, FromJs, Object, Value};

/// Which script-land constructor a usage error is thrown with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `TypeError`
    TypeError,
    /// `Error`
    Error,
}

impl ErrorKind {
    /// The constructor's name.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::Error => "Error",
        }
    }

    pub(crate) fn throw(self, ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
        match self {
            ErrorKind::TypeError => rquickjs::Exception::throw_type(ctx, message),
            ErrorKind::Error => rquickjs::Exception::throw_message(ctx, message),
        }
    }
}

/// Where an exception was thrown, as recorded in its stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Filename the script was compiled under.
    pub filename: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, when the engine records one.
    pub column: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

impl Location {
    /// The first frame of `stack` that names a script position.
    fn from_stack(stack: &str) -> Option<Self> {
        stack.lines().find_map(Self::from_frame)
    }

    // `at f (file.js:3:7)`, `at file.js:3:7` or `at file.js:3`
    fn from_frame(frame: &str) -> Option<Self> {
        let frame = frame.trim().strip_prefix("at ")?;
        let place = match frame.rfind('(') {
            Some(open) => frame[open + 1..].strip_suffix(')')?,
            None => frame,
        };
        let (rest, last) = place.rsplit_once(':')?;
        let last: u32 = last.parse().ok()?;
        if let Some((filename, line)) = rest.rsplit_once(':')
            && let Ok(line) = line.parse()
        {
            return Some(Self {
                filename: filename.to_owned(),
                line,
                column: Some(last),
            });
        }
        Some(Self {
            filename: rest.to_owned(),
            line: last,
            column: None,
        })
    }
}

/// A value thrown by script code, described the way it rendered when it was
/// caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    /// The `name` property, for error objects.
    pub name: Option<String>,
    /// `ToString` of the value, e.g. `"TypeError: x is not a function"`.
    pub message: String,
    /// The `stack` property, for error objects.
    pub stack: Option<String>,
    /// Where the value was thrown, when the engine knows.
    pub location: Option<Location>,
}

impl Exception {
    pub(crate) fn describe<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Self {
        let message = match Coerced::<String>::from_js(ctx, value.clone()) {
            Ok(text) => text.0,
            Err(_) => {
                let _ = ctx.catch();
                String::from("<unprintable exception>")
            }
        };
        let (name, stack) = match value.as_object() {
            Some(object) => (
                string_prop(ctx, object, "name"),
                string_prop(ctx, object, "stack"),
            ),
            None => (None, None),
        };
        let location = stack.as_deref().and_then(Location::from_stack);
        Self {
            name,
            message,
            stack,
            location,
        }
    }

    /// `filename:line`, the offending line of `source` and, when the column
    /// is known, a caret under it.
    pub fn diagnostic(&self, source: &str) -> Option<String> {
        let location = self.location.as_ref()?;
        let index = usize::try_from(location.line.checked_sub(1)?).ok()?;
        let line = source.lines().nth(index)?;
        let mut out = format!("{location}\n{line}");
        if let Some(column) = location.column {
            out.push('\n');
            out.push_str(&" ".repeat(column.saturating_sub(1) as usize));
            out.push('^');
        }
        Some(out)
    }
}

fn string_prop<'js>(ctx: &Ctx<'js>, object: &Object<'js>, key: &str) -> Option<String> {
    match object.get::<_, Option<String>>(key) {
        Ok(value) => value,
        Err(rquickjs::Error::Exception) => {
            let _ = ctx.catch();
            None
        }
        Err(_) => None,
    }
}

/// Everything that can go wrong while creating contexts or running scripts,
/// as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Bad arguments or a wrong receiver. Raised before any script runs.
    Usage {
        /// The constructor used when the error is thrown into script land.
        kind: ErrorKind,
        /// Fixed description of what was wrong.
        message: String,
    },
    /// The source did not parse. Carries the engine's `SyntaxError`.
    Compile(Exception),
    /// The script threw.
    Runtime(Exception),
    /// A watchdog ended the execution.
    TimedOut,
    /// Execution was terminated by somebody other than this call's watchdog,
    /// for instance the host through an [`InterruptHandle`](crate::InterruptHandle).
    Terminated,
    /// A host-level fault inside the engine.
    Engine(String),
}

/// Message of [`VmError::TimedOut`] as seen by scripts.
pub const TIMEOUT_MESSAGE: &str = "Script execution timed out.";

impl VmError {
    pub(crate) fn usage(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError::Usage {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a failed engine call made on the host's behalf.
    pub(crate) fn from_js(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        EvalError::from_js(ctx, err).into_vm_error(ctx)
    }

    /// The exception a script would have seen, if this error came from one.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            VmError::Compile(e) | VmError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Usage { kind, message } => write!(f, "{}: {message}", kind.name()),
            VmError::Compile(e) | VmError::Runtime(e) => {
                f.write_str(&e.message)?;
                if let Some(location) = &e.location {
                    write!(f, " at {location}")?;
                }
                Ok(())
            }
            VmError::TimedOut => f.write_str(TIMEOUT_MESSAGE),
            VmError::Terminated => f.write_str("Script execution was terminated"),
            VmError::Engine(msg) => write!(f, "engine error: {msg}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<anyhow::Error> for VmError {
    fn from(err: anyhow::Error) -> Self {
        VmError::Engine(format!("{err:#}"))
    }
}

/// The outcome of a failed evaluation while still inside the runtime.
///
/// Thrown values are kept as they are so that rethrowing them into script
/// land preserves their identity.
#[derive(Debug)]
pub enum EvalError<'js> {
    /// See [`VmError::Usage`].
    Usage {
        /// The constructor used when the error is thrown.
        kind: ErrorKind,
        /// Fixed description of what was wrong.
        message: String,
    },
    /// The source did not parse.
    Compile(Value<'js>),
    /// The script threw.
    Runtime(Value<'js>),
    /// This call's watchdog ended the execution.
    TimedOut,
    /// Execution was terminated from elsewhere; the value is the engine's
    /// uncatchable interruption error.
    Terminated(Value<'js>),
    /// A host-level fault inside the engine.
    Engine(String),
}

impl<'js> EvalError<'js> {
    pub(crate) fn usage(kind: ErrorKind, message: impl Into<String>) -> Self {
        EvalError::Usage {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a failed rquickjs call, taking the pending exception if
    /// there is one.
    pub(crate) fn from_js(ctx: &Ctx<'js>, err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => EvalError::Runtime(ctx.catch()),
            other => EvalError::Engine(other.to_string()),
        }
    }

    /// Throws the error into script land. Compile and runtime errors rethrow
    /// the original value.
    pub fn throw(self, ctx: &Ctx<'js>) -> rquickjs::Error {
        match self {
            EvalError::Usage { kind, message } => kind.throw(ctx, &message),
            EvalError::Compile(value) | EvalError::Runtime(value) | EvalError::Terminated(value) => {
                ctx.throw(value)
            }
            EvalError::TimedOut => ErrorKind::Error.throw(ctx, TIMEOUT_MESSAGE),
            EvalError::Engine(msg) => rquickjs::Exception::throw_internal(ctx, &msg),
        }
    }

    /// Describes the error for the host, outside the runtime.
    pub fn into_vm_error(self, ctx: &Ctx<'js>) -> VmError {
        match self {
            EvalError::Usage { kind, message } => VmError::Usage { kind, message },
            EvalError::Compile(value) => VmError::Compile(Exception::describe(ctx, &value)),
            EvalError::Runtime(value) => VmError::Runtime(Exception::describe(ctx, &value)),
            EvalError::TimedOut => VmError::TimedOut,
            EvalError::Terminated(_) => VmError::Terminated,
            EvalError::Engine(msg) => VmError::Engine(msg),
        }
    }
}

impl From<VmError> for EvalError<'_> {
    fn from(err: VmError) -> Self {
        match err {
            VmError::Usage { kind, message } => EvalError::Usage { kind, message },
            VmError::TimedOut => EvalError::TimedOut,
            VmError::Engine(msg) => EvalError::Engine(msg),
            other => EvalError::Engine(other.to_string()),
        }
    }
}

/// Creates a [`VmError::Engine`] from a format string.
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {
        $crate::VmError::Engine(::std::string::String::from($msg))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::VmError::Engine(::std::format!($fmt, $($arg)*))
    };
}
