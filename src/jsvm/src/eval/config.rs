//! The four axes an evaluation is parameterized by, and the argument layout
//! they imply.

/// Where the code comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// The first argument is source text to compile.
    CompileCode,
    /// The receiver is a script object holding a compiled artifact.
    UseCompiled,
}

/// Which global environment the code runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSelection {
    /// The environment active at the call site.
    ThisContext,
    /// A fresh environment, seeded from an optional sandbox argument.
    NewContext,
    /// The environment of a context object passed by the caller.
    UserContext,
}

/// What the call yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// The completion value of the script.
    ReturnResult,
    /// The receiver, with the compiled artifact stored on it.
    WrapArtifact,
}

/// Whether a millisecond deadline argument is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// No deadline argument.
    NoTimeout,
    /// An optional deadline argument follows the filename.
    UseTimeout,
}

/// One fixed combination of the four axes, plus the name it is exposed
/// under in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Name of the entry point.
    pub name: &'static str,
    /// Where the code comes from.
    pub input: Input,
    /// Which environment runs it.
    pub context: ContextSelection,
    /// What the call yields.
    pub output: Output,
    /// Whether a deadline is accepted.
    pub timeout: Timeout,
}

impl EvalConfig {
    /// `new Script(code, filename?)`
    pub const NEW_SCRIPT: Self = Self::new(
        "new_script",
        Input::CompileCode,
        ContextSelection::ThisContext,
        Output::WrapArtifact,
        Timeout::NoTimeout,
    );
    /// `script.runInContext(context, filename?, timeout?, displayErrors?)`
    pub const RUN_IN_CONTEXT: Self = Self::new(
        "run_in_context",
        Input::UseCompiled,
        ContextSelection::UserContext,
        Output::ReturnResult,
        Timeout::UseTimeout,
    );
    /// `script.runInThisContext(filename?, timeout?, displayErrors?)`
    pub const RUN_IN_THIS_CONTEXT: Self = Self::new(
        "run_in_this_context",
        Input::UseCompiled,
        ContextSelection::ThisContext,
        Output::ReturnResult,
        Timeout::UseTimeout,
    );
    /// `script.runInNewContext(sandbox?, filename?, timeout?, displayErrors?)`
    pub const RUN_IN_NEW_CONTEXT: Self = Self::new(
        "run_in_new_context",
        Input::UseCompiled,
        ContextSelection::NewContext,
        Output::ReturnResult,
        Timeout::UseTimeout,
    );
    /// `Script.runInContext(code, context, filename?, timeout?, displayErrors?)`
    pub const COMPILE_RUN_IN_CONTEXT: Self = Self::new(
        "compile_run_in_context",
        Input::CompileCode,
        ContextSelection::UserContext,
        Output::ReturnResult,
        Timeout::UseTimeout,
    );
    /// `Script.runInThisContext(code, filename?, timeout?, displayErrors?)`
    pub const COMPILE_RUN_IN_THIS_CONTEXT: Self = Self::new(
        "compile_run_in_this_context",
        Input::CompileCode,
        ContextSelection::ThisContext,
        Output::ReturnResult,
        Timeout::UseTimeout,
    );
    /// `Script.runInNewContext(code, sandbox?, filename?, timeout?, displayErrors?)`
    pub const COMPILE_RUN_IN_NEW_CONTEXT: Self = Self::new(
        "compile_run_in_new_context",
        Input::CompileCode,
        ContextSelection::NewContext,
        Output::ReturnResult,
        Timeout::UseTimeout,
    );

    const fn new(
        name: &'static str,
        input: Input,
        context: ContextSelection,
        output: Output,
        timeout: Timeout,
    ) -> Self {
        Self {
            name,
            input,
            context,
            output,
            timeout,
        }
    }

    /// Whether the call crosses into an isolated environment, and so has a
    /// sandbox to synchronize with.
    pub fn is_isolated(&self) -> bool {
        self.context != ContextSelection::ThisContext
    }

    pub(crate) fn layout(&self) -> ArgLayout {
        let code = (self.input == Input::CompileCode).then_some(0);
        let sandbox_index = usize::from(self.input == Input::CompileCode);
        let sandbox = self.is_isolated().then_some(sandbox_index);
        let filename = sandbox_index + usize::from(self.is_isolated());
        let timeout = (self.timeout == Timeout::UseTimeout).then_some(filename + 1);
        let display_errors = filename + 1 + usize::from(self.timeout == Timeout::UseTimeout);
        ArgLayout {
            code,
            sandbox,
            filename,
            timeout,
            display_errors,
        }
    }
}

/// Positions of the arguments of one entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArgLayout {
    pub(crate) code: Option<usize>,
    pub(crate) sandbox: Option<usize>,
    pub(crate) filename: usize,
    pub(crate) timeout: Option<usize>,
    pub(crate) display_errors: usize,
}
