/*!
The script engine underneath `jsvm`.

A [`JsRuntime`] owns one QuickJS runtime and its main context. Everything
else `jsvm` needs from the engine lives here as well:

- [`Realm`]: an additional, isolated global environment in the same runtime;
- [`Artifact`]: a syntax-checked script that can run in any realm;
- [`Roots`]: strong references the host holds across calls;
- [`InterruptHandle`]: a thread-safe way to stop a running script.
*/

mod globals;
mod host_fn;
mod interrupt;
mod realm;
mod roots;
mod script;
pub mod utils;

use std::mem::ManuallyDrop;

use anyhow::Context as _;
use rquickjs::{Context, Ctx, Runtime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

pub use host_fn::HostFunction;
pub use interrupt::InterruptHandle;
use realm::RealmTable;
pub use realm::Realm;
pub use roots::{RootKey, Roots};
pub use rquickjs;
pub use script::Artifact;

/// Default native stack budget for script execution.
///
/// QuickJS throws a stack overflow error once a script recurses past this, long before
/// the thread's own stack would overflow.
pub const DEFAULT_MAX_STACK_SIZE: usize = 512 * 1024;

/// How a [`JsRuntime`] is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on the runtime's heap, in bytes. `None` means unlimited.
    pub memory_limit: Option<usize>,
    /// Native stack budget, in bytes.
    pub max_stack_size: usize,
    /// Allocation volume, in bytes, that triggers an automatic collection.
    pub gc_threshold: Option<usize>,
    /// Whether `print` and `console.*` write to the process's stdout.
    pub console_output: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            gc_threshold: None,
            console_output: true,
        }
    }
}

/// A QuickJS runtime with its main context, ready to run scripts.
pub struct JsRuntime {
    context: ManuallyDrop<Context>,
    runtime: Runtime,
    interrupt: InterruptHandle,
    realms: RealmTable,
}

impl JsRuntime {
    /// Create a runtime configured by `config`, with the interrupt handler,
    /// the root table and the globals installed.
    #[instrument(skip_all, level = "info")]
    pub fn new(config: RuntimeConfig) -> anyhow::Result<Self> {
        let runtime = Runtime::new().context("Unable to initialize JS_RUNTIME")?;
        runtime.set_max_stack_size(config.max_stack_size);
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }

        let interrupt = InterruptHandle::default();
        let handler = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || handler.is_pending())));

        let context = Context::full(&runtime).context("Unable to create JS context")?;
        let realms = context.with(|ctx| -> anyhow::Result<RealmTable> {
            Roots::install(&ctx)?;
            let realms = RealmTable::install(&ctx)?;
            let Ok(None) = ctx.store_userdata(interrupt.clone()) else {
                anyhow::bail!("Failed to install InterruptHandle");
            };
            globals::setup(&ctx, config.console_output).catch(&ctx)?;
            Ok(realms)
        })?;

        Ok(Self {
            context: ManuallyDrop::new(context),
            runtime,
            interrupt,
            realms,
        })
    }

    /// Run `f` inside the main context.
    ///
    /// Realms dropped during the call are freed once `f` returns.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        let result = self.context.with(f);
        self.free_released_realms();
        result
    }

    /// A handle that terminates whatever script this runtime is running.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run a full garbage collection, finalizing every unreachable object.
    ///
    /// Collections repeat while they release realms, since freeing a realm
    /// can leave more garbage behind.
    pub fn run_gc(&self) {
        loop {
            self.runtime.run_gc();
            if self.free_released_realms() == 0 {
                break;
            }
        }
    }

    fn free_released_realms(&self) -> usize {
        if self.realms.pending() == 0 {
            return 0;
        }
        // SAFETY: `with` holds the runtime for this thread and no collection
        // is running outside of `run_gc`.
        self.context.with(|_| unsafe { self.realms.free_released() })
    }

    /// Register a global function in the main context.
    pub fn register_host_function<Args, Output>(
        &mut self,
        name: &str,
        function: impl fn_traits::Fn<Args, Output = anyhow::Result<Output>> + 'static,
    ) -> anyhow::Result<()>
    where
        Args: DeserializeOwned,
        Output: Serialize,
    {
        let function = HostFunction::new_serde(function);
        self.context
            .with(|ctx| function.install(&ctx, name).catch(&ctx))
    }

    /// Register a global function in the main context that takes its
    /// arguments as a JSON array and returns JSON.
    pub fn register_json_host_function(
        &mut self,
        name: &str,
        function: impl Fn(String) -> anyhow::Result<String> + 'static,
    ) -> anyhow::Result<()> {
        let function = HostFunction::new_json(function);
        self.context
            .with(|ctx| function.install(&ctx, name).catch(&ctx))
    }
}

impl Drop for JsRuntime {
    fn drop(&mut self) {
        // Rooted objects and every realm must be gone before the runtime is
        // freed, otherwise QuickJS aborts on the leak.
        self.context.with(|ctx| {
            Roots::clear(&ctx);
            self.realms.clear_live_globals(&ctx);
        });
        // SAFETY: the main context is not used again.
        unsafe { ManuallyDrop::drop(&mut self.context) };
        loop {
            self.runtime.run_gc();
            // SAFETY: the runtime is alive and outside a collection.
            if unsafe { self.realms.free_released() } == 0 {
                break;
            }
        }
    }
}

/// Turn a failed rquickjs call into an `anyhow` error carrying whatever was
/// thrown.
pub trait CatchJsErrorExt {
    type Ok;
    fn catch(self, ctx: &Ctx<'_>) -> anyhow::Result<Self::Ok>;
}

impl<T> CatchJsErrorExt for rquickjs::Result<T> {
    type Ok = T;
    fn catch(self, ctx: &Ctx<'_>) -> anyhow::Result<T> {
        match rquickjs::CatchResultExt::catch(self, ctx) {
            Ok(s) => Ok(s),
            Err(e) => Err(anyhow::anyhow!("Runtime error: {e:#?}")),
        }
    }
}
