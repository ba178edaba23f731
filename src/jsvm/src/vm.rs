use std::fmt;
use std::marker::PhantomData;

use jsvm_runtime::{InterruptHandle, JsRuntime, RootKey, Roots, utils};
use rquickjs::{Ctx, IntoJs, Object, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Level, instrument};

use crate::context::ContextHandle;
use crate::eval::{self, EvalConfig};
use crate::object_wrap::{ObjectWrap, Wrappable};
use crate::script::CompiledScript;
use crate::{Result, VmError, new_error};

/// Per-call options of the `run_*` entry points.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    filename: Option<String>,
    timeout_ms: Option<u32>,
    display_errors: bool,
}

impl RunOptions {
    /// Options with every value at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// The name compile errors and stack locations report. Defaults to
    /// `evalmachine.<anonymous>`.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Terminate the script after `timeout_ms` milliseconds. `0` disables the
    /// deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Print the offending source line of a compile or runtime error to
    /// stderr before returning it.
    pub fn with_display_errors(mut self, display_errors: bool) -> Self {
        self.display_errors = display_errors;
        self
    }

    /// The trailing positional arguments: filename, timeout, display flag.
    fn args<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<[Value<'js>; 3]> {
        Ok([
            self.filename.as_deref().into_js(ctx)?,
            self.timeout_ms.into_js(ctx)?,
            self.display_errors.into_js(ctx)?,
        ])
    }
}

/// A context or script object the host keeps alive.
///
/// The object stays pinned until the handle is passed to [`Vm::release`] or
/// the `Vm` is dropped, whichever comes first.
pub struct Pinned<T: Wrappable> {
    key: RootKey,
    _native: PhantomData<fn() -> T>,
}

impl<T: Wrappable> Pinned<T> {
    fn new(key: RootKey) -> Self {
        Self {
            key,
            _native: PhantomData,
        }
    }

    /// The pinned object, for use inside [`Vm::with`].
    pub fn object<'js>(&self, ctx: &Ctx<'js>) -> Result<Object<'js>> {
        restore(ctx, self.key)
    }
}

impl<T: Wrappable> fmt::Debug for Pinned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(T::CLASS_NAME).field(&self.key).finish()
    }
}

/// A context object held by the host.
pub type ContextRef = Pinned<ContextHandle>;
/// A script object held by the host.
pub type ScriptRef = Pinned<CompiledScript>;

/// The objects a single host call passes to the evaluation engine, in
/// argument order.
#[derive(Default)]
struct Call<'a> {
    script: Option<RootKey>,
    code: Option<&'a str>,
    context: Option<RootKey>,
    sandbox: Option<serde_json::Value>,
}

/// A QuickJS runtime together with the context and script entry points.
///
/// Values cross into and out of the runtime through `serde`: sandboxes are
/// serialized into fresh objects, and results and sandboxes are read back
/// into any deserializable type. Use [`with`](Self::with) to work with script
/// values directly.
pub struct Vm {
    runtime: JsRuntime,
}

impl Vm {
    pub(crate) fn new(runtime: JsRuntime) -> Self {
        Self { runtime }
    }

    /// Runs `f` inside the main realm.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        self.runtime.with(f)
    }

    /// A handle that can terminate running scripts from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.runtime.interrupt_handle()
    }

    /// Registers a global function in the main realm. Arguments arrive as a
    /// deserialized tuple and the result is serialized back.
    pub fn register_host_function<Args, Output>(
        &mut self,
        name: &str,
        function: impl fn_traits::Fn<Args, Output = anyhow::Result<Output>> + 'static,
    ) -> Result<()>
    where
        Args: DeserializeOwned,
        Output: Serialize,
    {
        Ok(self.runtime.register_host_function(name, function)?)
    }

    /// Creates a context object, seeded with the fields of `sandbox`, which
    /// must serialize to a JSON object.
    pub fn create_context<S: Serialize + ?Sized>(
        &mut self,
        sandbox: Option<&S>,
    ) -> Result<ContextRef> {
        let sandbox = sandbox.map(sandbox_json).transpose()?;
        self.runtime.with(|ctx| {
            let sandbox = match &sandbox {
                Some(json) => Some(sandbox_object(&ctx, json)?.into_value()),
                None => None,
            };
            let context = eval::create_context(&ctx, sandbox.as_ref())
                .map_err(|e| e.into_vm_error(&ctx))?;
            ObjectWrap::<ContextHandle>::pin(&context).map(Pinned::new)
        })
    }

    /// Reads the own properties of a context object, which reflect the
    /// globals scripts left in it.
    pub fn read_context<T: DeserializeOwned>(&mut self, context: &ContextRef) -> Result<T> {
        self.runtime.with(|ctx| {
            let object = context.object(&ctx)?;
            Ok(utils::from_js(&ctx, object.into_value())?)
        })
    }

    /// Compiles `code` into a script object that can be run any number of
    /// times, in any context.
    #[instrument(skip(self, code), level=Level::DEBUG)]
    pub fn new_script(&mut self, code: &str, filename: Option<&str>) -> Result<ScriptRef> {
        self.runtime.with(|ctx| {
            let mut args = vec![code.into_js(&ctx).map_err(|e| VmError::from_js(&ctx, e))?];
            if let Some(filename) = filename {
                args.push(filename.into_js(&ctx).map_err(|e| VmError::from_js(&ctx, e))?);
            }
            let script = eval::new_script(&ctx, &args).map_err(|e| e.into_vm_error(&ctx))?;
            ObjectWrap::<CompiledScript>::pin(&script).map(Pinned::new)
        })
    }

    /// Compiles and runs `code` in the main realm.
    pub fn run_in_this_context<T: DeserializeOwned>(
        &mut self,
        code: &str,
        options: &RunOptions,
    ) -> Result<T> {
        let call = Call {
            code: Some(code),
            ..Default::default()
        };
        self.call(EvalConfig::COMPILE_RUN_IN_THIS_CONTEXT, call, options)
            .map(|(result, _)| result)
    }

    /// Compiles and runs `code` in a fresh context seeded from `sandbox`.
    /// When the script succeeds, the globals it leaves behind are read back
    /// into `sandbox`.
    pub fn run_in_new_context<T, S>(
        &mut self,
        code: &str,
        sandbox: &mut S,
        options: &RunOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        S: Serialize + DeserializeOwned,
    {
        let call = Call {
            code: Some(code),
            sandbox: Some(sandbox_json(sandbox)?),
            ..Default::default()
        };
        let (result, after) = self.call(EvalConfig::COMPILE_RUN_IN_NEW_CONTEXT, call, options)?;
        write_back(sandbox, after)?;
        Ok(result)
    }

    /// Compiles and runs `code` in the realm of `context`.
    pub fn run_in_context<T: DeserializeOwned>(
        &mut self,
        code: &str,
        context: &ContextRef,
        options: &RunOptions,
    ) -> Result<T> {
        let call = Call {
            code: Some(code),
            context: Some(context.key),
            ..Default::default()
        };
        self.call(EvalConfig::COMPILE_RUN_IN_CONTEXT, call, options)
            .map(|(result, _)| result)
    }

    /// Runs a script object in the main realm.
    pub fn run_script_in_this_context<T: DeserializeOwned>(
        &mut self,
        script: &ScriptRef,
        options: &RunOptions,
    ) -> Result<T> {
        let call = Call {
            script: Some(script.key),
            ..Default::default()
        };
        self.call(EvalConfig::RUN_IN_THIS_CONTEXT, call, options)
            .map(|(result, _)| result)
    }

    /// Runs a script object in a fresh context seeded from `sandbox`, reading
    /// the globals back into `sandbox` when it succeeds.
    pub fn run_script_in_new_context<T, S>(
        &mut self,
        script: &ScriptRef,
        sandbox: &mut S,
        options: &RunOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        S: Serialize + DeserializeOwned,
    {
        let call = Call {
            script: Some(script.key),
            sandbox: Some(sandbox_json(sandbox)?),
            ..Default::default()
        };
        let (result, after) = self.call(EvalConfig::RUN_IN_NEW_CONTEXT, call, options)?;
        write_back(sandbox, after)?;
        Ok(result)
    }

    /// Runs a script object in the realm of `context`.
    pub fn run_script_in_context<T: DeserializeOwned>(
        &mut self,
        script: &ScriptRef,
        context: &ContextRef,
        options: &RunOptions,
    ) -> Result<T> {
        let call = Call {
            script: Some(script.key),
            context: Some(context.key),
            ..Default::default()
        };
        self.call(EvalConfig::RUN_IN_CONTEXT, call, options)
            .map(|(result, _)| result)
    }

    /// Unpins a context or script object. Once nothing in script land refers
    /// to it either, the collector finalizes it.
    pub fn release<T: Wrappable>(&mut self, handle: Pinned<T>) -> Result<()> {
        self.runtime.with(|ctx| {
            let object = handle.object(&ctx)?;
            ObjectWrap::<T>::unpin(&object)
        })
    }

    /// Collects unreachable objects, finalizing wrapped native values and
    /// dropping contexts nobody refers to any more.
    pub fn collect_garbage(&mut self) {
        self.runtime.run_gc();
    }

    fn call<T: DeserializeOwned>(
        &mut self,
        config: EvalConfig,
        call: Call<'_>,
        options: &RunOptions,
    ) -> Result<(T, Option<serde_json::Value>)> {
        self.runtime.with(|ctx| {
            let js = |e| VmError::from_js(&ctx, e);
            let receiver = match call.script {
                Some(key) => restore(&ctx, key)?.into_value(),
                None => Value::new_undefined(ctx.clone()),
            };
            let mut args = Vec::with_capacity(5);
            if let Some(code) = call.code {
                args.push(code.into_js(&ctx).map_err(js)?);
            }
            if let Some(key) = call.context {
                args.push(restore(&ctx, key)?.into_value());
            }
            let sandbox = match &call.sandbox {
                Some(json) => Some(sandbox_object(&ctx, json)?),
                None => None,
            };
            if let Some(sandbox) = &sandbox {
                args.push(sandbox.clone().into_value());
            }
            args.extend(options.args(&ctx).map_err(js)?);

            let value = eval::eval_machine(&ctx, config, &receiver, &args)
                .map_err(|e| e.into_vm_error(&ctx))?;
            let result: T = utils::from_js(&ctx, value)?;
            let sandbox = match sandbox {
                Some(sandbox) => Some(utils::from_js(&ctx, sandbox.into_value())?),
                None => None,
            };
            Ok((result, sandbox))
        })
    }
}

fn restore<'js>(ctx: &Ctx<'js>, key: RootKey) -> Result<Object<'js>> {
    Roots::restore(ctx, key)
        .map_err(|e| VmError::from_js(ctx, e))?
        .ok_or_else(|| new_error!("{:?} is not pinned in this vm", key))
}

fn sandbox_json<S: Serialize + ?Sized>(sandbox: &S) -> Result<serde_json::Value> {
    let json =
        serde_json::to_value(sandbox).map_err(|e| new_error!("serializing sandbox: {}", e))?;
    if !json.is_object() {
        return Err(new_error!("a sandbox must serialize to a JSON object"));
    }
    Ok(json)
}

fn sandbox_object<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> Result<Object<'js>> {
    utils::to_js(ctx, json)?
        .into_object()
        .ok_or_else(|| new_error!("a sandbox must serialize to a JSON object"))
}

fn write_back<S: DeserializeOwned>(sandbox: &mut S, after: Option<serde_json::Value>) -> Result<()> {
    if let Some(after) = after {
        *sandbox =
            serde_json::from_value(after).map_err(|e| new_error!("deserializing sandbox: {}", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::VmBuilder;

    fn vm() -> Vm {
        VmBuilder::new().with_console_output(false).build().unwrap()
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        count: u32,
        label: String,
    }

    #[test]
    fn sandboxes_round_trip_through_serde() {
        let mut vm = vm();
        let mut sandbox = Counter {
            count: 1,
            label: "a".into(),
        };
        let () = vm
            .run_in_new_context("count += 1; label += 'b'; undefined", &mut sandbox, &RunOptions::new())
            .unwrap();
        assert_eq!(
            sandbox,
            Counter {
                count: 2,
                label: "ab".into()
            }
        );
    }

    #[test]
    fn sandboxes_must_be_objects() {
        let mut vm = vm();
        let err = vm
            .run_in_new_context::<(), _>("1", &mut vec![1, 2], &RunOptions::new())
            .unwrap_err();
        assert!(matches!(err, VmError::Engine(_)));
        assert!(vm.create_context(Some("text")).is_err());
    }

    #[test]
    fn options_fill_the_trailing_arguments() {
        vm().with(|ctx| {
            let options = RunOptions::new().with_filename("a.js").with_timeout_ms(5);
            let [filename, timeout, display] = options.args(&ctx).unwrap();
            assert_eq!(filename.as_string().unwrap().to_string().unwrap(), "a.js");
            assert_eq!(timeout.as_number(), Some(5.0));
            assert_eq!(display.as_bool(), Some(false));

            let [filename, timeout, _] = RunOptions::new().args(&ctx).unwrap();
            assert!(filename.is_undefined());
            assert!(timeout.is_undefined());
        });
    }

    #[test]
    fn released_handles_let_objects_go() {
        let mut vm = vm();
        let context = vm.create_context(Some(&serde_json::json!({ "a": 1 }))).unwrap();
        let seen: serde_json::Value = vm.read_context(&context).unwrap();
        assert_eq!(seen, serde_json::json!({ "a": 1 }));
        vm.release(context).unwrap();
        vm.with(|ctx| assert_eq!(Roots::len(&ctx).unwrap(), 0));
    }
}
