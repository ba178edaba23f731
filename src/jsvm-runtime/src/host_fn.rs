use std::rc::Rc;

use anyhow::Context as _;
use rquickjs::object::Property;
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Exception, Function, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::utils;

/// Rust doesn't have a great way to specify lifetimes in closures,
/// See: https://github.com/rust-lang/rust/issues/97362
///
/// This function coerces a closure so that the returned `Value<'_>` shares the
/// lifetime of the `Ctx<'_>` argument.
fn coerce_fn_signature<F, E>(f: F) -> F
where
    F: for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> Result<Value<'js>, E>,
{
    f
}

/// A Rust closure callable from script land.
///
/// Host functions can be built from closures over rquickjs types, over JSON
/// strings or over any `serde` types, and all report their errors to scripts
/// the same way: an `anyhow` error becomes a thrown `InternalError` unless it
/// already carries a pending JavaScript exception.
#[derive(Clone)]
pub struct HostFunction {
    #[allow(clippy::type_complexity)]
    func: Rc<dyn for<'js> Fn(&Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>>>,
}

impl HostFunction {
    /// Create a new `HostFunction` from a closure using rquickjs types directly.
    pub fn new(
        func: impl for<'js> Fn(&Ctx<'js>, Rest<Value<'js>>) -> anyhow::Result<Value<'js>> + 'static,
    ) -> Self {
        Self {
            func: Rc::new(
                move |ctx: &Ctx, args: Rest<Value>| -> rquickjs::Result<Value> {
                    func(ctx, args).map_err(|e| match e.downcast::<rquickjs::Error>() {
                        Ok(e) => e,
                        Err(e) => {
                            Exception::throw_internal(ctx, &format!("Host function error: {e:#}"))
                        }
                    })
                },
            ),
        }
    }

    /// Create a new `HostFunction` from a closure that takes the arguments as a
    /// JSON array and returns its result as JSON.
    pub fn new_json(func: impl Fn(String) -> anyhow::Result<String> + 'static) -> Self {
        Self::new(
            move |ctx: &Ctx, args: Rest<Value>| -> anyhow::Result<Value> {
                let args = utils::stringify(ctx, args.into_inner())
                    .context("Serializing host function arguments")?;
                let res = func(args).context("Calling host function")?;
                ctx.json_parse(res).context("Parsing host function result")
            },
        )
    }

    /// Create a new `HostFunction` from a closure that takes and returns any
    /// type that can be (de)serialized by `serde`. The arguments are
    /// deserialized as a tuple.
    pub fn new_serde<Args: DeserializeOwned, Output: Serialize>(
        func: impl fn_traits::Fn<Args, Output = anyhow::Result<Output>> + 'static,
    ) -> Self {
        Self::new_json(move |args: String| -> anyhow::Result<String> {
            let args: Args =
                serde_json::from_str(&args).context("Deserializing arguments for host function")?;
            let output: Output = func.call(args)?;
            let output =
                serde_json::to_string(&output).context("Serializing output of host function")?;
            Ok(output)
        })
    }

    pub fn call<'js>(
        &self,
        ctx: &Ctx<'js>,
        args: Rest<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        (self.func)(ctx, args)
    }

    /// Define the function as a non-enumerable global named `name` of the
    /// realm `ctx` belongs to.
    pub fn install(&self, ctx: &Ctx<'_>, name: &str) -> rquickjs::Result<()> {
        let this = self.clone();
        let func = coerce_fn_signature(move |ctx, args| this.call(&ctx, args));
        let func = Function::new(ctx.clone(), func)?.with_name(name)?;
        ctx.globals()
            .prop(name, Property::from(func).writable().configurable())
    }
}
