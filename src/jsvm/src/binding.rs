//! Script-land access to contexts and scripts.
//!
//! [`install`] defines two constructors on an object, usually a global:
//!
//! - `Context`, whose instances are context objects;
//! - `NodeScript`, with the `createContext`, `runInContext`,
//!   `runInThisContext` and `runInNewContext` methods on its prototype
//!   (running the script object) and as statics (compiling their first
//!   argument and running it).
//!
//! Every function forwards to the same entry points the Rust API uses. Errors
//! come back as script exceptions via [`EvalError::throw`].

use rquickjs::function::Constructor;
use rquickjs::object::Property;
use rquickjs::prelude::{Rest, This};
use rquickjs::{Ctx, Function, Object, Value};
use tracing::{Level, instrument};

use crate::context::ContextHandle;
use crate::eval::{self, EvalConfig};
use crate::object_wrap::ObjectWrap;
use crate::script::CompiledScript;
use crate::EvalError;

type Binding =
    for<'js> fn(Ctx<'js>, This<Value<'js>>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>>;

/// Defines `Context` and `NodeScript` on `target`.
#[instrument(skip_all, level=Level::DEBUG)]
pub fn install<'js>(ctx: &Ctx<'js>, target: &Object<'js>) -> rquickjs::Result<()> {
    let context =
        Constructor::new_class::<ObjectWrap<ContextHandle>, _, _>(ctx.clone(), construct_context)?;
    target.prop("Context", Property::from(context).writable().configurable())?;

    let script =
        Constructor::new_class::<ObjectWrap<CompiledScript>, _, _>(ctx.clone(), construct_script)?;
    let statics: [(&str, Binding); 4] = [
        ("createContext", create_context),
        ("runInContext", compile_run_in_context),
        ("runInThisContext", compile_run_in_this_context),
        ("runInNewContext", compile_run_in_new_context),
    ];
    define_functions(ctx, &script, statics)?;

    target.prop("NodeScript", Property::from(script).writable().configurable())
}

/// The prototype of script objects: the methods that run the receiver.
pub(crate) fn script_prototype<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    let prototype = Object::new(ctx.clone())?;
    let methods: [(&str, Binding); 4] = [
        ("createContext", create_context),
        ("runInContext", run_in_context),
        ("runInThisContext", run_in_this_context),
        ("runInNewContext", run_in_new_context),
    ];
    define_functions(ctx, &prototype, methods)?;
    Ok(prototype)
}

fn define_functions<'js, const N: usize>(
    ctx: &Ctx<'js>,
    target: &Object<'js>,
    functions: [(&str, Binding); N],
) -> rquickjs::Result<()> {
    for (name, func) in functions {
        let function = Function::new(ctx.clone(), func)?.with_name(name)?;
        target.prop(name, Property::from(function).writable().configurable())?;
    }
    Ok(())
}

fn construct_context<'js>(ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
    ContextHandle::create(&ctx)
        .map(Object::into_value)
        .map_err(|e| EvalError::from(e).throw(&ctx))
}

fn construct_script<'js>(ctx: Ctx<'js>, args: Rest<Value<'js>>) -> rquickjs::Result<Value<'js>> {
    eval::new_script(&ctx, &args.0)
        .map(Object::into_value)
        .map_err(|e| e.throw(&ctx))
}

fn create_context<'js>(
    ctx: Ctx<'js>,
    _this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    eval::create_context(&ctx, args.0.first())
        .map(Object::into_value)
        .map_err(|e| e.throw(&ctx))
}

fn forward<'js>(
    ctx: Ctx<'js>,
    config: EvalConfig,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    eval::eval_machine(&ctx, config, &this.0, &args.0).map_err(|e| e.throw(&ctx))
}

fn run_in_context<'js>(
    ctx: Ctx<'js>,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    forward(ctx, EvalConfig::RUN_IN_CONTEXT, this, args)
}

fn run_in_this_context<'js>(
    ctx: Ctx<'js>,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    forward(ctx, EvalConfig::RUN_IN_THIS_CONTEXT, this, args)
}

fn run_in_new_context<'js>(
    ctx: Ctx<'js>,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    forward(ctx, EvalConfig::RUN_IN_NEW_CONTEXT, this, args)
}

fn compile_run_in_context<'js>(
    ctx: Ctx<'js>,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    forward(ctx, EvalConfig::COMPILE_RUN_IN_CONTEXT, this, args)
}

fn compile_run_in_this_context<'js>(
    ctx: Ctx<'js>,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    forward(ctx, EvalConfig::COMPILE_RUN_IN_THIS_CONTEXT, this, args)
}

fn compile_run_in_new_context<'js>(
    ctx: Ctx<'js>,
    this: This<Value<'js>>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    forward(ctx, EvalConfig::COMPILE_RUN_IN_NEW_CONTEXT, this, args)
}
