use jsvm_runtime::{RootKey, Roots};
use rquickjs::{Ctx, Function, JsLifetime, Object};

// The intrinsics are captured once, when the runtime is built, so scripts
// that later replace `Object.*` or array methods in any realm do not reach
// into the copy.
const CLONE_PROPERTIES: &str = r#"
(function (getOwnPropertyNames, getOwnPropertyDescriptor, defineProperty, create, hasOwn) {
  return function cloneProperties(source, target, skip) {
    var skipped = null;
    if (skip) {
      skipped = create(null);
      for (var i = 0; i < skip.length; i++) skipped[skip[i]] = true;
    }
    var keys = getOwnPropertyNames(source);
    for (var j = 0; j < keys.length; j++) {
      var key = keys[j];
      if (skipped !== null && skipped[key] === true && !hasOwn(target, key)) continue;
      try {
        var desc = getOwnPropertyDescriptor(source, key);
        if (desc.value === source) desc.value = target;
        defineProperty(target, key, desc);
      } catch (e) {}
    }
  };
})(
  Object.getOwnPropertyNames,
  Object.getOwnPropertyDescriptor,
  Object.defineProperty,
  Object.create,
  Function.prototype.call.bind(Object.prototype.hasOwnProperty)
)
"#;

/// The compiled cloner of a runtime, rooted so it lives as long as the
/// runtime does.
#[derive(JsLifetime)]
struct Cloner(RootKey);

/// Compiles the cloner for the runtime behind `ctx`, once.
///
/// Should run before any script does; until then the cloner is compiled on
/// first use in whichever realm needs it.
pub(crate) fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    cloner(ctx).map(drop)
}

fn cloner<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Function<'js>> {
    let key = ctx.userdata::<Cloner>().map(|cloner| cloner.0);
    if let Some(key) = key {
        let cached = Roots::restore(ctx, key)?.and_then(|object| object.into_value().into_function());
        if let Some(function) = cached {
            return Ok(function);
        }
    }
    let function: Function = ctx.eval(CLONE_PROPERTIES)?;
    let object: &Object = &function;
    let key = Roots::insert(ctx, object.clone())?;
    if ctx.store_userdata(Cloner(key)).is_err() {
        return Err(rquickjs::Exception::throw_internal(ctx, "cloner userdata is in use"));
    }
    tracing::debug!("property cloner compiled");
    Ok(function)
}

/// Copies every own string-keyed property of `source` onto `target`,
/// descriptors and all.
///
/// A data property whose value is `source` itself is copied as `target`, so
/// back-references such as `sandbox.self = sandbox` keep pointing at the
/// object they live on. Properties the target refuses (non-configurable,
/// non-extensible) are skipped.
///
/// Names in `skip` are left out unless `target` already owns them; this
/// keeps a realm's built-ins off the sandbox when copying a global object
/// back.
pub(crate) fn clone_properties<'js>(
    ctx: &Ctx<'js>,
    source: &Object<'js>,
    target: &Object<'js>,
    skip: Option<&[String]>,
) -> rquickjs::Result<()> {
    let clone = cloner(ctx)?;
    clone.call((source.clone(), target.clone(), skip.map(<[String]>::to_vec)))
}
