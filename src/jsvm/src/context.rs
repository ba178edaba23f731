use std::rc::Rc;

use jsvm_runtime::Realm;
use rquickjs::{Ctx, Object, Value};
use tracing::{Level, instrument};

use crate::metrics::ContextMetricsGuard;
use crate::object_wrap::{ObjectWrap, Wrappable};
use crate::{Result, VmError};

/// The native side of a context object: an isolated global environment.
///
/// The realm lives as long as the object wrapping this handle, or as long as
/// script code created in the realm is still reachable.
#[derive(Debug)]
pub struct ContextHandle {
    realm: Realm,
    _metrics: ContextMetricsGuard,
}

impl Wrappable for ContextHandle {
    const CLASS_NAME: &'static str = "Context";
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        tracing::debug!("context finalized");
    }
}

/// A realm entered on the caller's behalf.
pub struct Environment<'js> {
    /// Runs code with the realm's global object as scope.
    pub ctx: Ctx<'js>,
    /// Own global property names the realm started with.
    pub builtins: Rc<[String]>,
}

impl ContextHandle {
    /// Creates a new context object, backed by a fresh realm.
    #[instrument(skip_all, level = Level::DEBUG)]
    pub fn create<'js>(ctx: &Ctx<'js>) -> Result<Object<'js>> {
        let object = ObjectWrap::<Self>::new_instance(ctx)?;
        Self::attach(ctx, &object)?;
        Ok(object)
    }

    /// Gives `object`, an instance of the context class, a fresh realm.
    pub(crate) fn attach(ctx: &Ctx<'_>, object: &Object<'_>) -> Result<()> {
        let realm = Realm::new(ctx).map_err(|e| VmError::from_js(ctx, e))?;
        let handle = Self {
            realm,
            _metrics: ContextMetricsGuard::new(),
        };
        ObjectWrap::wrap(object, handle)?;
        tracing::debug!("context created");
        Ok(())
    }

    /// Whether `value` is a context object created by [`create`](Self::create).
    pub fn is_instance(value: &Value<'_>) -> bool {
        ObjectWrap::<Self>::is_wrapped(value)
    }

    /// Enters the realm behind the context object `value`.
    pub fn environment<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<Environment<'js>> {
        ObjectWrap::<Self>::unwrap(value, |handle| Environment {
            ctx: handle.realm.enter(ctx),
            builtins: handle.realm.shared_builtins(),
        })
    }
}
