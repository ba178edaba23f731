use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use hashbrown::HashSet;
use rquickjs::{Ctx, Error, Exception, JsLifetime, qjs};

type RawContext = NonNull<qjs::JSContext>;

/// Every realm of a runtime, live or dropped.
///
/// A realm is usually dropped by the finalizer of the object owning it, in
/// the middle of a collection, where QuickJS must not free a context. Dropped
/// realms wait in the table until the runtime frees them outside the
/// collector.
#[derive(Clone, Default, JsLifetime)]
pub(crate) struct RealmTable(Rc<Realms>);

#[derive(Default)]
struct Realms {
    live: RefCell<HashSet<RawContext>>,
    released: RefCell<Vec<RawContext>>,
}

// Clears a realm's global object, ignoring properties that refuse.
const CLEAR_GLOBALS: &str = r#"
(function (global) {
  var keys = Reflect.ownKeys(global);
  for (var i = 0; i < keys.length; i++) {
    try { delete global[keys[i]]; } catch (e) {}
  }
})(globalThis)
"#;

impl RealmTable {
    pub(crate) fn install(ctx: &Ctx<'_>) -> anyhow::Result<Self> {
        let table = Self::default();
        let Ok(None) = ctx.store_userdata(table.clone()) else {
            anyhow::bail!("Failed to install the realm table");
        };
        Ok(table)
    }

    fn from_ctx(ctx: &Ctx<'_>) -> rquickjs::Result<Self> {
        match ctx.userdata::<Self>() {
            Some(table) => Ok(table.clone()),
            None => Err(Exception::throw_internal(ctx, "realm table not installed")),
        }
    }

    fn register(&self, raw: RawContext) {
        self.0.live.borrow_mut().insert(raw);
    }

    fn release(&self, raw: RawContext) {
        self.0.live.borrow_mut().remove(&raw);
        self.0.released.borrow_mut().push(raw);
    }

    /// Dropped realms whose context is not freed yet.
    pub(crate) fn pending(&self) -> usize {
        self.0.released.borrow().len()
    }

    /// Empties the global object of every live realm.
    ///
    /// A realm whose global reaches the object owning the realm forms a cycle
    /// the collector cannot see through. Clearing the globals at teardown lets
    /// those objects, and with them the realms, go.
    pub(crate) fn clear_live_globals(&self, _ctx: &Ctx<'_>) {
        let live: Vec<RawContext> = self.0.live.borrow().iter().copied().collect();
        for raw in live {
            // SAFETY: live realms have not been freed, and `_ctx` holds the
            // runtime for this thread.
            let realm = unsafe { Ctx::from_raw(raw) };
            if realm.eval::<(), _>(CLEAR_GLOBALS).is_err() {
                let _ = realm.catch();
                tracing::debug!("could not clear the globals of a realm");
            }
        }
    }

    /// Frees every dropped realm, including those dropped while freeing.
    /// Returns how many were freed.
    ///
    /// # Safety
    ///
    /// The runtime must be alive, not collecting and not in use by another
    /// thread.
    pub(crate) unsafe fn free_released(&self) -> usize {
        let mut freed = 0;
        loop {
            // Taken out of the cell first: freeing a context can finalize
            // objects whose realms join the queue.
            let batch = std::mem::take(&mut *self.0.released.borrow_mut());
            if batch.is_empty() {
                break;
            }
            freed += batch.len();
            for raw in batch {
                // SAFETY: releases the reference taken by `JS_NewContext`,
                // outside of any collection per the caller's contract.
                unsafe { qjs::JS_FreeContext(raw.as_ptr()) }
            }
        }
        if freed > 0 {
            tracing::debug!(freed, "realms released");
        }
        freed
    }
}

/// An isolated global environment living in the same QuickJS runtime as the
/// context that created it.
///
/// Objects move freely between realms of one runtime; what a realm isolates
/// is its global object and its copy of the built-ins. Dropping a `Realm`
/// only queues its context; the owning [`JsRuntime`](crate::JsRuntime)
/// frees it after the current call or collection.
pub struct Realm {
    raw: NonNull<qjs::JSContext>,
    builtins: Rc<[String]>,
    table: RealmTable,
}

impl Realm {
    /// Create a realm with a fresh set of built-ins next to `ctx`.
    pub fn new(ctx: &Ctx<'_>) -> rquickjs::Result<Self> {
        let table = RealmTable::from_ctx(ctx)?;
        // SAFETY: `ctx` proves the runtime lock is held, so the runtime
        // pointer is live and no other thread is inside it.
        let raw = unsafe {
            let rt = qjs::JS_GetRuntime(ctx.as_raw().as_ptr());
            qjs::JS_NewContext(rt)
        };
        let raw = NonNull::new(raw).ok_or(Error::Allocation)?;
        table.register(raw);
        let mut realm = Self {
            raw,
            builtins: Rc::from(Vec::new()),
            table,
        };
        let names: Vec<String> = realm
            .enter(ctx)
            .eval("Object.getOwnPropertyNames(globalThis)")?;
        realm.builtins = names.into();
        tracing::debug!(builtins = realm.builtins.len(), "realm created");
        Ok(realm)
    }

    /// A handle on this realm usable for as long as the caller's `ctx`.
    pub fn enter<'js>(&self, _ctx: &Ctx<'js>) -> Ctx<'js> {
        // SAFETY: the realm belongs to the runtime `_ctx` is locked on and
        // `from_raw` takes its own reference, so the returned `Ctx` stays valid
        // even if `self` is dropped first.
        unsafe { Ctx::from_raw(self.raw) }
    }

    /// Own property names of the realm's global object when it was created.
    pub fn builtins(&self) -> &[String] {
        &self.builtins
    }

    pub fn shared_builtins(&self) -> Rc<[String]> {
        self.builtins.clone()
    }
}

impl Drop for Realm {
    fn drop(&mut self) {
        self.table.release(self.raw);
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("builtins", &self.builtins.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsRuntime, RuntimeConfig};

    fn pending(ctx: &Ctx<'_>) -> usize {
        RealmTable::from_ctx(ctx).unwrap().pending()
    }

    #[test]
    fn dropped_realms_are_freed_after_the_call() {
        let rt = JsRuntime::new(RuntimeConfig::default()).unwrap();
        rt.with(|ctx| {
            let realm = Realm::new(&ctx).unwrap();
            let inner = realm.enter(&ctx);
            drop(realm);
            assert_eq!(pending(&ctx), 1);
            // The entered handle holds its own reference.
            assert_eq!(inner.eval::<i32, _>("1 + 1").unwrap(), 2);
        });
        rt.with(|ctx| assert_eq!(pending(&ctx), 0));
    }
}
