use std::cell::{Cell, RefCell};

use hashbrown::HashMap;
use rquickjs::{Ctx, Exception, JsLifetime, Object, Persistent};

/// Identifies an object held by the [`Roots`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootKey(u64);

/// Strong references to objects the host wants kept alive across calls into
/// the runtime. Stored as runtime userdata by [`JsRuntime`](crate::JsRuntime),
/// which empties it before the QuickJS runtime is freed.
#[derive(Default, JsLifetime)]
pub struct Roots {
    next: Cell<u64>,
    table: RefCell<HashMap<u64, Persistent<Object<'static>>>>,
}

impl Roots {
    pub(crate) fn install(ctx: &Ctx<'_>) -> anyhow::Result<()> {
        anyhow::ensure!(ctx.userdata::<Self>().is_none(), "Roots is already installed");
        let Ok(None) = ctx.store_userdata(Self::default()) else {
            anyhow::bail!("Failed to install Roots");
        };
        Ok(())
    }

    /// Keep `object` alive until the returned key is removed.
    pub fn insert<'js>(ctx: &Ctx<'js>, object: Object<'js>) -> rquickjs::Result<RootKey> {
        let persistent = Persistent::save(ctx, object);
        Self::with(ctx, |roots| {
            let key = roots.next.get();
            roots.next.set(key + 1);
            roots.table.borrow_mut().insert(key, persistent);
            RootKey(key)
        })
    }

    /// The object behind `key`, if it is still rooted.
    pub fn restore<'js>(ctx: &Ctx<'js>, key: RootKey) -> rquickjs::Result<Option<Object<'js>>> {
        let persistent = Self::with(ctx, |roots| roots.table.borrow().get(&key.0).cloned())?;
        persistent.map(|p| p.restore(ctx)).transpose()
    }

    /// Drop the strong reference behind `key`. Returns whether it existed.
    pub fn remove(ctx: &Ctx<'_>, key: RootKey) -> rquickjs::Result<bool> {
        // Released outside the borrow: the last reference going away may run
        // finalizers that reach back into the table.
        let removed = Self::with(ctx, |roots| roots.table.borrow_mut().remove(&key.0))?;
        Ok(removed.is_some())
    }

    pub fn len(ctx: &Ctx<'_>) -> rquickjs::Result<usize> {
        Self::with(ctx, |roots| roots.table.borrow().len())
    }

    pub(crate) fn clear(ctx: &Ctx<'_>) {
        let Some(roots) = ctx.userdata::<Self>() else {
            return;
        };
        let drained: Vec<_> = roots.table.borrow_mut().drain().collect();
        drop(roots);
        tracing::debug!(count = drained.len(), "releasing rooted objects");
        drop(drained);
    }

    fn with<R>(ctx: &Ctx<'_>, f: impl FnOnce(&Self) -> R) -> rquickjs::Result<R> {
        match ctx.userdata::<Self>() {
            Some(roots) => Ok(f(&roots)),
            None => Err(Exception::throw_internal(ctx, "root table not installed")),
        }
    }
}
