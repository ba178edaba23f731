//! Binding native resources to script objects.
//!
//! Every [`Wrappable`] type gets its own QuickJS class whose instances carry
//! an [`ObjectWrap`] slot. The slot starts empty, receives the native value
//! once through [`ObjectWrap::wrap`] and gives it up only when QuickJS
//! finalizes the object, so the collector alone decides when the native value
//! dies. Pinning roots the object on the host side and keeps both alive no
//! matter what the script does with it.

use std::any::type_name;

use jsvm_runtime::{RootKey, Roots};
use rquickjs::class::{JsClass, Trace, Tracer, Writable};
use rquickjs::function::Constructor;
use rquickjs::{Class, Ctx, JsLifetime, Object, Value};

use crate::{ErrorKind, Result, VmError, new_error};

/// A native type that can be attached to a script object.
pub trait Wrappable: Sized + 'static {
    /// The script-land name of the class instances of this type belong to.
    const CLASS_NAME: &'static str;

    /// The prototype shared by all instances of the class. Created once per
    /// runtime, by whichever realm first needs it.
    fn prototype<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
        Object::new(ctx.clone())
    }
}

/// The native slot of a wrapped object.
pub struct ObjectWrap<T: Wrappable> {
    native: Option<T>,
    refs: u32,
    root: Option<RootKey>,
}

// SAFETY: the slot holds no values tied to a `'js` lifetime.
unsafe impl<'js, T: Wrappable> JsLifetime<'js> for ObjectWrap<T> {
    type Changed<'to> = ObjectWrap<T>;
}

// Native values never hold script values, so there is nothing to trace.
impl<'js, T: Wrappable> Trace<'js> for ObjectWrap<T> {
    fn trace<'a>(&self, _tracer: Tracer<'a, 'js>) {}
}

impl<'js, T: Wrappable> JsClass<'js> for ObjectWrap<T> {
    const NAME: &'static str = T::CLASS_NAME;

    type Mutable = Writable;

    fn prototype(ctx: &Ctx<'js>) -> rquickjs::Result<Option<Object<'js>>> {
        T::prototype(ctx).map(Some)
    }

    fn constructor(_ctx: &Ctx<'js>) -> rquickjs::Result<Option<Constructor<'js>>> {
        Ok(None)
    }
}

impl<T: Wrappable> Drop for ObjectWrap<T> {
    fn drop(&mut self) {
        if self.native.take().is_some() {
            tracing::trace!(
                class = T::CLASS_NAME,
                native = type_name::<T>(),
                refs = self.refs,
                "finalized"
            );
        }
    }
}

impl<T: Wrappable> ObjectWrap<T> {
    /// A new instance of `T`'s class with an empty slot.
    pub fn new_instance<'js>(ctx: &Ctx<'js>) -> Result<Object<'js>> {
        let empty = Self {
            native: None,
            refs: 0,
            root: None,
        };
        Class::instance(ctx.clone(), empty)
            .map(Class::into_inner)
            .map_err(|e| VmError::from_js(ctx, e))
    }

    /// Attaches `native` to `object` and hands its lifetime to the collector.
    ///
    /// Fails if the object already carries native data or cannot carry any
    /// (only instances of `T`'s class have a slot). On failure `native` is
    /// dropped and the object is left as it was.
    pub fn wrap(object: &Object<'_>, native: T) -> Result<()> {
        let class = Self::class_of(object)
            .ok_or_else(|| new_error!("object is not a {} instance", T::CLASS_NAME))?;
        let mut wrap = class
            .try_borrow_mut()
            .map_err(|e| new_error!("{} slot is in use: {e}", T::CLASS_NAME))?;
        if wrap.native.is_some() {
            return Err(new_error!("{} object is already wrapped", T::CLASS_NAME));
        }
        wrap.native = Some(native);
        tracing::trace!(class = T::CLASS_NAME, native = type_name::<T>(), "wrapped");
        Ok(())
    }

    /// Whether `value` is an object carrying a `T`.
    pub fn is_wrapped(value: &Value<'_>) -> bool {
        value
            .as_object()
            .and_then(Self::class_of)
            .and_then(|class| class.try_borrow().ok().map(|wrap| wrap.native.is_some()))
            .unwrap_or(false)
    }

    /// Runs `f` on the native value attached to `value`, or returns `None`
    /// if `value` is not an object wrapping a `T`.
    pub fn get<R>(value: &Value<'_>, f: impl FnOnce(&T) -> R) -> Option<R> {
        let class = Self::class_of(value.as_object()?)?;
        let wrap = class.try_borrow().ok()?;
        wrap.native.as_ref().map(f)
    }

    /// Like [`get`](Self::get), but a missing attachment is a usage error.
    ///
    /// Every call on the same object sees the same native value.
    pub fn unwrap<R>(value: &Value<'_>, f: impl FnOnce(&T) -> R) -> Result<R> {
        Self::get(value, f).ok_or_else(not_wrapped::<T>)
    }

    /// Mutable access to the native value, with the same failure as
    /// [`unwrap`](Self::unwrap).
    pub fn unwrap_mut<R>(value: &Value<'_>, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let class = value
            .as_object()
            .and_then(Self::class_of)
            .ok_or_else(not_wrapped::<T>)?;
        let mut wrap = class
            .try_borrow_mut()
            .map_err(|e| new_error!("{} slot is in use: {e}", T::CLASS_NAME))?;
        wrap.native.as_mut().map(f).ok_or_else(not_wrapped::<T>)
    }

    /// Keeps the object and its native value alive regardless of
    /// reachability until a matching [`unpin`](Self::unpin). Returns the key
    /// the object is rooted under, the same for every pin of one object.
    pub fn pin(object: &Object<'_>) -> Result<RootKey> {
        let ctx = object.ctx();
        let class = Self::class_of(object).ok_or_else(not_wrapped::<T>)?;
        let existing = {
            let wrap = class
                .try_borrow()
                .map_err(|e| new_error!("{} slot is in use: {e}", T::CLASS_NAME))?;
            if wrap.native.is_none() {
                return Err(not_wrapped::<T>());
            }
            wrap.root
        };
        let key = match existing {
            Some(key) => key,
            None => Roots::insert(ctx, object.clone()).map_err(|e| VmError::from_js(ctx, e))?,
        };
        let mut wrap = match class.try_borrow_mut() {
            Ok(wrap) => wrap,
            Err(e) => {
                if existing.is_none() {
                    let _ = Roots::remove(ctx, key);
                }
                return Err(new_error!("{} slot is in use: {e}", T::CLASS_NAME));
            }
        };
        wrap.refs += 1;
        wrap.root = Some(key);
        Ok(key)
    }

    /// Undoes one [`pin`](Self::pin). When the count reaches zero the object
    /// is left to the collector again.
    pub fn unpin(object: &Object<'_>) -> Result<()> {
        let ctx = object.ctx();
        let class = Self::class_of(object).ok_or_else(not_wrapped::<T>)?;
        let released = {
            let mut wrap = class
                .try_borrow_mut()
                .map_err(|e| new_error!("{} slot is in use: {e}", T::CLASS_NAME))?;
            if wrap.refs == 0 {
                return Err(new_error!("unpin of an unpinned {} object", T::CLASS_NAME));
            }
            wrap.refs -= 1;
            if wrap.refs > 0 {
                return Ok(());
            }
            wrap.root.take()
        };
        if let Some(key) = released {
            // `object` still holds a reference, so this cannot finalize it.
            Roots::remove(ctx, key).map_err(|e| VmError::from_js(ctx, e))?;
        }
        Ok(())
    }

    /// How many pins are outstanding on `object`.
    pub fn pin_count(object: &Object<'_>) -> Result<u32> {
        let class = Self::class_of(object).ok_or_else(not_wrapped::<T>)?;
        let wrap = class
            .try_borrow()
            .map_err(|e| new_error!("{} slot is in use: {e}", T::CLASS_NAME))?;
        Ok(wrap.refs)
    }

    fn class_of<'js>(object: &Object<'js>) -> Option<Class<'js, Self>> {
        Class::<Self>::from_object(object)
    }
}

fn not_wrapped<T: Wrappable>() -> VmError {
    VmError::usage(
        ErrorKind::TypeError,
        format!("Illegal invocation: receiver is not a {}", T::CLASS_NAME),
    )
}
