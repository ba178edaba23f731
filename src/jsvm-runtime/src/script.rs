use std::ffi::CString;
use std::rc::Rc;

use rquickjs::{Ctx, Exception, Value, qjs};

/// A script that parsed successfully and can be run in any realm of the
/// runtime that checked it.
///
/// QuickJS binds compiled bytecode to the realm that produced it, so an
/// artifact keeps the checked source and re-evaluates it in whichever realm
/// runs it.
#[derive(Debug, Clone)]
pub struct Artifact {
    source: Rc<str>,
    filename: Rc<str>,
}

impl Artifact {
    /// Parse `source` as a global script without running it.
    ///
    /// Syntax errors are thrown into `ctx` and returned as
    /// [`rquickjs::Error::Exception`].
    pub fn compile(ctx: &Ctx<'_>, source: &str, filename: &str) -> rquickjs::Result<Self> {
        let compiled = eval_raw(
            ctx,
            source,
            filename,
            qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY,
        )?;
        drop(compiled);
        Ok(Self {
            source: source.into(),
            filename: filename.into(),
        })
    }

    /// Run the script with `ctx`'s global object as its scope and return its
    /// completion value.
    pub fn run<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        eval_raw(ctx, &self.source, &self.filename, qjs::JS_EVAL_TYPE_GLOBAL)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

fn eval_raw<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    filename: &str,
    flags: u32,
) -> rquickjs::Result<Value<'js>> {
    // QuickJS reads `len` bytes and wants a NUL after them; NULs inside the
    // source are ordinary characters.
    let mut source_c = Vec::with_capacity(source.len() + 1);
    source_c.extend_from_slice(source.as_bytes());
    source_c.push(0);
    let Ok(filename_c) = CString::new(filename) else {
        return Err(Exception::throw_type(ctx, "filename contains a NUL character"));
    };
    // SAFETY: both buffers are NUL-terminated and outlive the call; `ctx`
    // keeps the runtime locked. The returned value is owned and handed to
    // `Value::from_raw`, which frees it on drop.
    unsafe {
        let raw = qjs::JS_Eval(
            ctx.as_raw().as_ptr(),
            source_c.as_ptr().cast(),
            source.len() as _,
            filename_c.as_ptr(),
            flags as _,
        );
        if qjs::JS_VALUE_GET_NORM_TAG(raw) as i32 == qjs::JS_TAG_EXCEPTION as i32 {
            return Err(rquickjs::Error::Exception);
        }
        Ok(Value::from_raw(ctx.clone(), raw))
    }
}
