use rquickjs::object::Property;
use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function, Object};

pub fn setup(ctx: &Ctx<'_>, output: bool) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let console = Object::new(ctx.clone())?;
    for level in ["log", "info", "warn", "error", "debug"] {
        let func = Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
            if output {
                let args = args.into_inner().into_iter().map(|c| c.0).collect();
                super::write_stdout(&super::join_line(args));
            }
        })?
        .with_name(level)?;
        console.set(level, func)?;
    }
    globals.prop("console", Property::from(console).writable().configurable())?;

    Ok(())
}
