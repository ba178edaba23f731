use rquickjs::object::Property;
use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, Function};

pub fn setup(ctx: &Ctx<'_>, output: bool) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let print = Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        if output {
            let args = args.into_inner().into_iter().map(|c| c.0).collect();
            super::write_stdout(&super::join_line(args));
        }
    })?
    .with_name("print")?;
    globals.prop("print", Property::from(print).writable().configurable())?;

    Ok(())
}
