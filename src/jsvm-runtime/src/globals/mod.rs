use rquickjs::Ctx;

mod console;
mod print;

/// Install the host-provided globals into the realm `ctx` belongs to. With
/// `output` off they are still defined but write nothing.
pub fn setup(ctx: &Ctx<'_>, output: bool) -> rquickjs::Result<()> {
    print::setup(ctx, output)?;
    console::setup(ctx, output)?;
    Ok(())
}

/// Join the arguments of a `print`-like call the way `console.log` does.
fn join_line(args: Vec<String>) -> String {
    let mut line = args.join(" ");
    line.push('\n');
    line
}

fn write_stdout(text: &str) {
    use std::io::Write as _;
    let mut stdout = std::io::stdout().lock();
    // Output errors are not reported to scripts.
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}
