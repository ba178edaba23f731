//! Tests for the script-land Context and NodeScript constructors

#![allow(clippy::disallowed_macros)]

use jsvm::rquickjs::Value;
use jsvm::{ContextHandle, RunOptions, Vm, VmBuilder, VmError};
use serde_json::json;

fn vm() -> Vm {
    VmBuilder::new().with_console_output(false).build().unwrap()
}

fn eval(vm: &mut Vm, code: &str) -> serde_json::Value {
    match vm.run_in_this_context(code, &RunOptions::new()) {
        Ok(value) => value,
        Err(e) => panic!("{code}: {e}"),
    }
}

#[test]
fn statics_compile_and_run() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var a = NodeScript.runInThisContext('var shared = 1; shared + 1');
        var b = NodeScript.runInNewContext('typeof shared');
        var ctx = NodeScript.createContext({ base: 10 });
        NodeScript.runInContext('var sum = base + 5', ctx);
        [a, b, ctx.sum, shared].join(',')
        "#,
    );
    assert_eq!(result, json!("2,undefined,15,1"));
}

#[test]
fn script_objects_run_in_any_context() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var script = new NodeScript('hits = (typeof hits === "number" ? hits : 0) + 1');
        var box = { hits: 10 };
        var ctx = NodeScript.createContext();
        script.runInNewContext(box);
        script.runInNewContext(box);
        script.runInContext(ctx);
        script.runInThisContext();
        [box.hits, ctx.hits, hits].join(',')
        "#,
    );
    assert_eq!(result, json!("12,1,1"));
}

#[test]
fn script_constructor_validates_its_arguments() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var messages = [];
        try { new NodeScript() } catch (e) { messages.push(e.message) }
        try { new NodeScript('(') } catch (e) { messages.push(e.name) }
        messages.join('|')
        "#,
    );
    assert_eq!(result, json!("needs at least 'code' argument.|SyntaxError"));
}

#[test]
fn methods_require_a_script_receiver() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var run = NodeScript.prototype.runInThisContext;
        var messages = [];
        try { run.call({}) } catch (e) { messages.push(e.message) }
        try { run.call(undefined) } catch (e) { messages.push(e.message) }
        messages.join('|')
        "#,
    );
    assert_eq!(
        result,
        json!("Must be called as a method of Script.|Must be called as a method of Script.")
    );
}

#[test]
fn run_in_context_rejects_plain_objects() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var caught;
        try { NodeScript.runInContext('1', {}) } catch (e) { caught = e }
        caught instanceof TypeError && caught.message
        "#,
    );
    assert_eq!(result, json!("needs a 'context' argument."));
}

#[test]
fn create_context_rejects_primitives() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var caught;
        try { NodeScript.createContext(42) } catch (e) { caught = e.message }
        caught
        "#,
    );
    assert_eq!(
        result,
        json!("createContext() accept only object as first argument.")
    );
}

#[test]
fn context_objects_are_recognized() {
    let vm = vm();
    vm.with(|ctx| {
        let constructed: Value = ctx.eval("new Context()").unwrap();
        assert!(ContextHandle::is_instance(&constructed));
        let created: Value = ctx.eval("NodeScript.createContext({})").unwrap();
        assert!(ContextHandle::is_instance(&created));
        let plain: Value = ctx.eval("({})").unwrap();
        assert!(!ContextHandle::is_instance(&plain));
        let forged: Value = ctx
            .eval("Object.create(Context.prototype)")
            .unwrap();
        assert!(!ContextHandle::is_instance(&forged));
    });
}

#[test]
fn exceptions_cross_contexts_unchanged() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var caught;
        try {
            NodeScript.runInNewContext('throw { tag: "inner" }');
        } catch (e) {
            caught = e;
        }
        caught.tag
        "#,
    );
    assert_eq!(result, json!("inner"));
}

#[test]
fn fresh_contexts_only_see_what_the_sandbox_hands_over() {
    let mut vm = vm();
    let err = vm
        .run_in_new_context::<(), _>(
            "NodeScript.runInThisContext('1')",
            &mut json!({}),
            &RunOptions::new(),
        )
        .unwrap_err();
    assert!(
        err.exception().unwrap().message.starts_with("ReferenceError"),
        "{err}"
    );

    let result = eval(
        &mut vm,
        r#"
        NodeScript.runInNewContext(
            'NodeScript.runInNewContext("6 * 7")',
            { NodeScript: NodeScript }
        )
        "#,
    );
    assert_eq!(result, json!(42));
}

#[test]
fn script_land_timeouts_surface_as_errors() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var caught;
        try {
            NodeScript.runInNewContext('while (true) {}', {}, 'spin.js', 20);
        } catch (e) {
            caught = e.message;
        }
        caught
        "#,
    );
    assert_eq!(result, json!(jsvm::TIMEOUT_MESSAGE));

    let err = vm
        .run_in_this_context::<()>("while (true) {}", &RunOptions::new().with_timeout_ms(20))
        .unwrap_err();
    assert!(matches!(err, VmError::TimedOut));
}

#[test]
fn vms_drop_cleanly_while_globals_hold_contexts() {
    let mut vm = vm();
    eval(
        &mut vm,
        r#"
        var c = NodeScript.createContext({ a: 1 });
        var s = new NodeScript('a + 1');
        s.runInContext(c);
        undefined
        "#,
    );
    drop(vm);
}

#[test]
fn vms_drop_cleanly_while_contexts_reach_themselves() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        var holder = {};
        var c = NodeScript.createContext({ holder: holder });
        holder.ctx = c;
        NodeScript.runInContext('typeof holder.ctx', c)
        "#,
    );
    assert_eq!(result, json!("object"));
    vm.collect_garbage();
    drop(vm);
}

#[test]
fn copies_ignore_builtins_replaced_by_scripts() {
    let mut vm = vm();
    let result = eval(
        &mut vm,
        r#"
        Array.prototype.forEach = function () { throw new Error('forEach'); };
        Object.getOwnPropertyNames = function () { return []; };
        Object.defineProperty = function () { throw new Error('defineProperty'); };
        Set = function () { throw new Error('Set'); };
        var s = { a: 3 };
        NodeScript.runInNewContext('a += 1; b = 2', s);
        s.a + s.b
        "#,
    );
    assert_eq!(result, json!(6));
}
