//! Tests for running code in this, new and user contexts through the Vm API

#![allow(clippy::disallowed_macros)]

use jsvm::rquickjs::{IntoJs, Value};
use jsvm::{DEFAULT_FILENAME, ErrorKind, EvalConfig, RunOptions, Vm, VmBuilder, VmError, eval};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn vm() -> Vm {
    VmBuilder::new().with_console_output(false).build().unwrap()
}

fn run<T: serde::de::DeserializeOwned>(vm: &mut Vm, code: &str) -> T {
    match vm.run_in_this_context(code, &RunOptions::new()) {
        Ok(value) => value,
        Err(e) => panic!("{code}: {e}"),
    }
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct Pet {
    animal: String,
    count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[test]
fn run_in_this_context_shares_the_main_global() {
    let mut vm = vm();
    let opts = RunOptions::new();
    let () = vm.run_in_this_context("var counter = 1; undefined", &opts).unwrap();
    let result: u32 = vm.run_in_this_context("counter += 41; counter", &opts).unwrap();
    assert_eq!(result, 42);
    assert_eq!(run::<u32>(&mut vm, "globalThis.counter"), 42);
}

#[test]
fn new_context_copies_globals_back_onto_the_sandbox() {
    let mut vm = vm();
    let mut sandbox = Pet {
        animal: "cat".into(),
        count: 2,
        name: None,
    };
    let result: String = vm
        .run_in_new_context(
            "count += 1; name = 'kitty'; animal + count",
            &mut sandbox,
            &RunOptions::new(),
        )
        .unwrap();
    assert_eq!(result, "cat3");
    assert_eq!(
        sandbox,
        Pet {
            animal: "cat".into(),
            count: 3,
            name: Some("kitty".into()),
        }
    );

    // Nothing leaks into the main realm.
    assert_eq!(run::<String>(&mut vm, "typeof name"), "undefined");
}

#[test]
fn builtins_stay_behind_when_copying_back() {
    let mut vm = vm();
    let mut sandbox = json!({ "kept": true });
    let () = vm
        .run_in_new_context("var added = Math.max(1, 2); undefined", &mut sandbox, &RunOptions::new())
        .unwrap();
    assert_eq!(sandbox, json!({ "kept": true, "added": 2 }));
}

#[test]
fn new_context_without_state_is_fresh_every_time() {
    let mut vm = vm();
    let () = vm
        .run_in_new_context("var seen = true; undefined", &mut json!({}), &RunOptions::new())
        .unwrap();
    let result: String = vm
        .run_in_new_context("typeof seen", &mut json!({}), &RunOptions::new())
        .unwrap();
    assert_eq!(result, "undefined");
}

#[test]
fn new_context_has_its_own_builtins() {
    let mut vm = vm();
    let () = run(&mut vm, "Object.prototype.polluted = 1; undefined");
    let result: String = vm
        .run_in_new_context("typeof ({}).polluted", &mut json!({}), &RunOptions::new())
        .unwrap();
    assert_eq!(result, "undefined");
}

#[test]
fn user_context_keeps_state_between_runs() {
    let mut vm = vm();
    let sandbox = json!({ "total": 0 });
    let context = vm.create_context(Some(&sandbox)).unwrap();

    for _ in 0..3 {
        let () = vm
            .run_in_context("total += 2; var last = total; undefined", &context, &RunOptions::new())
            .unwrap();
    }
    let seen: serde_json::Value = vm.read_context(&context).unwrap();
    assert_eq!(seen["total"], json!(6));
    assert_eq!(seen["last"], json!(6));
    // The sandbox only seeded the context.
    assert_eq!(sandbox, json!({ "total": 0 }));
    vm.release(context).unwrap();
}

#[test]
fn pinned_contexts_survive_collection() {
    let mut vm = vm();
    let context = vm.create_context(Some(&json!({ "n": 1 }))).unwrap();
    vm.collect_garbage();
    let n: u32 = vm
        .run_in_context("n + 1", &context, &RunOptions::new())
        .unwrap();
    assert_eq!(n, 2);
}

#[test]
fn run_in_context_requires_a_context_object() {
    let mut vm = vm();
    let err = vm
        .with(|ctx| {
            let plain: Value = ctx.eval("({})").unwrap();
            let args = [
                "1".into_js(&ctx).unwrap(),
                plain,
            ];
            let receiver = Value::new_undefined(ctx.clone());
            eval::eval_machine(&ctx, EvalConfig::COMPILE_RUN_IN_CONTEXT, &receiver, &args)
                .map(|_| ())
                .map_err(|e| e.into_vm_error(&ctx))
        })
        .unwrap_err();
    assert!(matches!(
        err,
        VmError::Usage {
            kind: ErrorKind::TypeError,
            ..
        }
    ));
    assert_eq!(err.to_string(), "TypeError: needs a 'context' argument.");
    // The main realm is still usable.
    assert_eq!(run::<u32>(&mut vm, "1 + 1"), 2);
}

#[test]
fn scripts_compile_once_and_run_anywhere() {
    let mut vm = vm();
    let script = vm
        .new_script("typeof where === 'undefined' ? 'nowhere' : where", None)
        .unwrap();

    let () = run(&mut vm, "var where = 'main'; undefined");
    let here: String = vm
        .run_script_in_this_context(&script, &RunOptions::new())
        .unwrap();
    assert_eq!(here, "main");

    let fresh: String = vm
        .run_script_in_new_context(&script, &mut json!({}), &RunOptions::new())
        .unwrap();
    assert_eq!(fresh, "nowhere");

    let seeded: String = vm
        .run_script_in_new_context(&script, &mut json!({ "where": "sandbox" }), &RunOptions::new())
        .unwrap();
    assert_eq!(seeded, "sandbox");

    let context = vm.create_context::<serde_json::Value>(None).unwrap();
    let () = vm
        .run_in_context("var where = 'context'; undefined", &context, &RunOptions::new())
        .unwrap();
    let there: String = vm
        .run_script_in_context(&script, &context, &RunOptions::new())
        .unwrap();
    assert_eq!(there, "context");

    vm.release(script).unwrap();
    vm.release(context).unwrap();
}

#[test]
fn creating_a_script_does_not_run_it() {
    let mut vm = vm();
    vm.new_script("var created = true", None).unwrap();
    assert_eq!(run::<String>(&mut vm, "typeof created"), "undefined");
}

#[test]
fn compile_errors_carry_the_filename() {
    let mut vm = vm();
    let err = vm
        .run_in_this_context::<()>("var = 1", &RunOptions::new().with_filename("broken.js"))
        .unwrap_err();
    let VmError::Compile(exception) = &err else {
        panic!("expected a compile error, got {err:?}");
    };
    assert_eq!(exception.name.as_deref(), Some("SyntaxError"));
    assert!(exception.message.starts_with("SyntaxError"));
    let location = exception.location.as_ref().unwrap();
    assert_eq!(location.filename, "broken.js");
    assert_eq!(location.line, 1);

    let err = vm.new_script("function (", None).unwrap_err();
    let location = err.exception().unwrap().location.as_ref().unwrap();
    assert_eq!(location.filename, DEFAULT_FILENAME);
}

#[test]
fn runtime_errors_report_where_they_were_thrown() {
    let mut vm = vm();
    let err = vm
        .run_in_this_context::<()>(
            "var a = 1;\nthrow new TypeError('bad ' + a)",
            &RunOptions::new().with_filename("thrower.js"),
        )
        .unwrap_err();
    let VmError::Runtime(exception) = &err else {
        panic!("expected a runtime error, got {err:?}");
    };
    assert_eq!(exception.name.as_deref(), Some("TypeError"));
    assert_eq!(exception.message, "TypeError: bad 1");
    let location = exception.location.as_ref().unwrap();
    assert_eq!(location.filename, "thrower.js");
    assert_eq!(location.line, 2);
    assert_eq!(
        exception.diagnostic("var a = 1;\nthrow new TypeError('bad ' + a)").unwrap().lines().next(),
        Some("thrower.js:2")
    );
}

#[test]
fn thrown_primitives_are_described() {
    let mut vm = vm();
    let err = vm
        .run_in_this_context::<()>("throw 'plain'", &RunOptions::new())
        .unwrap_err();
    let exception = err.exception().unwrap();
    assert_eq!(exception.message, "plain");
    assert!(exception.name.is_none());
}

#[test]
fn failed_runs_leave_the_sandbox_alone() {
    let mut vm = vm();
    let mut sandbox = json!({ "value": 1 });
    let err = vm
        .run_in_new_context::<(), _>(
            "value = 2; extra = 3; throw new Error('boom')",
            &mut sandbox,
            &RunOptions::new(),
        )
        .unwrap_err();
    assert_eq!(err.exception().unwrap().message, "Error: boom");
    assert_eq!(sandbox, json!({ "value": 1 }));

    let untouched: bool = run(
        &mut vm,
        r#"
        var s = { value: 1 };
        try { NodeScript.runInNewContext('value = 2; extra = 3; throw 0', s) } catch (e) {}
        s.value === 1 && !('extra' in s)
        "#,
    );
    assert!(untouched);
}

#[test]
fn display_errors_does_not_change_the_result() {
    let mut vm = vm();
    let opts = RunOptions::new().with_display_errors(true);
    let err = vm
        .run_in_this_context::<()>("undefinedFunction()", &opts)
        .unwrap_err();
    assert!(matches!(err, VmError::Runtime(_)));
    let message = &err.exception().unwrap().message;
    assert!(message.starts_with("ReferenceError"), "{message}");
    assert!(message.contains("undefinedFunction"), "{message}");
}

#[test]
fn explicit_undefined_arguments_count_as_omitted() {
    let vm = vm();
    let result = vm.with(|ctx| {
        let undefined = Value::new_undefined(ctx.clone());
        let args = [
            "1 + 1".into_js(&ctx).unwrap(),
            undefined.clone(),
            undefined.clone(),
            undefined.clone(),
        ];
        eval::eval_machine(&ctx, EvalConfig::COMPILE_RUN_IN_NEW_CONTEXT, &undefined, &args)
            .unwrap()
            .as_number()
    });
    assert_eq!(result, Some(2.0));
}

#[test]
fn sandboxes_may_refer_to_themselves() {
    let mut vm = vm();
    let result: bool = run(
        &mut vm,
        r#"
        var s = { n: 1 };
        s.self = s;
        NodeScript.runInNewContext('self === this', s) && s.self === s
        "#,
    );
    assert!(result);
}

#[test]
fn results_must_deserialize_into_the_requested_type() {
    let mut vm = vm();
    let err = vm
        .run_in_this_context::<u32>("'not a number'", &RunOptions::new())
        .unwrap_err();
    assert!(matches!(err, VmError::Engine(_)), "{err:?}");
}

#[test]
fn unreachable_contexts_do_not_break_later_runs() {
    let mut vm = vm();
    for i in 0..8 {
        let n: u32 = vm
            .run_in_new_context("n * 2", &mut json!({ "n": i }), &RunOptions::new())
            .unwrap();
        assert_eq!(n, i * 2);
    }
    let context = vm.create_context::<serde_json::Value>(None).unwrap();
    vm.release(context).unwrap();
    vm.collect_garbage();
    assert_eq!(run::<u32>(&mut vm, "3 + 4"), 7);
}
