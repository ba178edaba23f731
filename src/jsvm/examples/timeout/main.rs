//! Timeout Example: Demonstrates bounding script execution time
//!
//! This example shows how to:
//! 1. Give a run a timeout and get `VmError::TimedOut` back when it expires
//! 2. Keep using the same vm after a timed out run
//! 3. Terminate a run from another thread with the interrupt handle
//!
//! Run with: cargo run --example timeout

#![allow(clippy::disallowed_macros)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use jsvm::{RunOptions, VmBuilder, VmError};

fn main() -> Result<()> {
    println!("⏱️  Timeout Example: bounding script execution\n");

    let mut vm = VmBuilder::new().build()?;
    let spin = vm.new_script("while (true) {}", Some("spin.js"))?;

    // 1. The watchdog ends the run once the deadline passes.
    let start = Instant::now();
    let mut sandbox = serde_json::json!({});
    let timeout = RunOptions::new().with_timeout_ms(100);
    match vm.run_script_in_new_context::<(), _>(&spin, &mut sandbox, &timeout) {
        Err(VmError::TimedOut) => {
            println!("✅ Timed out after {:?}", start.elapsed());
        }
        other => anyhow::bail!("expected a timeout, got {other:?}"),
    }

    // 2. The vm carries on as before.
    let value: u32 = vm.run_in_this_context("6 * 7", &RunOptions::new())?;
    println!("✅ Next run returned {value}");

    // 3. Any thread holding the interrupt handle can end a run.
    let interrupt = vm.interrupt_handle();
    let barrier = Arc::new(Barrier::new(2));
    let ready = barrier.clone();
    let killer = thread::spawn(move || {
        ready.wait();
        thread::sleep(Duration::from_millis(200));
        println!("🔪 Sending a termination request...");
        interrupt.kill();
    });

    barrier.wait();
    let result = vm.run_script_in_this_context::<()>(&spin, &RunOptions::new());
    if killer.join().is_err() {
        anyhow::bail!("killer thread panicked");
    }
    match result {
        Err(VmError::Terminated) => println!("✅ Run terminated from another thread"),
        other => anyhow::bail!("expected a termination, got {other:?}"),
    }
    vm.interrupt_handle().cancel();
    vm.release(spin)?;

    println!("\n🎉 Timeout example completed");
    Ok(())
}
