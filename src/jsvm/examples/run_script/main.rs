//! Run Script Example: Runs a JavaScript file in a fresh context
//!
//! This example shows how to:
//! 1. Seed a sandbox object from a Rust value
//! 2. Run a script in a new context with a filename and a timeout
//! 3. Read the globals the script left behind back into Rust
//!
//! Run with: cargo run --example run_script [path/to/script.js]
//! Set RUST_LOG=jsvm=debug to see the evaluation spans.

#![allow(clippy::disallowed_macros)]

use std::env;
use std::fs;

use anyhow::Result;
use jsvm::{RunOptions, VmBuilder};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;

const DEFAULT_SCRIPT: &str = r#"
var greeting = 'Hello, ' + name + '!';
visits = visits + 1;
greeting
"#;

#[derive(Debug, Serialize, Deserialize)]
struct Globals {
    name: String,
    visits: u32,
    #[serde(default)]
    greeting: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (filename, code) = match env::args().nth(1) {
        Some(path) => {
            let code = fs::read_to_string(&path)?;
            (path, code)
        }
        None => ("greeting.js".to_string(), DEFAULT_SCRIPT.to_string()),
    };

    let mut vm = VmBuilder::new().build()?;
    let mut globals = Globals {
        name: "jsvm".into(),
        visits: 0,
        greeting: None,
    };

    let options = RunOptions::new()
        .with_filename(&filename)
        .with_timeout_ms(1_000)
        .with_display_errors(true);
    let result: serde_json::Value = vm.run_in_new_context(&code, &mut globals, &options)?;
    println!("✅ {filename} returned {result}");
    println!("📦 Sandbox after the run: {globals:?}");
    Ok(())
}
