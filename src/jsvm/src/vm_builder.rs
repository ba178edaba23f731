use anyhow::Context as _;
use jsvm_runtime::{CatchJsErrorExt as _, JsRuntime, RuntimeConfig};
use tracing::{Level, instrument};

use crate::vm::Vm;

/// Lowest accepted stack budget; anything below cannot run the binding itself.
const MIN_STACK_SIZE: usize = 64 * 1024;

/// A builder for a [`Vm`]
pub struct VmBuilder {
    config: RuntimeConfig,
    install_binding: bool,
}

impl VmBuilder {
    /// Create a new VmBuilder
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            install_binding: true,
        }
    }

    /// Set the native stack budget of script execution, in bytes.
    /// Deeper recursion throws inside the script.
    /// Values below the minimum of 64 KiB are ignored.
    pub fn with_max_stack_size(mut self, max_stack_size: usize) -> Self {
        if max_stack_size >= MIN_STACK_SIZE {
            self.config.max_stack_size = max_stack_size;
        }
        self
    }

    /// Cap the script heap, in bytes. Allocations past the cap throw inside
    /// the script.
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.config.memory_limit = Some(memory_limit);
        self
    }

    /// Run a collection whenever this many bytes have been allocated since
    /// the last one
    pub fn with_gc_threshold(mut self, gc_threshold: usize) -> Self {
        self.config.gc_threshold = Some(gc_threshold);
        self
    }

    /// Enable or disable `console.log` and `print` output to stdout
    pub fn with_console_output(mut self, enabled: bool) -> Self {
        self.config.console_output = enabled;
        self
    }

    /// Whether to define `Context` and `NodeScript` on the main global object
    /// (enabled by default)
    pub fn with_binding(mut self, install: bool) -> Self {
        self.install_binding = install;
        self
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build the Vm
    #[instrument(skip_all, level=Level::INFO)]
    pub fn build(self) -> anyhow::Result<Vm> {
        let runtime = JsRuntime::new(self.config)?;
        runtime
            .with(|ctx| crate::cloner::install(&ctx).catch(&ctx))
            .context("compiling the property cloner")?;
        if self.install_binding {
            runtime
                .with(|ctx| crate::binding::install(&ctx, &ctx.globals()).catch(&ctx))
                .context("installing the script binding")?;
        }
        Ok(Vm::new(runtime))
    }
}

impl Default for VmBuilder {
    fn default() -> Self {
        Self::new()
    }
}
