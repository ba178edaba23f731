use jsvm_runtime::Artifact;
use rquickjs::{Ctx, Object, Value};

use crate::object_wrap::{ObjectWrap, Wrappable};
use crate::{Result, binding};

/// The diagnostic name used when the caller does not give one.
pub const DEFAULT_FILENAME: &str = "evalmachine.<anonymous>";

/// The native side of a script object: a compiled artifact, once there is
/// one, and the name it reports errors under.
#[derive(Debug, Default)]
pub struct CompiledScript {
    artifact: Option<Artifact>,
}

impl Wrappable for CompiledScript {
    const CLASS_NAME: &'static str = "NodeScript";

    fn prototype<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
        binding::script_prototype(ctx)
    }
}

impl CompiledScript {
    /// A script object with no artifact yet.
    pub(crate) fn create<'js>(ctx: &Ctx<'js>) -> Result<Object<'js>> {
        let object = ObjectWrap::<Self>::new_instance(ctx)?;
        Self::attach(&object)?;
        Ok(object)
    }

    /// Gives `object`, an instance of the script class, an empty script.
    pub(crate) fn attach(object: &Object<'_>) -> Result<()> {
        ObjectWrap::wrap(object, Self::default())
    }

    /// The compiled artifact, if the script has one.
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub(crate) fn set_artifact(&mut self, artifact: Artifact) {
        self.artifact = Some(artifact);
    }

    /// The diagnostic name of the stored artifact.
    pub fn filename(&self) -> Option<&str> {
        self.artifact.as_ref().map(Artifact::filename)
    }

    /// Whether `value` is a script object with a stored artifact.
    pub fn is_compiled(value: &Value<'_>) -> bool {
        ObjectWrap::<Self>::get(value, |script| script.artifact.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use jsvm_runtime::{JsRuntime, RuntimeConfig};
    use rquickjs::IntoJs;

    use super::*;
    use crate::eval;

    #[test]
    fn scripts_remember_their_artifact() {
        let rt = JsRuntime::new(RuntimeConfig::default()).unwrap();
        rt.with(|ctx| {
            let args = ["1 + 1", "two.js"].map(|s| s.into_js(&ctx).unwrap());
            let script = eval::new_script(&ctx, &args).unwrap().into_value();
            assert!(CompiledScript::is_compiled(&script));
            let filename =
                ObjectWrap::<CompiledScript>::unwrap(&script, |s| s.filename().map(str::to_owned))
                    .unwrap();
            assert_eq!(filename.as_deref(), Some("two.js"));

            let empty = CompiledScript::create(&ctx).unwrap().into_value();
            assert!(!CompiledScript::is_compiled(&empty));
            assert!(!CompiledScript::is_compiled(&Value::new_undefined(ctx.clone())));
        });
    }

    #[test]
    fn omitted_filenames_use_the_default() {
        let rt = JsRuntime::new(RuntimeConfig::default()).unwrap();
        rt.with(|ctx| {
            let args = ["1".into_js(&ctx).unwrap()];
            let script = eval::new_script(&ctx, &args).unwrap().into_value();
            let filename =
                ObjectWrap::<CompiledScript>::unwrap(&script, |s| s.filename().map(str::to_owned))
                    .unwrap();
            assert_eq!(filename.as_deref(), Some(DEFAULT_FILENAME));
        });
    }
}
