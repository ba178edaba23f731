use rquickjs::{Ctx, IntoJs, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// `JSON.stringify(value)`, with values JSON cannot represent (`undefined`, a
/// function) reported as `null`.
pub fn stringify<'js>(ctx: &Ctx<'js>, value: impl IntoJs<'js>) -> rquickjs::Result<String> {
    let value = value.into_js(ctx)?;
    match ctx.json_stringify(value)? {
        Some(json) => json.to_string(),
        None => Ok("null".to_owned()),
    }
}

/// Convert a script value into any `serde` type by way of JSON.
pub fn from_js<'js, T: DeserializeOwned>(ctx: &Ctx<'js>, value: Value<'js>) -> anyhow::Result<T> {
    let json = stringify(ctx, value)?;
    Ok(serde_json::from_str(&json)?)
}

/// Convert any `serde` type into a script value by way of JSON.
pub fn to_js<'js, T: Serialize + ?Sized>(ctx: &Ctx<'js>, value: &T) -> anyhow::Result<Value<'js>> {
    let json = serde_json::to_string(value)?;
    Ok(ctx.json_parse(json)?)
}
