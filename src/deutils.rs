// src/deutils.rs
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::convert::TryInto;

pub fn default_false() -> bool { false }

/// The bridge is not strict about booleans: `true`, `1`, `"1"`, `"Y"` and
/// `null` (treated as false) all show up depending on the upstream API.
pub fn deserialize_bool_from_anything<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    if v.is_null() {
        return Ok(false);
    }
    let s = v.to_string().trim_matches('"').trim().to_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "y" | "t" => Ok(true),
        "0" | "false" | "no"  | "n" | "f" | "" => Ok(false),
        _ => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(s.as_str()),
            &"expected boolean representation",
        )),
    }
}

/// Hosts occasionally send dial ticks as strings.
pub fn deserialize_numeric_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let v = Value::deserialize(deserializer)?;
    let n = v
        .as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| D::Error::custom("non-integer"))?
        .try_into()
        .map_err(|_| D::Error::custom("overflow"))?;
    Ok(n)
}
