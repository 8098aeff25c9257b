// common_models/src/numeric.rs

//! 宽松的数值反序列化辅助函数。
//!
//! 设备端推送的计数器有时是整数，有时是带小数的浮点数 (例如 `1024.0`)。
//! 这里统一把它们折算为 `u64`，负数与非有限值视为解码失败。

use serde::de::{self, Deserialize, Deserializer};

fn number_to_counter<E: de::Error>(number: serde_json::Number) -> Result<u64, E> {
    if let Some(value) = number.as_u64() {
        return Ok(value);
    }
    match number.as_f64() {
        Some(value) if value.is_finite() && value >= 0.0 => Ok(value as u64),
        _ => Err(E::custom(format!("计数器必须是非负有限数值，实际为 {}", number))),
    }
}

/// 把 JSON 数值解析为 `u64` 计数器。
pub(crate) fn counter<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    number_to_counter(number)
}

/// 与 [`counter`] 相同，但允许 `null` / 缺失。
pub(crate) fn optional_counter<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Number>::deserialize(deserializer)? {
        Some(number) => number_to_counter(number).map(Some),
        None => Ok(None),
    }
}

/// `null` 按类型默认值处理。
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
