//! Custom serde helpers for backend wire formats.

/// Deserializes a decimal given either as a JSON string or a JSON number.
///
/// REST backends mix `"99.99"` and `99.99` between endpoints. Numbers are
/// read through the source text `arbitrary_precision` preserves; values that
/// do not fit a `Decimal` exactly are rejected rather than rounded.
pub mod decimal_flex {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let text = match &value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected decimal, got {other}"
                )))
            }
        };
        let text = text.trim();
        Decimal::from_str_exact(text)
            .or_else(|_| Decimal::from_scientific(text))
            .map_err(|e| serde::de::Error::custom(format!("invalid decimal {text:?}: {e}")))
    }
}

/// Deserializes an identifier given either as a JSON string or an integer.
pub mod id_flex {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected id, got {other}"
            ))),
        }
    }
}

/// Deserializes Unix seconds (string or integer) into `DateTime<Utc>`.
pub mod timestamp_secs {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        from_value(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }

    fn from_value(value: Value) -> Result<DateTime<Utc>, String> {
        let secs = match value {
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("invalid timestamp {s:?}: {e}"))?,
            Value::Number(n) => n.as_i64().ok_or_else(|| format!("invalid timestamp {n}"))?,
            other => return Err(format!("expected timestamp, got {other}")),
        };
        DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| format!("Invalid timestamp: {}", secs))
    }

    /// Same, with `null` or a missing field read as `None`.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer};
        use serde_json::Value;

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Value::deserialize(deserializer)? {
                Value::Null => Ok(None),
                other => super::from_value(other)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}

/// (De)serializes a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(crate::shared::millis(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
