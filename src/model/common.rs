use crate::config;
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::fmt;

pub type ProductCode = String;
pub type RetailerId = String;

/// Parses retailer price text such as `"1.299,99 lei"`, `"1,299.99"`, `"459.90"` or `"4.599"`.
pub fn parse_price_text(raw: &str) -> Option<f64> {
    let m = config::PRICE_RE.find(raw.trim())?;
    let digits: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.trim_end_matches(['.', ',']);

    let normalized = match (digits.rfind('.'), digits.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        (None, Some(_)) => {
            if is_grouped_thousands(digits, ',') {
                digits.replace(',', "")
            } else {
                digits.replace(',', ".")
            }
        }
        (Some(_), None) => {
            if is_grouped_thousands(digits, '.') {
                digits.replace('.', "")
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

// "4.599" or "1.299.000": every group after the first has exactly three digits
fn is_grouped_thousands(s: &str, sep: char) -> bool {
    let mut parts = s.split(sep);
    let head_ok = parts
        .next()
        .map_or(false, |h| !h.is_empty() && h.len() <= 3);
    let rest: Vec<&str> = parts.collect();
    head_ok && !rest.is_empty() && rest.iter().all(|p| p.len() == 3)
}

pub fn deserialize_flexible_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexiblePriceVisitor;
    impl<'de> Visitor<'de> for FlexiblePriceVisitor {
        type Value = f64;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or a price string")
        }
        #[inline]
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v as f64)
        }
        #[inline]
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as f64)
        }
        #[inline]
        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_finite() {
                Ok(v)
            } else {
                Err(E::invalid_value(Unexpected::Float(v), &"finite price"))
            }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_price_text(v).ok_or_else(|| E::invalid_value(Unexpected::Str(v), &self))
        }
    }
    deserializer.deserialize_any(FlexiblePriceVisitor)
}

/// Accepts `true`/`false`, `0`/`1`, and `"in stoc"`-style strings.
pub fn deserialize_stock_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct StockFlagVisitor;
    impl<'de> Visitor<'de> for StockFlagVisitor {
        type Value = bool;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("bool, 0/1, or availability text")
        }
        #[inline]
        fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
            Ok(v)
        }
        #[inline]
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v > 0)
        }
        #[inline]
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v > 0)
        }
        #[inline]
        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            Ok(v > 0.0)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            let t = v.trim().to_lowercase();
            Ok(t == "1" || t == "true" || t.starts_with("in"))
        }
        #[inline]
        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(false)
        }
        #[inline]
        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(false)
        }
    }
    deserializer.deserialize_any(StockFlagVisitor)
}

pub fn deserialize_flexible_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexibleU32Visitor;
    impl<'de> Visitor<'de> for FlexibleU32Visitor {
        type Value = u32;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("non-negative integer or string int")
        }
        #[inline]
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(u32::try_from(v.max(0)).unwrap_or(u32::MAX))
        }
        #[inline]
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(u32::try_from(v).unwrap_or(u32::MAX))
        }
        #[inline]
        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            Ok(if v.is_finite() && v > 0.0 { v as u32 } else { 0 })
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.trim().parse::<u32>().unwrap_or(0))
        }
        #[inline]
        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(0)
        }
        #[inline]
        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(0)
        }
    }
    deserializer.deserialize_any(FlexibleU32Visitor)
}

pub fn deserialize_string_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<String> = Option::deserialize(deserializer)?;
    Ok(v.filter(|s| !s.trim().is_empty()))
}
