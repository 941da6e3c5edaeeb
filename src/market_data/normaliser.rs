// Convert venue wire values into decimals and on-chain base units.
// Venues disagree on number encoding: JSON numbers, decimal strings, scientific strings,
// and JSON arrays nested inside strings all show up.

use alloy::primitives::U256;
use rust_decimal::prelude::*;
use serde_json::Value;

/// Lenient decimal parse of a JSON value. `None` for null, empty, or unparseable input.
pub fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Decimal::from(i));
            }
            parse_decimal_str(&n.to_string())
        }
        Value::String(s) => parse_decimal_str(s),
        _ => None,
    }
}

pub fn parse_decimal_str(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s).ok().or_else(|| Decimal::from_scientific(s).ok())
}

/// First key present on `obj` that parses as a decimal.
pub fn field(obj: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| obj.get(*k).and_then(decimal))
}

pub fn string_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A list that may arrive either as a JSON array or as a string containing one.
pub fn string_list(value: &Value) -> Vec<String> {
    let parsed;
    let array = match value {
        Value::Array(items) => items,
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => {
                parsed = items;
                &parsed
            }
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    array
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Scale a human amount to integer base units, truncating extra precision.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let scale = Decimal::from_i128_with_scale(10i128.checked_pow(decimals)?, 0);
    let raw = amount.checked_mul(scale)?.trunc();
    U256::from_str_radix(&raw.normalize().to_string(), 10).ok()
}

pub fn to_base_units_u64(amount: Decimal, decimals: u32) -> Option<u64> {
    let raw = to_base_units(amount, decimals)?;
    u64::try_from(raw).ok()
}

/// Inverse of `to_base_units` for amounts reported raw by a venue.
pub fn from_base_units(raw: &Value, decimals: u32) -> Option<Decimal> {
    let value = decimal(raw)?;
    let scale = Decimal::from_i128_with_scale(10i128.checked_pow(decimals)?, 0);
    value.checked_div(scale)
}

pub fn round_dp(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_accepts_wire_shapes() {
        assert_eq!(decimal(&json!(0.42)), Some(dec!(0.42)));
        assert_eq!(decimal(&json!("0.42")), Some(dec!(0.42)));
        assert_eq!(decimal(&json!(" 7 ")), Some(dec!(7)));
        assert_eq!(decimal(&json!("1e-3")), Some(dec!(0.001)));
        assert_eq!(decimal(&json!(12)), Some(dec!(12)));
        assert_eq!(decimal(&json!("")), None);
        assert_eq!(decimal(&json!(null)), None);
        assert_eq!(decimal(&json!("n/a")), None);
    }

    #[test]
    fn test_field_takes_first_present_key() {
        let obj = json!({"lastTradePrice": "0.3", "price": 0.9});
        assert_eq!(field(&obj, &["bestAsk", "lastTradePrice", "price"]), Some(dec!(0.3)));
        assert_eq!(field(&obj, &["missing"]), None);
    }

    #[test]
    fn test_string_list_nested_json() {
        assert_eq!(string_list(&json!("[\"0.4\", \"0.6\"]")), vec!["0.4", "0.6"]);
        assert_eq!(string_list(&json!(["a", 2])), vec!["a", "2"]);
        assert!(string_list(&json!("garbage")).is_empty());
    }

    #[test]
    fn test_base_units() {
        assert_eq!(to_base_units(dec!(12.5), 6), Some(U256::from(12_500_000u64)));
        assert_eq!(to_base_units(dec!(0.0000001), 6), Some(U256::ZERO));
        assert_eq!(
            to_base_units(dec!(3), 18),
            Some(U256::from(3_000_000_000_000_000_000u128))
        );
        assert_eq!(to_base_units(dec!(-1), 6), None);
        assert_eq!(to_base_units_u64(dec!(1), 6), Some(1_000_000));
        assert_eq!(from_base_units(&json!("2500000"), 6), Some(dec!(2.5)));
    }

    #[test]
    fn test_round_dp() {
        assert_eq!(round_dp(dec!(0.15000001), 4), dec!(0.15));
        assert_eq!(round_dp(dec!(31.578947), 2), dec!(31.58));
    }
}
