use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Parse a decimal that explorers send either as a JSON string or number.
pub fn json_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

/// Integer base units (wei, satoshi, lamports, sun, nanoton) to whole units.
pub fn from_base_units(raw: i128, decimals: u32) -> Option<Decimal> {
    Decimal::try_from_i128_with_scale(raw, decimals)
        .ok()
        .map(|d| d.normalize())
}

/// Same as [`from_base_units`] for values given as a JSON string or number.
pub fn json_base_units(v: &Value, decimals: u32) -> Option<Decimal> {
    let raw: i128 = match v {
        Value::String(s) => s.trim().parse().ok()?,
        Value::Number(n) => n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from))?,
        _ => return None,
    };
    from_base_units(raw, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_strings_numbers_and_scientific() {
        assert_eq!(json_decimal(&json!("67000.12")), Some(Decimal::new(6700012, 2)));
        assert_eq!(json_decimal(&json!(0.2456)), Some(Decimal::new(2456, 4)));
        assert_eq!(json_decimal(&json!("1e-3")), Some(Decimal::new(1, 3)));
        assert_eq!(json_decimal(&json!(null)), None);
        assert_eq!(json_decimal(&json!("abc")), None);
    }

    #[test]
    fn scales_base_units() {
        assert_eq!(
            json_base_units(&json!("1500000000000000000"), 18),
            Some(Decimal::new(15, 1))
        );
        assert_eq!(json_base_units(&json!(10_000_000), 6), Some(Decimal::new(10, 0)));
        assert_eq!(json_base_units(&json!(2_500_000_000u64), 9), Some(Decimal::new(25, 1)));
        assert_eq!(json_base_units(&json!("12.5"), 6), None);
    }
}
