//! Wei-scale decimal arithmetic for counter columns.
//!
//! Vote weights and costs are 256-bit integers on the wire. They are
//! persisted in both raw and 18-decimal scaled form; neither ever passes
//! through floating point.

use primitive_types::U256;

use contestindex_core::error::IndexerError;

/// Parse a raw decimal string into a `U256`.
pub fn parse_wei(raw: &str) -> Result<U256, IndexerError> {
    U256::from_dec_str(raw).map_err(|e| {
        IndexerError::Storage(format!("invalid wei amount {raw:?}: {e:?}"))
    })
}

/// Sum two raw decimal strings.
pub fn add_wei(a: &str, b: &str) -> Result<String, IndexerError> {
    let sum = parse_wei(a)?
        .checked_add(parse_wei(b)?)
        .ok_or_else(|| IndexerError::Storage("wei counter overflow".into()))?;
    Ok(sum.to_string())
}

/// Scale a raw wei amount down by 10^18 into a display string, trimming
/// trailing zeros from the fraction: `"5000000000000000000"` → `"5"`,
/// `"1500000000000000000"` → `"1.5"`.
pub fn format_units18(raw: &str) -> Result<String, IndexerError> {
    let value = parse_wei(raw)?;
    let divisor = U256::exp10(18);
    let whole = value / divisor;
    let frac = value % divisor;
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    let frac = format!("{:0>18}", frac.to_string());
    let frac = frac.trim_end_matches('0');
    Ok(format!("{whole}.{frac}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wei_sums_decimal_strings() {
        assert_eq!(add_wei("0", "5000000000000000000").unwrap(), "5000000000000000000");
        assert_eq!(add_wei("1", "2").unwrap(), "3");
    }

    #[test]
    fn add_wei_rejects_garbage() {
        assert!(add_wei("five", "1").is_err());
    }

    #[test]
    fn format_units18_whole() {
        assert_eq!(format_units18("5000000000000000000").unwrap(), "5");
        assert_eq!(format_units18("0").unwrap(), "0");
    }

    #[test]
    fn format_units18_fraction() {
        assert_eq!(format_units18("1500000000000000000").unwrap(), "1.5");
        assert_eq!(format_units18("1").unwrap(), "0.000000000000000001");
    }

    #[test]
    fn format_units18_exceeds_u128() {
        // 2^200 — far beyond u128, exercises the 256-bit path
        let raw = U256::from(2u8).pow(U256::from(200u8)).to_string();
        assert!(format_units18(&raw).is_ok());
    }
}
