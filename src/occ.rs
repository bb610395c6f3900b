// =============================================================================
// OCC option symbols — build and parse
// =============================================================================
//
// Format: {TICKER}{YYMMDD}{C|P}{STRIKE*1000 zero-padded to 8}
// Example: AAPL 2026-03-20 200 CALL -> AAPL260320C00200000
// =============================================================================

use chrono::NaiveDate;

use crate::types::OptionType;

/// A parsed OCC symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct OccSymbol {
    pub ticker: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: f64,
}

/// Build the OCC symbol for a contract.
///
/// Strikes are supported to 3 decimal places (the OCC encoding multiplies by
/// 1000).
pub fn build(ticker: &str, expiry: NaiveDate, option_type: OptionType, strike: f64) -> String {
    let strike_milli = (strike * 1000.0).round() as i64;
    format!(
        "{}{}{}{:08}",
        ticker.trim().to_uppercase(),
        expiry.format("%y%m%d"),
        option_type.occ_code(),
        strike_milli
    )
}

/// Parse an OCC symbol back into its parts.
///
/// Returns `None` for strings too short to carry the fixed-width suffix or
/// with an invalid date/type/strike encoding.
pub fn parse(symbol: &str) -> Option<OccSymbol> {
    let s = symbol.trim();
    // Fixed-width suffix: 6 date + 1 type + 8 strike = 15 chars.
    if !s.is_ascii() || s.len() < 16 {
        return None;
    }
    let (head, strike_part) = s.split_at(s.len() - 8);
    let (head, type_part) = head.split_at(head.len() - 1);
    let (ticker, date_part) = head.split_at(head.len() - 6);

    if ticker.is_empty() || !ticker.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let expiry = NaiveDate::parse_from_str(date_part, "%y%m%d").ok()?;
    let option_type = OptionType::parse(type_part)?;
    let strike_milli: i64 = strike_part.parse().ok()?;

    Some(OccSymbol {
        ticker: ticker.to_string(),
        expiry,
        option_type,
        strike: strike_milli as f64 / 1000.0,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn builds_reference_symbol() {
        let occ = build("AAPL", date(2026, 3, 20), OptionType::Call, 200.0);
        assert_eq!(occ, "AAPL260320C00200000");
    }

    #[test]
    fn builds_put_with_fractional_strike() {
        let occ = build("spy", date(2026, 1, 16), OptionType::Put, 412.5);
        assert_eq!(occ, "SPY260116P00412500");
    }

    #[test]
    fn roundtrip_three_decimal_strikes() {
        for &strike in &[0.5, 7.125, 95.0, 412.5, 1234.875, 5000.0] {
            let occ = build("GOOG", date(2027, 6, 18), OptionType::Call, strike);
            let parsed = parse(&occ).unwrap();
            assert_eq!(parsed.ticker, "GOOG");
            assert_eq!(parsed.expiry, date(2027, 6, 18));
            assert_eq!(parsed.option_type, OptionType::Call);
            assert!(
                (parsed.strike - strike).abs() < 1e-9,
                "strike {strike} mangled to {}",
                parsed.strike
            );
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("AAPL").is_none());
        assert!(parse("AAPL26032XC00200000").is_none());
        assert!(parse("AAPL260320X00200000").is_none());
        assert!(parse("260320C00200000").is_none());
    }
}
