//! Currency text parsing for heterogeneous ledger and settlement exports

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Separator convention used by an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmountFormat {
    /// `1,234.56`
    #[default]
    Standard,
    /// `1.234,56`
    European,
}

impl AmountFormat {
    fn separators(self) -> (char, char) {
        match self {
            AmountFormat::Standard => (',', '.'),
            AmountFormat::European => ('.', ','),
        }
    }
}

const CURRENCY_SYMBOLS: [char; 5] = ['$', '€', '£', '¥', '₹'];

/// Parse currency text such as `"$1,234.50"`, `"(45.20)"`, `"USD 10"` or
/// `"12.00 CR"` into a decimal.
///
/// Returns `Ok(None)` for empty text and `Err` with a reason when the text is
/// not an amount.
pub fn parse_amount(text: &str, format: AmountFormat) -> Result<Option<BigDecimal>, String> {
    let mut s = text.trim();
    if s.is_empty() {
        return Ok(None);
    }

    let mut negative = false;

    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].trim();
    }

    if let Some(rest) = strip_suffix_ignore_case(s, "CR") {
        negative = true;
        s = rest.trim_end();
    } else if let Some(rest) = strip_suffix_ignore_case(s, "DR") {
        s = rest.trim_end();
    }

    s = strip_currency_code(s);

    let mut cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && !CURRENCY_SYMBOLS.contains(c) && *c != '\'')
        .collect();

    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = true;
        cleaned = rest.to_string();
    } else if let Some(rest) = cleaned.strip_prefix('+') {
        cleaned = rest.to_string();
    }
    if let Some(rest) = cleaned.strip_suffix('-') {
        negative = true;
        cleaned = rest.to_string();
    }

    let digits = normalize_separators(&cleaned, format)
        .ok_or_else(|| format!("cannot parse amount '{}'", text.trim()))?;

    let value = BigDecimal::from_str(&digits)
        .map_err(|_| format!("cannot parse amount '{}'", text.trim()))?;

    Ok(Some(if negative { -value } else { value }))
}

/// Rewrite `1,234.56` (or `1.234,56`) as `1234.56`; `None` on stray characters
fn normalize_separators(s: &str, format: AmountFormat) -> Option<String> {
    let (group, decimal) = format.separators();
    let mut out = String::with_capacity(s.len());
    let mut seen_decimal = false;
    let mut seen_digit = false;

    for c in s.chars() {
        if c.is_ascii_digit() {
            seen_digit = true;
            out.push(c);
        } else if c == decimal && !seen_decimal {
            seen_decimal = true;
            out.push('.');
        } else if c == group && !seen_decimal && seen_digit {
            continue;
        } else {
            return None;
        }
    }

    if !seen_digit {
        return None;
    }
    if out.ends_with('.') {
        out.pop();
    }
    if out.starts_with('.') {
        out.insert(0, '0');
    }
    Some(out)
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if s.len() > suffix.len() && s.is_char_boundary(s.len() - suffix.len()) {
        let (head, tail) = s.split_at(s.len() - suffix.len());
        if tail.eq_ignore_ascii_case(suffix) {
            return Some(head);
        }
    }
    None
}

/// Drop a leading or trailing three-letter currency code (`USD 10`, `10.00 EUR`)
fn strip_currency_code(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() > 3 && bytes[..3].iter().all(u8::is_ascii_uppercase) {
        return s[3..].trim_start();
    }
    if bytes.len() > 3 && bytes[bytes.len() - 3..].iter().all(u8::is_ascii_uppercase) {
        return s[..s.len() - 3].trim_end();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> BigDecimal {
        parse_amount(s, AmountFormat::Standard).unwrap().unwrap()
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_plain_and_symbol_amounts() {
        assert_eq!(amount("10.00"), dec("10"));
        assert_eq!(amount("$10"), dec("10"));
        assert_eq!(amount("  $1,234.56 "), dec("1234.56"));
        assert_eq!(amount("€ 99"), dec("99"));
        assert_eq!(amount(".5"), dec("0.5"));
    }

    #[test]
    fn test_negative_forms() {
        assert_eq!(amount("(45.20)"), dec("-45.20"));
        assert_eq!(amount("-$3.18"), dec("-3.18"));
        assert_eq!(amount("$-3.18"), dec("-3.18"));
        assert_eq!(amount("3.18-"), dec("-3.18"));
        assert_eq!(amount("12.00 CR"), dec("-12"));
        assert_eq!(amount("12.00 DR"), dec("12"));
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(amount("USD 127.50"), dec("127.5"));
        assert_eq!(amount("124.32 USD"), dec("124.32"));
    }

    #[test]
    fn test_european_format() {
        let parsed = parse_amount("1.234,56 €", AmountFormat::European)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, dec("1234.56"));
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(parse_amount("   ", AmountFormat::Standard), Ok(None));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(parse_amount("N/A", AmountFormat::Standard).is_err());
        assert!(parse_amount("1.2.3", AmountFormat::Standard).is_err());
        assert!(parse_amount("$", AmountFormat::Standard).is_err());
        assert!(parse_amount(",100", AmountFormat::Standard).is_err());
    }
}
