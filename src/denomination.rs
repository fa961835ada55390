//! Qi denominations and amount formatting.
//!
//! Qi outputs do not carry arbitrary amounts. Each output carries a
//! denomination index into a fixed value table, like cash bills. The
//! smallest unit is 1 Qit; 1 Qi = 1000 Qit.

use crate::error::WalletError;

/// Qit value for each denomination index.
pub const DENOMINATIONS: [u128; 15] = [
    1,             // 0.001 Qi
    5,             // 0.005 Qi
    10,            // 0.01 Qi
    50,            // 0.05 Qi
    100,           // 0.1 Qi
    500,           // 0.5 Qi
    1_000,         // 1 Qi
    5_000,         // 5 Qi
    10_000,        // 10 Qi
    50_000,        // 50 Qi
    100_000,       // 100 Qi
    500_000,       // 500 Qi
    1_000_000,     // 1000 Qi
    10_000_000,    // 10000 Qi
    1_000_000_000, // 1000000 Qi
];

/// Qit per Qi.
pub const QIT_PER_QI: u128 = 1_000;

/// Look up the Qit value for a denomination index.
///
/// Indices outside the table are a distinct error, never a silent zero.
pub fn denomination_value(index: u8) -> Result<u128, WalletError> {
    DENOMINATIONS
        .get(index as usize)
        .copied()
        .ok_or(WalletError::InvalidDenomination { index })
}

/// Sum the Qit values of a list of denomination indices.
pub fn sum_denominations(indices: &[u8]) -> Result<u128, WalletError> {
    indices.iter().try_fold(0u128, |sum, &idx| {
        Ok(sum.saturating_add(denomination_value(idx)?))
    })
}

/// Render a Qit amount as a human-readable Qi string, e.g. `1500` -> `"1.5"`.
pub fn format_qi(qit: u128) -> String {
    let whole = qit / QIT_PER_QI;
    let frac = qit % QIT_PER_QI;
    if frac == 0 {
        format!("{}", whole)
    } else {
        let s = format!("{}.{:03}", whole, frac);
        s.trim_end_matches('0').to_string()
    }
}

/// Parse a human-readable Qi amount into Qit, e.g. `"1.5"` -> `1500`.
///
/// At most three fractional digits are meaningful; anything finer than a
/// Qit is rejected.
pub fn parse_qi(qi: &str) -> Result<u128, WalletError> {
    let qi = qi.trim();
    let invalid = || WalletError::InvalidAmount(qi.to_string());

    let (whole, frac) = match qi.split_once('.') {
        Some((w, f)) => (w, f),
        None => (qi, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > 3 {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<3}", frac);
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(QIT_PER_QI)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(invalid)
}

/// Format a Qit balance for display, e.g. `1500` -> `"1.500 Qi"`.
pub fn format_balance(qit: u128) -> String {
    format!(
        "{}.{:03} Qi",
        qit / QIT_PER_QI,
        qit % QIT_PER_QI
    )
}
