use chrono::{TimeZone, Utc};

use crate::models::amount::format_decimal_str;

pub const AMOUNT_DISPLAY_DECIMALS: u8 = 4;

/// Amount with four decimals, followed by the symbol when known
pub fn format_amount(amount: &str, symbol: Option<&str>) -> String {
    let fixed = group_thousands(&format_decimal_str(amount, AMOUNT_DISPLAY_DECIMALS));
    match symbol {
        Some(symbol) => format!("{} {}", fixed, symbol),
        None => fixed,
    }
}

fn group_thousands(value: &str) -> String {
    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (value, None),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return value.to_string();
    }

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(frac) => format!("{}.{}", grouped, frac),
        None => grouped,
    }
}

pub fn format_usd(value: Option<f64>) -> Option<String> {
    value.map(|v| format!("${}", group_thousands(&format!("{:.2}", v))))
}

pub fn format_timestamp(unix_seconds: i64) -> String {
    match Utc.timestamp_opt(unix_seconds, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => unix_seconds.to_string(),
    }
}

/// `0x1234...abcd`
pub fn short_hash(hash: &str) -> String {
    if hash.len() <= 14 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

pub fn tx_url(explorer_url: &str, tx_hash: &str) -> String {
    format!("{}/tx/{}", explorer_url.trim_end_matches('/'), tx_hash)
}

pub fn address_url(explorer_url: &str, address: &str) -> String {
    format!("{}/address/{}", explorer_url.trim_end_matches('/'), address)
}
