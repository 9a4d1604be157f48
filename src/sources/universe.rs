//! Built-in instrument universe used when no upstream list is available.

use crate::types::Instrument;

/// Exchange used for stocks when a symbol carries no prefix.
pub const DEFAULT_EXCHANGE: &str = "NSE";

/// Pseudo-exchange for crypto contests.
pub const CRYPTO_EXCHANGE: &str = "CRYPTO";

/// (token, symbol, name, reference price, exchange)
const INSTRUMENTS: &[(&str, &str, &str, f64, &str)] = &[
    ("738561", "RELIANCE", "Reliance Industries", 2_780.45, DEFAULT_EXCHANGE),
    ("2953217", "TCS", "Tata Consultancy Services", 3_890.10, DEFAULT_EXCHANGE),
    ("341249", "HDFCBANK", "HDFC Bank", 1_610.75, DEFAULT_EXCHANGE),
    ("408065", "INFY", "Infosys", 1_530.20, DEFAULT_EXCHANGE),
    ("1270529", "ICICIBANK", "ICICI Bank", 1_085.60, DEFAULT_EXCHANGE),
    ("356865", "HINDUNILVR", "Hindustan Unilever", 2_410.35, DEFAULT_EXCHANGE),
    ("424961", "ITC", "ITC", 438.90, DEFAULT_EXCHANGE),
    ("779521", "SBIN", "State Bank of India", 765.15, DEFAULT_EXCHANGE),
    ("2714625", "BHARTIARTL", "Bharti Airtel", 1_215.40, DEFAULT_EXCHANGE),
    ("492033", "KOTAKBANK", "Kotak Mahindra Bank", 1_745.85, DEFAULT_EXCHANGE),
    ("2939649", "LT", "Larsen & Toubro", 3_520.00, DEFAULT_EXCHANGE),
    ("969473", "WIPRO", "Wipro", 478.25, DEFAULT_EXCHANGE),
    ("60417", "ASIANPAINT", "Asian Paints", 2_860.70, DEFAULT_EXCHANGE),
    ("2815745", "MARUTI", "Maruti Suzuki", 12_350.00, DEFAULT_EXCHANGE),
    ("857857", "SUNPHARMA", "Sun Pharmaceutical", 1_590.30, DEFAULT_EXCHANGE),
    ("884737", "TATAMOTORS", "Tata Motors", 985.55, DEFAULT_EXCHANGE),
    ("2889473", "ULTRACEMCO", "UltraTech Cement", 9_840.90, DEFAULT_EXCHANGE),
    ("81153", "BAJFINANCE", "Bajaj Finance", 6_920.40, DEFAULT_EXCHANGE),
    ("1850625", "HCLTECH", "HCL Technologies", 1_620.65, DEFAULT_EXCHANGE),
    ("2977281", "NTPC", "NTPC", 355.80, DEFAULT_EXCHANGE),
    ("BTC", "BTC", "Bitcoin", 5_400_000.00, CRYPTO_EXCHANGE),
    ("ETH", "ETH", "Ethereum", 290_000.00, CRYPTO_EXCHANGE),
    ("SOL", "SOL", "Solana", 12_500.00, CRYPTO_EXCHANGE),
];

/// (name, reference value)
pub const INDICES: &[(&str, f64)] = &[
    ("NIFTY 50", 22_150.35),
    ("SENSEX", 73_095.20),
    ("NIFTY BANK", 47_280.60),
];

/// Upstream quote key for each index.
pub fn index_key(name: &str) -> String {
    match name {
        "SENSEX" => "BSE:SENSEX".to_string(),
        other => format!("{}:{}", DEFAULT_EXCHANGE, other),
    }
}

/// Built-in instruments, optionally filtered by exchange (case-insensitive).
pub fn builtin_instruments(exchange: Option<&str>) -> Vec<Instrument> {
    INSTRUMENTS
        .iter()
        .filter(|(_, _, _, _, ex)| exchange.map_or(true, |f| f.eq_ignore_ascii_case(ex)))
        .map(|(token, symbol, name, price, ex)| Instrument::new(token, symbol, name, *price, ex))
        .collect()
}

/// Reference price of a built-in symbol.
pub fn reference_price(symbol: &str) -> Option<f64> {
    INSTRUMENTS
        .iter()
        .find(|(_, s, _, _, _)| s.eq_ignore_ascii_case(symbol))
        .map(|(_, _, _, price, _)| *price)
}

/// Reference value of a built-in index.
pub fn index_reference(name: &str) -> Option<f64> {
    INDICES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}
