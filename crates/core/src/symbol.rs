//! Symbol normalization across exchange notations.
//!
//! Exchanges report the same market in different shapes: `XRP/USDT:USDT`
//! (unified futures), `XRPUSDT` (bare concatenation), `xrp-usdt` (dashed).
//! Everything here is pure and total so it can be called on any string an
//! exchange hands back.

/// Quote currencies that futures notations repeat as a settlement suffix.
const DOUBLED_QUOTES: [&str; 5] = ["USDT", "USDC", "BUSD", "BTC", "ETH"];

/// Quote currencies recognised when extracting a base coin, longest first so
/// that `USDT` wins over `USD`.
const KNOWN_QUOTES: [&str; 6] = ["USDT", "USDC", "BUSD", "USD", "BTC", "ETH"];

/// Canonicalizes an exchange symbol for comparison.
///
/// Strips `/`, `-` and `:` separators, uppercases, and collapses the doubled
/// quote suffix produced by `BASE/QUOTE:SETTLE` futures notation.
///
/// # Examples
/// ```
/// use tradewatch_core::symbol::normalize;
///
/// assert_eq!(normalize("XRP/USDT:USDT"), "XRPUSDT");
/// assert_eq!(normalize("xrp-usdt"), "XRPUSDT");
/// ```
#[must_use]
pub fn normalize(symbol: &str) -> String {
    let trimmed = strip_settlement_suffix(symbol.trim());

    let mut normalized: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | ':' | '_' | ' '))
        .collect::<String>()
        .to_uppercase();

    for quote in DOUBLED_QUOTES {
        let doubled_len = quote.len() * 2;
        if normalized.len() > doubled_len && normalized.ends_with(&quote.repeat(2)) {
            normalized.truncate(normalized.len() - quote.len());
            break;
        }
    }

    normalized
}

/// Drops a `:SETTLE` suffix when it names a plain currency.
///
/// `BTC/USD:BTC` (inverse perpetual) becomes `BTC/USD`. Dated contracts such
/// as `BTC/USDT:USDT-240329` keep their suffix so they never collide with the
/// perpetual market.
fn strip_settlement_suffix(symbol: &str) -> &str {
    match symbol.split_once(':') {
        Some((market, settle))
            if !market.is_empty()
                && !settle.is_empty()
                && settle.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            market
        }
        _ => symbol,
    }
}

/// Returns true when `symbol` belongs to the configured trading pair.
///
/// A missing or blank filter accepts every symbol.
#[must_use]
pub fn matches_filter(filter: Option<&str>, symbol: &str) -> bool {
    match filter.map(str::trim) {
        None | Some("") => true,
        Some(pair) => normalize(pair) == normalize(symbol),
    }
}

/// Extracts the base currency ("active coin") from a configured trading pair.
///
/// Slash pairs split on the slash; concatenated pairs drop the first known
/// quote suffix. A pair with no recognisable quote is returned normalized.
#[must_use]
pub fn active_base_currency(trading_pair: &str) -> String {
    let trimmed = trading_pair.trim();
    if let Some((base, _)) = trimmed.split_once('/') {
        if !base.is_empty() {
            return base.to_uppercase();
        }
    }

    let normalized = normalize(trimmed);
    KNOWN_QUOTES
        .iter()
        .find_map(|quote| {
            normalized
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(str::to_string)
        })
        .unwrap_or(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_equivalent_notations() {
        assert_eq!(normalize("XRP/USDT:USDT"), "XRPUSDT");
        assert_eq!(normalize("XRPUSDT"), "XRPUSDT");
        assert_eq!(normalize("xrp-usdt"), "XRPUSDT");
        assert_eq!(normalize("XRP/USDT"), "XRPUSDT");
    }

    #[test]
    fn test_normalize_collapses_bare_doubled_suffix() {
        assert_eq!(normalize("XRPUSDTUSDT"), "XRPUSDT");
        assert_eq!(normalize("ethbtcbtc"), "ETHBTC");
        assert_eq!(normalize("SOLBUSDBUSD"), "SOLBUSD");
    }

    #[test]
    fn test_normalize_inverse_perpetual() {
        assert_eq!(normalize("BTC/USD:BTC"), "BTCUSD");
    }

    #[test]
    fn test_normalize_keeps_dated_contract_suffix() {
        assert_eq!(normalize("BTC/USDT:USDT-240329"), "BTCUSDTUSDT240329");
        assert_ne!(normalize("BTC/USDT:USDT-240329"), normalize("BTC/USDT:USDT"));
    }

    #[test]
    fn test_normalize_does_not_eat_the_whole_symbol() {
        assert_eq!(normalize("USDTUSDT"), "USDTUSDT");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(":"), "");
    }

    #[test]
    fn test_filter_accepts_futures_notation() {
        assert!(matches_filter(Some("BCH/USDT"), "BCH/USDT:USDT"));
        assert!(!matches_filter(Some("BCH/USDT"), "XRP/USDT:USDT"));
    }

    #[test]
    fn test_filter_absent_accepts_everything() {
        assert!(matches_filter(None, "XRP/USDT:USDT"));
        assert!(matches_filter(Some("  "), "anything"));
    }

    #[test]
    fn test_active_base_currency() {
        assert_eq!(active_base_currency("BTC/USDT"), "BTC");
        assert_eq!(active_base_currency("XRPUSDT"), "XRP");
        assert_eq!(active_base_currency("eth-btc"), "ETH");
        assert_eq!(active_base_currency("DOGE/USDT:USDT"), "DOGE");
        assert_eq!(active_base_currency("SOLUSDC"), "SOL");
    }

    #[test]
    fn test_active_base_currency_unknown_quote() {
        assert_eq!(active_base_currency("FOOBAR"), "FOOBAR");
        assert_eq!(active_base_currency("USDT"), "USDT");
    }
}
