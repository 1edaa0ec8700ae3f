//! Strategy tag resolution.

/// Tag used when neither configuration nor the symbol name identifies a strategy.
pub const UNKNOWN_STRATEGY: &str = "Unknown";

/// Resolves the strategy tag for activity on `symbol`.
///
/// Instances with configured strategies always report the first configured
/// tag. Otherwise the tag is guessed from keywords in the symbol name.
#[must_use]
pub fn resolve_strategy_tag(configured: &[String], symbol: &str) -> String {
    configured
        .iter()
        .map(|tag| tag.trim())
        .find(|tag| !tag.is_empty())
        .map_or_else(|| infer_strategy_from_symbol(symbol).to_string(), str::to_string)
}

/// Legacy keyword inference from a symbol name.
///
/// Best effort only: a symbol that merely contains one of the keywords
/// (`LOOPUSDT` for the LOOP token, say) is tagged as that strategy.
#[must_use]
pub fn infer_strategy_from_symbol(symbol: &str) -> &'static str {
    let lower = symbol.to_lowercase();

    if lower.contains("dca") {
        if lower.contains("futures") {
            "DCA Futures"
        } else {
            "DCA"
        }
    } else if lower.contains("grid") {
        "Grid"
    } else if lower.contains("combo") {
        "Combo"
    } else if lower.contains("loop") {
        "Loop"
    } else if lower.contains("btd") {
        "BTD"
    } else if lower.contains("ais") {
        "AIS Assisted"
    } else {
        UNKNOWN_STRATEGY
    }
}
