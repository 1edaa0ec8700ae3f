//! Symbol normalization and strategy inference, for checking filters.

use anyhow::Result;
use clap::Args;

use tradewatch_core::strategy::infer_strategy_from_symbol;
use tradewatch_core::symbol::{active_base_currency, matches_filter, normalize};

/// Arguments for the normalize command.
#[derive(Args, Debug, Clone)]
pub struct NormalizeArgs {
    /// Exchange symbols, e.g. "XRP/USDT:USDT"
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Trading pair filter to test the symbols against
    #[arg(short, long)]
    pub pair: Option<String>,
}

fn describe(symbol: &str, pair: Option<&str>) -> String {
    let mut line = format!(
        "{symbol}\t{}\tstrategy={}",
        normalize(symbol),
        infer_strategy_from_symbol(symbol)
    );
    if let Some(pair) = pair {
        let verdict = if matches_filter(Some(pair), symbol) {
            "match"
        } else {
            "no-match"
        };
        line.push_str(&format!("\t{pair}: {verdict}"));
    }
    line
}

/// Prints one line per symbol.
///
/// # Errors
/// Never fails; returns `Result` for uniformity with the other commands.
pub fn run_normalize(args: &NormalizeArgs) -> Result<()> {
    if let Some(pair) = &args.pair {
        println!("active coin for {pair}: {}", active_base_currency(pair));
    }
    for symbol in &args.symbols {
        println!("{}", describe(symbol, args.pair.as_deref()));
    }
    Ok(())
}
