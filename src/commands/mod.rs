//! Subcommand implementations

pub mod backtest;
pub mod download;
pub mod live;

/// Parse a comma-separated symbol list
pub fn parse_symbols(s: &str) -> Vec<String> {
    s.split(',')
        .map(|sym| sym.trim().to_uppercase())
        .filter(|sym| !sym.is_empty())
        .collect()
}
