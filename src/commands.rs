//! Command-line surface for the watcher binary.

use clap::Parser;

/// ARC-53 community metadata ingester for the Algorand blockchain.
///
/// Follows the live block stream, materializes NFD state for known and newly
/// minted NFDs and reconciles embedded community documents into MySQL. The
/// deploy environment (endpoints + database name) comes from the `ENV`
/// variable, connection settings from `DB_HOST`/`DB_PORT`/`DB_USER`/
/// `DB_PASSWORD`.
#[derive(Debug, Parser)]
#[command(name = "arc53-watcher", version, about)]
pub struct Cli {
    /// Listen port for the HTTP facade.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Log every transaction observed in the block stream.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub print_txns: bool,

    /// First round to stream from. Defaults to the greatest round stored on
    /// any provider, or the live tip when the store is empty.
    #[arg(long)]
    pub start_round: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["arc53-watcher"]);
        assert_eq!(cli.port, 3000);
        assert!(cli.print_txns);
        assert!(cli.start_round.is_none());
    }

    #[test]
    fn test_start_round_override() {
        let cli = Cli::parse_from(["arc53-watcher", "--start-round", "41000000"]);
        assert_eq!(cli.start_round, Some(41000000));
    }

    #[test]
    fn test_print_txns_takes_a_value() {
        let cli = Cli::parse_from(["arc53-watcher", "--print-txns", "false"]);
        assert!(!cli.print_txns);
    }
}
