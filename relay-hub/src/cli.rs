use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_HUB_CAPACITY, DEFAULT_MAX_LINE_BYTES, DEFAULT_OUTBOUND_CAPACITY, OverflowPolicy,
    RelayConfig, idle_timeout_from_secs,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay and pipe stdin/stdout through it.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Seconds without a line from a client before it is disconnected. 0 disables.
    #[arg(long, default_value_t = 0)]
    pub idle_timeout: u64,

    /// Lines buffered per client before the overflow policy applies.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY, value_parser = parse_capacity)]
    pub outbound_capacity: usize,

    /// Send each client its own lines back (the default).
    #[arg(long, overrides_with = "no_include_origin")]
    pub include_origin: bool,

    /// Do not send clients their own lines back.
    #[arg(long, overrides_with = "include_origin")]
    pub no_include_origin: bool,

    /// What to do when a client's outbound queue is full.
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Disconnect)]
    pub overflow: OverflowPolicy,

    /// Events buffered in front of the hub.
    #[arg(long, default_value_t = DEFAULT_HUB_CAPACITY, value_parser = parse_capacity)]
    pub hub_capacity: usize,

    /// Longest accepted line in bytes; longer lines close the connection.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_BYTES, value_parser = parse_capacity)]
    pub max_line_bytes: usize,

    /// Milliseconds a closing session waits for queued lines to flush.
    #[arg(long, default_value_t = 1000)]
    pub drain_timeout_ms: u64,
}

impl From<ServeArgs> for RelayConfig {
    fn from(args: ServeArgs) -> Self {
        RelayConfig {
            listen: args.listen,
            idle_timeout: idle_timeout_from_secs(args.idle_timeout),
            outbound_capacity: args.outbound_capacity,
            include_origin: !args.no_include_origin,
            overflow: args.overflow,
            hub_capacity: args.hub_capacity,
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),
            max_line_bytes: args.max_line_bytes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub server: SocketAddr,
}

fn parse_capacity(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_match_relay_defaults() {
        let cli = Cli::try_parse_from(["relay_hub", "serve"]).expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = RelayConfig::from(args);
        let defaults = RelayConfig::default();

        assert_eq!(config.listen, defaults.listen);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.outbound_capacity, defaults.outbound_capacity);
        assert_eq!(config.include_origin, defaults.include_origin);
        assert_eq!(config.overflow, defaults.overflow);
        assert_eq!(config.drain_timeout, defaults.drain_timeout);
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "relay_hub",
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--idle-timeout",
            "10",
            "--outbound-capacity",
            "8",
            "--no-include-origin",
            "--overflow",
            "drop-newest",
        ])
        .expect("parse");
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = RelayConfig::from(args);

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.outbound_capacity, 8);
        assert!(!config.include_origin);
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
    }

    #[test]
    fn last_origin_flag_wins() {
        let parse = |flags: &[&str]| {
            let mut argv = vec!["relay_hub", "serve"];
            argv.extend_from_slice(flags);
            let Command::Serve(args) = Cli::try_parse_from(argv).expect("parse").command else {
                panic!("expected serve");
            };
            RelayConfig::from(args).include_origin
        };

        assert!(parse(&["--include-origin"]));
        assert!(!parse(&["--include-origin", "--no-include-origin"]));
        assert!(parse(&["--no-include-origin", "--include-origin"]));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = Cli::try_parse_from(["relay_hub", "serve", "--outbound-capacity", "0"]);
        assert!(result.is_err());
    }
}
