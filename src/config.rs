use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::store::StorePaths;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "remotelist",
    about = "Durable remote integer lists over gRPC",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Recover state and serve the list RPCs (default).
    Run,

    /// Print the state recovered from the snapshot and log, then exit.
    Recover,

    /// Recover, write one snapshot and rotate the log, then exit.
    Checkpoint,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "REMOTELIST_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:5000"
    )]
    pub bind: SocketAddr,

    #[arg(
        long = "log-file",
        global = true,
        env = "REMOTELIST_LOG_FILE",
        value_name = "PATH",
        default_value = "./data/remotelist.log"
    )]
    pub log_file: PathBuf,

    #[arg(
        long = "snapshot-file",
        global = true,
        env = "REMOTELIST_SNAPSHOT_FILE",
        value_name = "PATH",
        default_value = "./data/remotelist.snapshot.json"
    )]
    pub snapshot_file: PathBuf,

    /// Defaults to the log file path with `.history` appended.
    #[arg(
        long = "history-file",
        global = true,
        env = "REMOTELIST_HISTORY_FILE",
        value_name = "PATH"
    )]
    pub history_file: Option<PathBuf>,

    #[arg(
        long = "snapshot-interval-secs",
        global = true,
        env = "REMOTELIST_SNAPSHOT_INTERVAL_SECS",
        value_name = "SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=3600)
    )]
    pub snapshot_interval_secs: u64,

    #[arg(
        long = "history-max-lines",
        global = true,
        env = "REMOTELIST_HISTORY_MAX_LINES",
        value_name = "N",
        default_value_t = 20,
        value_parser = clap::value_parser!(u64).range(1..=100_000)
    )]
    pub history_max_lines: u64,
}

impl Config {
    pub fn store_paths(&self) -> StorePaths {
        let paths = StorePaths::new(&self.log_file, &self.snapshot_file);
        match &self.history_file {
            Some(history) => paths.with_history(history),
            None => paths,
        }
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn history_max_lines(&self) -> usize {
        self.history_max_lines as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_flags_absent() {
        let cli = Cli::try_parse_from(["remotelist"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.bind, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.config.snapshot_interval(), Duration::from_secs(5));
        assert_eq!(cli.config.history_max_lines(), 20);

        let paths = cli.config.store_paths();
        assert_eq!(paths.log, PathBuf::from("./data/remotelist.log"));
        assert_eq!(
            paths.snapshot,
            PathBuf::from("./data/remotelist.snapshot.json")
        );
        assert_eq!(paths.history, PathBuf::from("./data/remotelist.log.history"));
    }

    #[test]
    fn explicit_history_file_overrides_default() {
        let cli = Cli::try_parse_from([
            "remotelist",
            "--log-file",
            "/srv/l.log",
            "--history-file",
            "/srv/audit.log",
        ])
        .unwrap();
        let paths = cli.config.store_paths();
        assert_eq!(paths.log, PathBuf::from("/srv/l.log"));
        assert_eq!(paths.history, PathBuf::from("/srv/audit.log"));
    }

    #[test]
    fn rejects_invalid_snapshot_interval_secs() {
        let err =
            Cli::try_parse_from(["remotelist", "--snapshot-interval-secs", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--snapshot-interval-secs"));
        assert!(msg.contains("1..=3600"));
    }

    #[test]
    fn rejects_invalid_history_max_lines() {
        let err = Cli::try_parse_from(["remotelist", "--history-max-lines", "0"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--history-max-lines"));
    }

    #[test]
    fn parses_subcommands_with_global_flags() {
        let cli =
            Cli::try_parse_from(["remotelist", "checkpoint", "--log-file", "x.log"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Checkpoint)));
        assert_eq!(cli.config.log_file, PathBuf::from("x.log"));
    }
}
