//! # CLI Interface
//!
//! Defines the command-line argument structure for `keyless-node` using
//! `clap` derive. Supports five subcommands: `run`, `init`, `keygen`,
//! `hash-credential` and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;
use keyless_auth::config::{
    AuthConfig, DEFAULT_CHALLENGE_TTL, DEFAULT_MAX_TREE_DEPTH, DEFAULT_SESSION_TTL,
    DEFAULT_SWEEP_INTERVAL,
};

/// KEYLESS authentication server.
///
/// Issues encrypted login challenges, registers hashed credentials in a
/// Merkle accumulator, and proves and verifies credential membership with
/// Groth16.
#[derive(Parser, Debug)]
#[command(
    name = "keyless-node",
    about = "KEYLESS authentication server",
    version,
    propagate_version = true
)]
pub struct KeylessNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the KEYLESS node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the authentication server.
    Run(RunArgs),
    /// Create the data directory and generate the server's long-term key.
    Init(InitArgs),
    /// Generate a client P-256 keypair and print it.
    Keygen,
    /// Print the salted SHA-256 of a raw credential, the form the server registers.
    HashCredential(HashCredentialArgs),
    /// Print version information and exit.
    Version,
}

/// Which keyed-store adapter backs the server.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Everything in process memory. Lost on restart.
    Memory,
    /// sled database under the data directory.
    Sled,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the server key and, with `--store sled`, the database.
    #[arg(long, short = 'd', env = "KEYLESS_DATA_DIR", default_value = ".keyless")]
    pub data_dir: PathBuf,

    /// Path to the hex-encoded server key. Defaults to `<data-dir>/server.key`.
    ///
    /// When the file does not exist a fresh key is generated and written there.
    #[arg(long, env = "KEYLESS_SERVER_KEY")]
    pub server_key: Option<PathBuf>,

    /// Storage backend.
    #[arg(long, value_enum, env = "KEYLESS_STORE", default_value_t = StoreKind::Sled)]
    pub store: StoreKind,

    /// Address the HTTP API binds to.
    #[arg(long, env = "KEYLESS_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the HTTP API.
    #[arg(long, env = "KEYLESS_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "KEYLESS_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Seconds an issued challenge stays answerable.
    #[arg(long, env = "KEYLESS_CHALLENGE_TTL", default_value_t = DEFAULT_CHALLENGE_TTL.as_secs())]
    pub challenge_ttl_secs: u64,

    /// Seconds a session token stays valid.
    #[arg(long, env = "KEYLESS_SESSION_TTL", default_value_t = DEFAULT_SESSION_TTL.as_secs())]
    pub session_ttl_secs: u64,

    /// Depth of the membership circuit. Registry capacity is 2^depth.
    ///
    /// Groth16 setup runs at startup and its cost grows with depth.
    #[arg(long, env = "KEYLESS_MAX_DEPTH", default_value_t = DEFAULT_MAX_TREE_DEPTH)]
    pub max_depth: usize,

    /// Seconds between sweeps of expired challenges and sessions.
    #[arg(long, env = "KEYLESS_SWEEP_INTERVAL", default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    pub sweep_interval_secs: u64,

    /// Log output format.
    #[arg(long, value_enum, env = "KEYLESS_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// The core configuration these flags describe.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            challenge_ttl: Duration::from_secs(self.challenge_ttl_secs),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            max_tree_depth: self.max_depth,
        }
    }

    pub fn server_key_path(&self) -> PathBuf {
        self.server_key
            .clone()
            .unwrap_or_else(|| self.data_dir.join(SERVER_KEY_FILE))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "KEYLESS_DATA_DIR", default_value = ".keyless")]
    pub data_dir: PathBuf,

    /// Overwrite an existing server key.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `hash-credential` subcommand.
#[derive(Parser, Debug)]
pub struct HashCredentialArgs {
    /// The raw credential, e.g. an e-mail address or a device identifier.
    pub credential: String,
}

/// File name of the server key inside the data directory.
pub const SERVER_KEY_FILE: &str = "server.key";

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        KeylessNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_match_core_defaults() {
        let cli = KeylessNodeCli::parse_from(["keyless-node", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.auth_config(), AuthConfig::default());
        assert_eq!(args.store, StoreKind::Sled);
        assert_eq!(args.server_key_path(), PathBuf::from(".keyless").join(SERVER_KEY_FILE));
    }

    #[test]
    fn run_flags_override() {
        let cli = KeylessNodeCli::parse_from([
            "keyless-node",
            "run",
            "--store",
            "memory",
            "--max-depth",
            "8",
            "--challenge-ttl-secs",
            "60",
            "--server-key",
            "/tmp/k",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.store, StoreKind::Memory);
        assert_eq!(args.auth_config().max_tree_depth, 8);
        assert_eq!(args.auth_config().challenge_ttl, Duration::from_secs(60));
        assert_eq!(args.server_key_path(), PathBuf::from("/tmp/k"));
    }

    #[test]
    fn hash_credential_takes_positional() {
        let cli = KeylessNodeCli::parse_from(["keyless-node", "hash-credential", "a@b.c"]);
        assert!(matches!(cli.command, Commands::HashCredential(a) if a.credential == "a@b.c"));
    }
}
