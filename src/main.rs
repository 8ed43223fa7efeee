use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use pulih::{
    config::{AnalysisConfig, KeySource},
    crypto::{CipherSettings, DEFAULT_HMAC_KDF_ITERATIONS, DEFAULT_KDF_ITERATIONS, HmacAlgorithm},
    logging,
    pipeline::analyze,
    types::PAGE_SIZE,
};

/// Decrypt a Signal Desktop database and recover rows from its WAL.
#[derive(Parser)]
#[command(name = "pulih")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("key").required(true).args(["passphrase", "hex_key", "signal_config"])))]
struct Cli {
    /// Encrypted database (db.sqlite)
    database: PathBuf,

    /// WAL file; defaults to `<database>-wal` when present
    #[arg(long)]
    wal: Option<PathBuf>,

    /// Additional WAL files (only one WAL is supported)
    #[arg(long = "extra-wal")]
    extra_wal: Vec<PathBuf>,

    /// SQLCipher passphrase
    #[arg(long)]
    passphrase: Option<String>,

    /// Raw 32-byte key as 64 hex digits or x'...'
    #[arg(long)]
    hex_key: Option<String>,

    /// Signal Desktop config.json holding the key
    #[arg(long)]
    signal_config: Option<PathBuf>,

    #[arg(long, default_value_t = PAGE_SIZE)]
    page_size: usize,

    /// PBKDF2 iterations for passphrase keys
    #[arg(long, default_value_t = DEFAULT_KDF_ITERATIONS)]
    kdf_iter: u32,

    /// Page HMAC digest
    #[arg(long, value_enum, default_value_t = HmacAlgorithm::Sha512)]
    hmac: HmacAlgorithm,

    /// JSON file overriding table and column names
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Decryption threads (default: one per core)
    #[arg(long)]
    workers: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn key_source(&self) -> Option<KeySource> {
        if let Some(passphrase) = &self.passphrase {
            return Some(KeySource::Passphrase(passphrase.clone()));
        }
        if let Some(hex_key) = &self.hex_key {
            return Some(KeySource::HexKey(hex_key.clone()));
        }
        self.signal_config.clone().map(KeySource::SignalConfig)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let key = cli.key_source().context("no key given")?;
    let mut config = AnalysisConfig::new(&cli.database, key).with_cipher(CipherSettings {
        page_size: cli.page_size,
        kdf_iterations: cli.kdf_iter,
        hmac_kdf_iterations: DEFAULT_HMAC_KDF_ITERATIONS,
        hmac_algorithm: cli.hmac,
    });
    config.wal = cli.wal.clone();
    config.extra_wals = cli.extra_wal.clone();
    config.workers = cli.workers;
    if let Some(layout) = &cli.layout {
        config = config
            .with_layout_file(layout)
            .with_context(|| format!("reading layout {}", layout.display()))?;
    }

    let report = analyze(&config).with_context(|| format!("analysing {}", cli.database.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
