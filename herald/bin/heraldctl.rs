//! Command-line utility for preparing herald directory material
//!
//! The directory file never holds a secret in the clear: API keys appear as
//! SHA-256 digests and SMTP passwords as sealed AEAD envelopes. This tool
//! produces both forms, plus the master key that seals them.
#![deny(clippy::pedantic, clippy::all, clippy::nursery)]

use std::io::{self, IsTerminal, Write};

use clap::{Parser, Subcommand};
use herald_registry::{MasterKey, hash_api_key};

/// Prepare key material for the herald directory
#[derive(Parser, Debug)]
#[command(name = "heraldctl")]
#[command(about = "Prepare key material for the herald directory", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a fresh master key
    ///
    /// Prints the base64 form for the `master_key` field of the directory.
    Keygen,

    /// Seal an SMTP password under the master key
    ///
    /// Reads the plaintext from stdin and prints the base64 envelope for the
    /// `password` field of an `smtp_configs` entry. Sealing the same password
    /// twice yields different envelopes; both open to the same plaintext.
    Seal {
        /// Master key in base64, as printed by keygen
        ///
        /// Falls back to the HERALD_MASTER_KEY environment variable.
        #[arg(short, long)]
        master_key: Option<String>,
    },

    /// Hash an API key for the `api_key_hash` field of an application
    ///
    /// Reads the key from stdin so it stays out of shell history.
    HashApiKey,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let (_, encoded) = MasterKey::generate();
            println!("{encoded}");
        }
        Commands::Seal { master_key } => {
            let encoded = match master_key {
                Some(encoded) => encoded,
                None => std::env::var("HERALD_MASTER_KEY").map_err(|_| {
                    anyhow::anyhow!(
                        "No master key. Pass --master-key or set HERALD_MASTER_KEY"
                    )
                })?,
            };

            let key = MasterKey::from_base64(&encoded)?;
            let plaintext = read_stdin("Password to seal: ")?;

            println!("{}", key.seal(&plaintext)?.as_str());
        }
        Commands::HashApiKey => {
            let api_key = read_stdin("API key to hash: ")?;

            println!("{}", hash_api_key(&api_key));
        }
    }

    Ok(())
}

/// Prompt on stderr when interactive, then read one trimmed line from stdin.
fn read_stdin(prompt: &str) -> anyhow::Result<String> {
    if io::stdin().is_terminal() {
        eprint!("{prompt}");
        io::stderr().flush()?;
    }

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let trimmed = input.trim_end_matches(['\r', '\n']);
    anyhow::ensure!(!trimmed.is_empty(), "Nothing to read on stdin");

    Ok(trimmed.to_owned())
}
