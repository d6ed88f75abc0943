//! rsabs - RSA blind signature authority CLI
//!
//! Usage:
//!   rsabs keygen [--config <file>] [--bits <N>]
//!   rsabs params [--config <file>]
//!   rsabs provision --identity <ID> --credential <SECRET>
//!   rsabs sign --identity <ID> --credential <SECRET> --blinded <HEX>
//!   rsabs verify --digest <HEX> --signature <HEX>
//!   rsabs demo --voters alice,bob,carol [--choices "Candidate A,Candidate B"]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::RngCore;
use rsabs::{
    load_public_key, Authority, AuthorityKeyPair, BallotBox, BallotPreparer, Config, Error,
    FileEligibilityStore, IdentityProof, MemoryEligibilityStore, PublicParams, Result,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rsabs")]
#[command(about = "RSA blind signature authority", long_about = None)]
struct Cli {
    /// Config file (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the authority key pair for a new epoch
    Keygen {
        /// Modulus size, overrides the config
        #[arg(long)]
        bits: Option<usize>,
    },

    /// Print the public parameters (n, e) as JSON
    Params,

    /// Register an identity that may obtain one signature
    Provision {
        #[arg(long)]
        identity: String,

        #[arg(long)]
        credential: String,
    },

    /// Blind-sign a hex encoded blinded digest for an identity
    Sign {
        #[arg(long)]
        identity: String,

        #[arg(long)]
        credential: String,

        /// Blinded digest, hex, exactly as wide as the modulus
        #[arg(long)]
        blinded: String,
    },

    /// Check an anonymous ballot against the authority's public key
    Verify {
        /// Digest, hex
        #[arg(long)]
        digest: String,

        /// Unblinded signature, hex
        #[arg(long)]
        signature: String,
    },

    /// Run a complete anonymous vote against a throwaway key
    Demo {
        /// Comma separated voter identities
        #[arg(long, value_delimiter = ',', required = true)]
        voters: Vec<String>,

        /// Comma separated choices, assigned to voters in turn
        #[arg(long, value_delimiter = ',', default_value = "Candidate A,Candidate B")]
        choices: Vec<String>,

        /// Modulus size of the throwaway key
        #[arg(long, default_value = "2048")]
        bits: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Keygen { bits } => {
            let key = AuthorityKeyPair::generate(bits.unwrap_or(config.key_bits))?;
            key.store_files(&config.public_key_path, &config.private_key_path)?;
            println!(
                "wrote {} and {}",
                config.public_key_path.display(),
                config.private_key_path.display()
            );
        }
        Commands::Params => {
            let (encoding, key) = load_public_key(&config.public_key_path)?;
            tracing::debug!(?encoding, "parsed public key");
            println!("{}", serde_json::to_string_pretty(&PublicParams::from(&key))?);
        }
        Commands::Provision {
            identity,
            credential,
        } => {
            let store = FileEligibilityStore::open(&config.eligibility_path)?;
            store.provision(identity.clone(), credential.as_bytes())?;
            println!("provisioned {}", identity);
        }
        Commands::Sign {
            identity,
            credential,
            blinded,
        } => {
            let store = FileEligibilityStore::open(&config.eligibility_path)?;
            let authority = Authority::from_config(&config, store)?;
            let blinded = decode_hex("blinded", &blinded)?;
            let proof = IdentityProof::new(identity, credential);
            let blind_sig = authority.request_blind_signature(&proof, &blinded)?;
            println!("{}", hex::encode(blind_sig));
        }
        Commands::Verify { digest, signature } => {
            let (_, key) = load_public_key(&config.public_key_path)?;
            let params = PublicParams::from(&key);
            let digest = decode_hex("digest", &digest)?;
            let signature = decode_hex("signature", &signature)?;
            if rsabs::verify_bytes(&digest, &signature, &params) {
                println!("valid");
            } else {
                println!("invalid");
                return Err(Error::VerificationFailure);
            }
        }
        Commands::Demo {
            voters,
            choices,
            bits,
        } => demo(&voters, &choices, bits)?,
    }
    Ok(())
}

fn demo(voters: &[String], choices: &[String], bits: usize) -> Result<()> {
    let key = Arc::new(AuthorityKeyPair::generate(bits)?);

    let store = MemoryEligibilityStore::new();
    let mut credentials = Vec::with_capacity(voters.len());
    for voter in voters {
        let mut credential = [0u8; 16];
        OsRng.fill_bytes(&mut credential);
        store.provision(voter.clone(), &credential)?;
        credentials.push(IdentityProof::new(voter.clone(), credential));
    }

    let authority = Authority::new(key, store);
    let params = authority.public_params().clone();
    let ballot_box = BallotBox::new(params.clone());
    let preparer = BallotPreparer::new(params);

    for (i, proof) in credentials.iter().enumerate() {
        // the nonce keeps equal choices from producing equal ballots
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        let choice = choices
            .get(i % choices.len().max(1))
            .map(String::as_str)
            .unwrap_or("blank");
        let message = format!("{}:{}", choice, hex::encode(nonce));

        let prepared = preparer.prepare(message.as_bytes())?;
        let blind_sig = authority.request_blind_signature(proof, &prepared.blinded_bytes()?)?;
        let position = ballot_box.cast(prepared.finish(&blind_sig)?)?;
        println!("{} obtained a signature; ballot #{} cast", proof.identity(), position);

        let retry = preparer.prepare(message.as_bytes())?;
        if let Err(e) = authority.request_blind_signature(proof, &retry.blinded_bytes()?) {
            println!("{} asked again: {}", proof.identity(), e);
        }
    }

    let report = ballot_box.audit();
    println!(
        "audit: {} valid, {} rejected of {} ballots",
        report.valid,
        report.rejected.len(),
        ballot_box.len()
    );
    Ok(())
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).map_err(|source| Error::InvalidHex { field, source })
}
