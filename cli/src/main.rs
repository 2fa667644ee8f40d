//! hap-setup-gen - Accessory Setup Generator.
//!
//! Produces a fresh (or operator-supplied) setup code, the SRP salt and
//! verifier derived from it, a setup ID, and the `X-HM://...` setup
//! payload string an accessory publishes for QR-code pairing.

use std::process::ExitCode;

use clap::Parser;
use hap::setup::{flags, setup_payload, SetupCode, SetupId};
use hap_crypto::{SrpVerifier, SALT_LEN};
use rand_core::{OsRng, RngCore};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "hap-setup-gen")]
#[command(author, version, about = "Generate a HomeKit accessory setup code, SRP credentials, and setup payload")]
struct Cli {
    /// Accessory supports the IP transport.
    #[arg(long)]
    ip: bool,

    /// Accessory supports the BLE transport.
    #[arg(long)]
    ble: bool,

    /// Accessory category number (1-30, [HAP] Section 13-1).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=30))]
    category: u8,

    /// Setup code to use instead of generating a random one (`XXX-XX-XXX`).
    #[arg(long)]
    setup_code: Option<String>,

    /// Setup ID to use instead of generating a random one (4 chars, A-Z0-9).
    #[arg(long)]
    setup_id: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("at least one of --ip or --ble is required")]
    NoTransport,
    #[error("invalid --setup-code: must be XXX-XX-XXX and not a degenerate value")]
    InvalidSetupCode,
    #[error("invalid --setup-id: must be exactly 4 characters, uppercase A-Z or 0-9")]
    InvalidSetupId,
}

fn transport_flags(cli: &Cli) -> Result<u8, CliError> {
    if !cli.ip && !cli.ble {
        return Err(CliError::NoTransport);
    }
    let mut f = 0;
    if cli.ip {
        f |= flags::IP;
    }
    if cli.ble {
        f |= flags::BLE;
    }
    Ok(f)
}

/// Generates a random `XXX-XX-XXX` setup code, retrying on the rejected
/// degenerate patterns (all-repeated digits, the two forbidden sequences).
fn random_setup_code() -> SetupCode {
    loop {
        let mut digits = [0u8; 8];
        for d in &mut digits {
            *d = b'0' + (OsRng.next_u32() % 10) as u8;
        }
        let code = format!(
            "{}{}{}-{}{}-{}{}{}",
            digits[0] as char,
            digits[1] as char,
            digits[2] as char,
            digits[3] as char,
            digits[4] as char,
            digits[5] as char,
            digits[6] as char,
            digits[7] as char,
        );
        if let Ok(code) = SetupCode::new(&code) {
            return code;
        }
    }
}

/// Generates a random 4-character setup ID (uppercase `A-Z0-9`).
fn random_setup_id() -> SetupId {
    const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut id = [0u8; 4];
    for c in &mut id {
        *c = ALPHABET[(OsRng.next_u32() % 36) as usize];
    }
    let id = std::str::from_utf8(&id).expect("ALPHABET is ASCII");
    SetupId::new(id).expect("generated id is always well-formed")
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let transport_flags = transport_flags(&cli)?;

    let setup_code = match &cli.setup_code {
        Some(code) => SetupCode::new(code).map_err(|_| CliError::InvalidSetupCode)?,
        None => random_setup_code(),
    };
    let setup_id = match &cli.setup_id {
        Some(id) => SetupId::new(id).map_err(|_| CliError::InvalidSetupId)?,
        None => random_setup_id(),
    };

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let srp = SrpVerifier::generate(salt, setup_code.as_str());

    let payload = setup_payload(cli.category, transport_flags, &setup_code, setup_id);

    println!("1");
    println!("{}", setup_code.as_str());
    println!("{}", hex::encode(srp.salt));
    println!("{}", hex::encode(srp.verifier));
    println!("{}", setup_id.as_str());
    println!("{payload}");
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_setup_code_is_always_well_formed() {
        for _ in 0..64 {
            let code = random_setup_code();
            assert!(hap::util::is_valid_setup_code(code.as_str()));
        }
    }

    #[test]
    fn random_setup_id_is_always_well_formed() {
        for _ in 0..64 {
            let id = random_setup_id();
            assert_eq!(id.as_str().len(), 4);
            assert!(id.as_str().chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn transport_flags_rejects_neither_ip_nor_ble() {
        let cli = Cli {
            ip: false,
            ble: false,
            category: 2,
            setup_code: None,
            setup_id: None,
        };
        assert!(matches!(transport_flags(&cli), Err(CliError::NoTransport)));
    }

    #[test]
    fn transport_flags_combines_both_bits() {
        let cli = Cli {
            ip: true,
            ble: true,
            category: 2,
            setup_code: None,
            setup_id: None,
        };
        assert_eq!(transport_flags(&cli).unwrap(), flags::IP | flags::BLE);
    }
}
