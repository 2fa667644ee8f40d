//! SRP-6a ([HAP] Section 5.6, using the 3072-bit group and SHA-512).

use sha2::Sha512;
use srp::client::SrpClient;
use srp::groups::G_3072;
use srp::server::{SrpServer as RawSrpServer, UserRecord};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username HAP fixes for Pair Setup's SRP exchange ([HAP] Section 5.6.3).
pub const USERNAME: &[u8] = b"Pair-Setup";

/// SRP salt length in bytes.
pub const SALT_LEN: usize = 16;
/// SRP verifier length in bytes for the 3072-bit group.
pub const VERIFIER_LEN: usize = 384;

/// Errors raised during the SRP exchange. A verification failure here must
/// propagate as a generic TLV error, never leak which step failed.
#[derive(Debug, Error)]
pub enum SrpError {
    #[error("malformed SRP public value")]
    InvalidPublicValue,
    #[error("client proof (M1) did not match the expected value")]
    ProofMismatch,
}

/// A computed (salt, verifier) pair, as stored in `SetupInfo`.
#[derive(Clone)]
pub struct SrpVerifier {
    pub salt: [u8; SALT_LEN],
    pub verifier: [u8; VERIFIER_LEN],
}

impl std::fmt::Debug for SrpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpVerifier").finish_non_exhaustive()
    }
}

impl SrpVerifier {
    /// Derives `(salt, verifier)` for a newly generated setup code, per the
    /// external `srp_verifier(salt, username, password)` interface of §6.
    #[must_use]
    pub fn generate(salt: [u8; SALT_LEN], setup_code: &str) -> Self {
        let client = SrpClient::<Sha512>::new(&G_3072);
        let v = client.compute_verifier(USERNAME, setup_code.as_bytes(), &salt);
        let mut verifier = [0u8; VERIFIER_LEN];
        let n = v.len().min(VERIFIER_LEN);
        verifier[VERIFIER_LEN - n..].copy_from_slice(&v[v.len() - n..]);
        Self { salt, verifier }
    }
}

/// Accessory-side SRP state for a single Pair Setup attempt (M1..M4).
///
/// Holds the ephemeral private key `b` between M1 (where `B` is produced)
/// and M3 (where the client's `A` arrives); zeroed on drop since it is as
/// sensitive as the session key it produces.
#[derive(ZeroizeOnDrop)]
pub struct SrpServer {
    #[zeroize(skip)]
    salt: [u8; SALT_LEN],
    verifier: [u8; VERIFIER_LEN],
    b_priv: Vec<u8>,
    #[zeroize(skip)]
    b_pub: Vec<u8>,
}

impl std::fmt::Debug for SrpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpServer").finish_non_exhaustive()
    }
}

/// The accessory's proof-of-possession after a successful exchange. Zeroed
/// on drop, as it is downstream of the shared SRP premaster secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpSessionKey(Vec<u8>);

impl SrpSessionKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl SrpServer {
    /// Starts a new exchange (M1 -> M2): generates `b` and computes `B`.
    #[must_use]
    pub fn start(salt: [u8; SALT_LEN], verifier: [u8; VERIFIER_LEN], b_priv: [u8; 64]) -> Self {
        let user = UserRecord {
            username: USERNAME,
            salt: &salt,
            verifier: &verifier,
        };
        let srv = RawSrpServer::<Sha512>::new(&G_3072);
        let b_pub = srv.compute_public_ephemeral(&b_priv, user.verifier);
        Self {
            salt,
            verifier,
            b_priv: b_priv.to_vec(),
            b_pub,
        }
    }

    /// `B`, sent to the controller in M2.
    #[must_use]
    pub fn public_b(&self) -> &[u8] {
        &self.b_pub
    }

    /// `s`, sent to the controller in M2.
    #[must_use]
    pub const fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// Processes the controller's `A` (M3) and verifies its proof `M1`,
    /// returning the shared premaster secret `K` and this accessory's
    /// counter-proof `M2` on success.
    ///
    /// # Errors
    ///
    /// Returns [`SrpError`] if `A` is degenerate or the client proof does
    /// not match; either case must be treated identically by the caller
    /// (reset to `Failed`, report a generic TLV error).
    pub fn verify_client(
        self,
        a_pub: &[u8],
        client_proof: &[u8],
    ) -> Result<(SrpSessionKey, Vec<u8>), SrpError> {
        let user = UserRecord {
            username: USERNAME,
            salt: &self.salt,
            verifier: &self.verifier,
        };
        let srv = RawSrpServer::<Sha512>::new(&G_3072);
        let verifier = srv
            .process_reply(&self.b_priv, user.verifier, a_pub)
            .map_err(|_| SrpError::InvalidPublicValue)?;
        verifier
            .verify_client(client_proof)
            .map_err(|_| SrpError::ProofMismatch)?;
        let key = SrpSessionKey(verifier.key().to_vec());
        let m2 = verifier.proof().to_vec();
        Ok((key, m2))
    }
}

impl Drop for SrpVerifier {
    fn drop(&mut self) {
        self.verifier.zeroize();
    }
}
