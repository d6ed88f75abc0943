use crate::blind_sigs;
use crate::error::{Error, Result};
use crate::keys::PublicParams;
use crate::utils::serde_hex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// A signed digest with nothing attached that could name who obtained the
/// signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnonymousBallot {
    #[serde(with = "serde_hex")]
    digest: Vec<u8>,
    #[serde(with = "serde_hex")]
    signature: Vec<u8>,
}

impl AnonymousBallot {
    pub fn new(digest: Vec<u8>, signature: Vec<u8>) -> Self {
        Self { digest, signature }
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn verify(&self, params: &PublicParams) -> bool {
        blind_sigs::verify_bytes(&self.digest, &self.signature, params)
    }
}

#[derive(Default)]
struct Inner {
    ballots: Vec<AnonymousBallot>,
    seen: HashSet<Vec<u8>>,
}

/// Append-only store of anonymous ballots. There is no way to change or
/// remove a ballot once cast.
pub struct BallotBox {
    params: PublicParams,
    inner: RwLock<Inner>,
}

/// Outcome of checking every stored ballot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub valid: usize,
    /// Positions of ballots whose signature does not verify.
    pub rejected: Vec<usize>,
}

impl BallotBox {
    pub fn new(params: PublicParams) -> Self {
        Self {
            params,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Reopens a box from previously persisted ballots. They are taken as
    /// stored; [`BallotBox::audit`] tells which of them still verify.
    pub fn restore(params: PublicParams, ballots: Vec<AnonymousBallot>) -> Self {
        let seen = ballots.iter().map(|b| b.signature.clone()).collect();
        Self {
            params,
            inner: RwLock::new(Inner { ballots, seen }),
        }
    }

    pub fn public_params(&self) -> &PublicParams {
        &self.params
    }

    /// Verifies and appends a ballot. A signature can be cast only once.
    pub fn cast(&self, ballot: AnonymousBallot) -> Result<usize> {
        if !ballot.verify(&self.params) {
            tracing::warn!("rejected ballot with invalid signature");
            return Err(Error::VerificationFailure);
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.seen.insert(ballot.signature.clone()) {
            tracing::warn!("rejected duplicate ballot");
            return Err(Error::DuplicateBallot);
        }
        inner.ballots.push(ballot);
        let position = inner.ballots.len() - 1;
        tracing::debug!(position, "ballot cast");
        Ok(position)
    }

    pub fn len(&self) -> usize {
        self.read().ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all ballots in cast order.
    pub fn ballots(&self) -> Vec<AnonymousBallot> {
        self.read().ballots.clone()
    }

    /// Checks every ballot independently. A bad ballot is reported and
    /// skipped; it never stops the others from being checked.
    pub fn audit(&self) -> AuditReport {
        let inner = self.read();
        let mut report = AuditReport::default();
        for (position, ballot) in inner.ballots.iter().enumerate() {
            if ballot.verify(&self.params) {
                report.valid += 1;
            } else {
                tracing::warn!(position, "ballot failed verification");
                report.rejected.push(position);
            }
        }
        report
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}
