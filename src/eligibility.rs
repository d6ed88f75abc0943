use crate::error::{Error, Result};
use crate::utils::{self, serde_hex};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Sha3_256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// What a requester presents to prove who it is.
#[derive(Clone)]
pub struct IdentityProof {
    identity: String,
    credential: Zeroizing<Vec<u8>>,
}

impl IdentityProof {
    pub fn new(identity: impl Into<String>, credential: impl AsRef<[u8]>) -> Self {
        Self {
            identity: identity.into(),
            credential: Zeroizing::new(credential.as_ref().to_vec()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn credential(&self) -> &[u8] {
        &self.credential
    }
}

impl std::fmt::Debug for IdentityProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProof")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// `Unprovisioned -> Eligible -> Consumed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EligibilityState {
    Unprovisioned,
    Eligible,
    Consumed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRecord {
    /// SHA3-256 of the provisioned credential.
    #[serde(with = "serde_hex")]
    credential: Vec<u8>,
    consumed: bool,
}

impl EligibilityRecord {
    fn new(credential: &[u8]) -> Self {
        Self {
            credential: commit(credential),
            consumed: false,
        }
    }

    pub fn consumed(&self) -> bool {
        self.consumed
    }

    fn state(&self) -> EligibilityState {
        if self.consumed {
            EligibilityState::Consumed
        } else {
            EligibilityState::Eligible
        }
    }

    // Eligible -> Consumed, for a matching credential only
    fn consume(&mut self, proof: &IdentityProof) -> Result<()> {
        let identity = proof.identity();
        if !utils::ct_eq(&self.credential, &commit(proof.credential())) {
            tracing::warn!(identity, reason = "credential", "eligibility denied");
            return Err(Error::EligibilityDenied(identity.to_string()));
        }
        if self.consumed {
            tracing::warn!(identity, reason = "consumed", "eligibility denied");
            return Err(Error::EligibilityDenied(identity.to_string()));
        }
        self.consumed = true;
        Ok(())
    }
}

fn commit(credential: &[u8]) -> Vec<u8> {
    Sha3_256::digest(credential).to_vec()
}

fn unprovisioned(identity: &str) -> Error {
    tracing::warn!(identity, reason = "unprovisioned", "eligibility denied");
    Error::EligibilityDenied(identity.to_string())
}

/// Per-identity one-time signing rights, owned by the application.
///
/// Implementations must make `try_consume` a single indivisible
/// check-and-set for one identity, and must not serialize unrelated
/// identities behind each other.
pub trait EligibilityStore: Send + Sync {
    /// Authenticates `proof` and moves its identity from `Eligible` to
    /// `Consumed`. Any other outcome is `EligibilityDenied`.
    fn try_consume(&self, proof: &IdentityProof) -> Result<()>;

    /// Puts a consumed identity back to `Eligible`. Only used when signing
    /// failed after the consumption.
    fn restore(&self, identity: &str) -> Result<()>;

    fn state(&self, identity: &str) -> EligibilityState;
}

/// Eligibility records held in a sharded concurrent map. Requests for the
/// same identity serialize on its entry; others go through other shards or
/// wait only for the duration of a flag update.
#[derive(Debug, Default)]
pub struct MemoryEligibilityStore {
    records: DashMap<String, EligibilityRecord>,
}

impl MemoryEligibilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an identity as `Eligible`. An identity is provisioned once;
    /// provisioning again would reset its `consumed` flag and is refused.
    pub fn provision(&self, identity: impl Into<String>, credential: &[u8]) -> Result<()> {
        match self.records.entry(identity.into()) {
            Entry::Occupied(e) => Err(Error::AlreadyProvisioned(e.key().clone())),
            Entry::Vacant(e) => {
                tracing::debug!(identity = %e.key(), "provisioned identity");
                e.insert(EligibilityRecord::new(credential));
                Ok(())
            }
        }
    }
}

impl EligibilityStore for MemoryEligibilityStore {
    fn try_consume(&self, proof: &IdentityProof) -> Result<()> {
        let identity = proof.identity();
        // the entry guard is held until the flag is set
        let mut record = self
            .records
            .get_mut(identity)
            .ok_or_else(|| unprovisioned(identity))?;
        record.consume(proof)?;
        tracing::info!(identity, "eligibility consumed");
        Ok(())
    }

    fn restore(&self, identity: &str) -> Result<()> {
        match self.records.get_mut(identity) {
            Some(mut record) => {
                record.consumed = false;
                tracing::warn!(identity, "eligibility restored after failed signing");
                Ok(())
            }
            None => Err(Error::EligibilityDenied(identity.to_string())),
        }
    }

    fn state(&self, identity: &str) -> EligibilityState {
        self.records
            .get(identity)
            .map_or(EligibilityState::Unprovisioned, |r| r.state())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    identity: String,
    record: EligibilityRecord,
}

/// Eligibility records on disk, one JSON file per identity in a directory.
///
/// Every change holds an exclusive advisory lock on the identity's lock file
/// from the read through the write, so handles in other threads or other
/// processes see each other's consumptions and only contend for the same
/// identity. A record file is only ever replaced by rename: a failed write
/// leaves the previous state in place.
#[derive(Debug)]
pub struct FileEligibilityStore {
    dir: PathBuf,
}

impl FileEligibilityStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "opened eligibility store");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn provision(&self, identity: impl Into<String>, credential: &[u8]) -> Result<()> {
        let identity = identity.into();
        let mut lock = self.lock(&identity)?;
        let _guard = lock.write()?;

        if self.read(&identity)?.is_some() {
            return Err(Error::AlreadyProvisioned(identity));
        }
        self.write(&identity, EligibilityRecord::new(credential))?;
        tracing::debug!(identity = %identity, "provisioned identity");
        Ok(())
    }

    // identities are hashed so that any string maps to a safe file name
    fn stem(&self, identity: &str) -> PathBuf {
        self.dir.join(hex::encode(Sha3_256::digest(identity.as_bytes())))
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        self.stem(identity).with_extension("json")
    }

    fn tmp_path(&self, identity: &str) -> PathBuf {
        self.stem(identity).with_extension("json.tmp")
    }

    fn lock(&self, identity: &str) -> Result<RwLock<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.stem(identity).with_extension("lock"))?;
        Ok(RwLock::new(file))
    }

    fn read(&self, identity: &str) -> Result<Option<EligibilityRecord>> {
        match fs::read(self.record_path(identity)) {
            Ok(bytes) => {
                let stored: StoredRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(stored.record))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, identity: &str, record: EligibilityRecord) -> Result<()> {
        let stored = StoredRecord {
            identity: identity.to_string(),
            record,
        };
        let tmp = self.tmp_path(identity);
        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(&stored)?)?;
        file.sync_all()?;
        fs::rename(&tmp, self.record_path(identity))?;
        Ok(())
    }
}

impl EligibilityStore for FileEligibilityStore {
    fn try_consume(&self, proof: &IdentityProof) -> Result<()> {
        let identity = proof.identity();
        let mut lock = self.lock(identity)?;
        let _guard = lock.write()?;

        let mut record = self.read(identity)?.ok_or_else(|| unprovisioned(identity))?;
        record.consume(proof)?;
        if let Err(e) = self.write(identity, record) {
            tracing::error!(identity, error = %e, "could not persist consumption");
            return Err(e);
        }
        tracing::info!(identity, "eligibility consumed");
        Ok(())
    }

    fn restore(&self, identity: &str) -> Result<()> {
        let mut lock = self.lock(identity)?;
        let _guard = lock.write()?;

        let mut record = self
            .read(identity)?
            .ok_or_else(|| Error::EligibilityDenied(identity.to_string()))?;
        record.consumed = false;
        self.write(identity, record)?;
        tracing::warn!(identity, "eligibility restored after failed signing");
        Ok(())
    }

    fn state(&self, identity: &str) -> EligibilityState {
        match self.read(identity) {
            Ok(Some(record)) => record.state(),
            Ok(None) => EligibilityState::Unprovisioned,
            Err(e) => {
                tracing::error!(identity, error = %e, "unreadable eligibility record");
                EligibilityState::Unprovisioned
            }
        }
    }
}

/// Binds the consumption of an identity's right to the operation it pays
/// for: either both happen or, on failure of the operation, the right is
/// handed back.
#[derive(Debug)]
pub struct EligibilityGate<S> {
    store: S,
}

impl<S: EligibilityStore> EligibilityGate<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn consume_with<T, F>(&self, proof: &IdentityProof, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.store.try_consume(proof)?;
        match op() {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(restore_err) = self.store.restore(proof.identity()) {
                    tracing::error!(
                        identity = proof.identity(),
                        error = %restore_err,
                        "could not restore eligibility"
                    );
                }
                Err(e)
            }
        }
    }
}
