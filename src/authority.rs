use crate::blind_sigs::{self, BlindSignature, BlindSigner, BlindedDigest};
use crate::config::Config;
use crate::eligibility::{EligibilityGate, EligibilityStore, IdentityProof};
use crate::error::Result;
use crate::keys::{AuthorityKeyPair, PublicParams};
use rand::rngs::OsRng;
use std::sync::Arc;

/// The signing authority as seen by the surrounding application.
///
/// Every blind signature it hands out is paid for by exactly one
/// eligibility consumption, and a consumption whose signing fails is
/// handed back.
#[derive(Debug)]
pub struct Authority<S> {
    signer: BlindSigner,
    gate: EligibilityGate<S>,
}

impl<S: EligibilityStore> Authority<S> {
    pub fn new(key: Arc<AuthorityKeyPair>, store: S) -> Self {
        Self {
            signer: BlindSigner::new(key),
            gate: EligibilityGate::new(store),
        }
    }

    /// Loads the key pair named by `config`. Missing or unreadable key
    /// material is fatal.
    pub fn from_config(config: &Config, store: S) -> Result<Self> {
        let key = AuthorityKeyPair::load_files(&config.public_key_path, &config.private_key_path)?;
        Ok(Self::new(Arc::new(key), store))
    }

    pub fn public_params(&self) -> &PublicParams {
        self.signer.public_params()
    }

    pub fn eligibility(&self) -> &S {
        self.gate.store()
    }

    /// Signs `blinded` for the identity behind `proof`, at most once per
    /// identity.
    ///
    /// Input of the wrong width is rejected before any eligibility is
    /// touched. A signing failure after consumption restores the identity.
    pub fn request_blind_signature(
        &self,
        proof: &IdentityProof,
        blinded: &[u8],
    ) -> Result<Vec<u8>> {
        let params = self.public_params();
        let blinded = BlindedDigest::from_bytes(blinded, params)?;
        let signature: BlindSignature = self
            .gate
            .consume_with(proof, || self.signer.sign_blinded(&blinded, &mut OsRng))?;
        signature.to_bytes(params)
    }

    pub fn verify_ballot(&self, digest: &[u8], signature: &[u8]) -> bool {
        blind_sigs::verify_bytes(digest, signature, self.public_params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot_box::BallotBox;
    use crate::blind_sigs::BallotPreparer;
    use crate::eligibility::{EligibilityState, FileEligibilityStore, MemoryEligibilityStore};
    use crate::error::Error;
    use crate::keys::tests::toy_key;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn authority(identities: &[&str]) -> Authority<MemoryEligibilityStore> {
        let store = MemoryEligibilityStore::new();
        for id in identities {
            store.provision(*id, format!("pw-{}", id).as_bytes()).unwrap();
        }
        Authority::new(Arc::new(toy_key()), store)
    }

    fn proof(id: &str) -> IdentityProof {
        IdentityProof::new(id, format!("pw-{}", id))
    }

    #[test]
    fn one_signature_per_identity() -> Result<()> {
        let authority = authority(&["alice"]);
        let voter = BallotPreparer::new(authority.public_params().clone());

        let prepared = voter.prepare(b"Candidate A")?;
        let blind_sig = authority.request_blind_signature(&proof("alice"), &prepared.blinded_bytes()?)?;
        let ballot = prepared.finish(&blind_sig)?;
        assert!(authority.verify_ballot(ballot.digest(), ballot.signature()));

        let again = voter.prepare(b"Candidate B")?;
        assert!(matches!(
            authority.request_blind_signature(&proof("alice"), &again.blinded_bytes()?),
            Err(Error::EligibilityDenied(_))
        ));
        Ok(())
    }

    #[test]
    fn malformed_request_keeps_eligibility() -> Result<()> {
        let authority = authority(&["alice"]);

        // wrong width: refused before the gate
        assert!(matches!(
            authority.request_blind_signature(&proof("alice"), &[0x01]),
            Err(Error::InvalidLength { .. })
        ));
        assert_eq!(authority.eligibility().state("alice"), EligibilityState::Eligible);

        // right width, not reduced mod n: signing fails after consumption
        assert!(matches!(
            authority.request_blind_signature(&proof("alice"), &[0xff, 0xff]),
            Err(Error::SigningFailure(_))
        ));
        assert_eq!(authority.eligibility().state("alice"), EligibilityState::Eligible);

        let voter = BallotPreparer::new(authority.public_params().clone());
        let prepared = voter.prepare(b"Candidate A")?;
        authority.request_blind_signature(&proof("alice"), &prepared.blinded_bytes()?)?;
        assert_eq!(authority.eligibility().state("alice"), EligibilityState::Consumed);
        Ok(())
    }

    #[test]
    fn concurrent_requests_for_one_identity() -> Result<()> {
        const N: usize = 16;
        let authority = authority(&["alice"]);
        let voter = BallotPreparer::new(authority.public_params().clone());
        let requests = (0..N)
            .map(|i| voter.prepare(format!("Candidate A:{}", i).as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let barrier = Barrier::new(N);
        let signed = AtomicUsize::new(0);
        let denied = AtomicUsize::new(0);
        thread::scope(|s| {
            for prepared in &requests {
                let (authority, barrier, signed, denied) = (&authority, &barrier, &signed, &denied);
                s.spawn(move || {
                    let blinded = prepared.blinded_bytes().unwrap();
                    barrier.wait();
                    match authority.request_blind_signature(&proof("alice"), &blinded) {
                        Ok(_) => signed.fetch_add(1, Ordering::SeqCst),
                        Err(Error::EligibilityDenied(_)) => denied.fetch_add(1, Ordering::SeqCst),
                        Err(e) => panic!("unexpected error: {}", e),
                    };
                });
            }
        });

        assert_eq!(signed.load(Ordering::SeqCst), 1);
        assert_eq!(denied.load(Ordering::SeqCst), N - 1);
        Ok(())
    }

    #[test]
    fn independent_identities_all_vote() -> Result<()> {
        let ids = ["alice", "bob", "carol", "dave", "erin", "frank"];
        let authority = authority(&ids);
        let params = authority.public_params().clone();
        let ballot_box = BallotBox::new(params.clone());

        thread::scope(|s| {
            for (i, id) in ids.iter().enumerate() {
                let (authority, ballot_box, params) = (&authority, &ballot_box, &params);
                s.spawn(move || {
                    let voter = BallotPreparer::new(params.clone());
                    let prepared = voter.prepare(format!("Candidate A:{}", i).as_bytes()).unwrap();
                    let blind_sig = authority
                        .request_blind_signature(&proof(id), &prepared.blinded_bytes().unwrap())
                        .unwrap();
                    ballot_box.cast(prepared.finish(&blind_sig).unwrap()).unwrap();
                });
            }
        });

        let report = ballot_box.audit();
        assert_eq!(report.valid, ids.len());
        assert!(report.rejected.is_empty());
        for id in ids {
            assert_eq!(authority.eligibility().state(id), EligibilityState::Consumed);
        }
        Ok(())
    }

    #[test]
    fn file_backed_authority_keeps_consumption_on_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let records = dir.path().join("eligibility");
        let key = Arc::new(toy_key());
        FileEligibilityStore::open(&records)?.provision("alice", b"pw-alice")?;

        let authority = Authority::new(key.clone(), FileEligibilityStore::open(&records)?);
        assert!(matches!(
            authority.request_blind_signature(&proof("alice"), &[0xff, 0xff]),
            Err(Error::SigningFailure(_))
        ));
        assert_eq!(
            FileEligibilityStore::open(&records)?.state("alice"),
            EligibilityState::Eligible
        );

        let voter = BallotPreparer::new(authority.public_params().clone());
        let prepared = voter.prepare(b"Candidate A")?;
        let blind_sig = authority.request_blind_signature(&proof("alice"), &prepared.blinded_bytes()?)?;
        let ballot = prepared.finish(&blind_sig)?;
        assert!(authority.verify_ballot(ballot.digest(), ballot.signature()));
        drop(authority);

        // a restarted authority over the same records refuses a second signature
        let restarted = Authority::new(key, FileEligibilityStore::open(&records)?);
        assert_eq!(restarted.eligibility().state("alice"), EligibilityState::Consumed);
        let again = voter.prepare(b"Candidate B")?;
        assert!(matches!(
            restarted.request_blind_signature(&proof("alice"), &again.blinded_bytes()?),
            Err(Error::EligibilityDenied(_))
        ));
        Ok(())
    }

    #[test]
    fn from_config_requires_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            public_key_path: dir.path().join("authority_public.pem"),
            private_key_path: dir.path().join("authority_private.pem"),
            ..Config::default()
        };
        let r = Authority::from_config(&config, MemoryEligibilityStore::new());
        assert!(matches!(r, Err(Error::KeyMaterial(_))));
    }
}
