//! Reconcile engine: packages local labels for upload and merges pulled ones.

use crate::crypto::{decode, encode, SyncKeyMaterial};
use crate::sync::client::LabelService;
use crate::sync::models::{BatchBundle, EncryptedLabelEntry, LabelBundle, PullResponse};
use crate::sync::nonce::{NonceStore, INITIAL_NONCE};
use crate::wallet::{labels_to_value, lock_wallet, LabelWallet, SharedWallet, LABELS_KEY};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a merge did to the local label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Entries in the response
    pub received: usize,
    /// Labels written locally
    pub applied: usize,
    /// Entries dropped because they could not be decoded
    pub skipped: usize,
    /// Nonce after the merge; `None` when the response carried no labels
    pub nonce: Option<u64>,
}

/// Push/pull logic for one label service.
#[derive(Clone)]
pub struct ReconcileEngine {
    service: Arc<dyn LabelService>,
}

impl ReconcileEngine {
    pub fn new(service: Arc<dyn LabelService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<dyn LabelService> {
        &self.service
    }

    /// Encrypt one label change under the given nonce.
    pub fn build_label_bundle(
        material: &SyncKeyMaterial,
        nonce: u64,
        key: &str,
        value: &str,
    ) -> LabelBundle {
        LabelBundle {
            wallet_id: material.wallet_id().to_string(),
            wallet_nonce: nonce,
            external_id: encode(material, key),
            encrypted_label: encode(material, value),
        }
    }

    /// Encrypt every local label. Reads the nonce without advancing it.
    pub fn build_push_bundle(
        wallet: &mut dyn LabelWallet,
        material: &SyncKeyMaterial,
    ) -> Result<BatchBundle> {
        let nonce = NonceStore::get_nonce(wallet)?;
        let labels = wallet
            .labels()
            .iter()
            .map(|(key, value)| EncryptedLabelEntry {
                external_id: encode(material, key),
                encrypted_label: encode(material, value),
            })
            .collect();

        Ok(BatchBundle {
            wallet_id: material.wallet_id().to_string(),
            wallet_nonce: nonce,
            labels,
        })
    }

    /// Nonce to ask the service for changes since.
    ///
    /// A forced pull starts over from the first nonce; a normal pull asks
    /// from the last nonce this wallet has used or seen.
    pub fn pull_since_nonce(wallet: &mut dyn LabelWallet, force: bool) -> Result<u64> {
        if force {
            return Ok(INITIAL_NONCE);
        }
        Ok(NonceStore::get_nonce(wallet)?.saturating_sub(1))
    }

    /// Decrypt pulled entries, dropping the ones that fail.
    ///
    /// Returns the decoded labels and the number of dropped entries.
    pub fn decode_labels(
        material: &SyncKeyMaterial,
        entries: &[EncryptedLabelEntry],
    ) -> (BTreeMap<String, String>, usize) {
        let mut result = BTreeMap::new();
        let mut skipped = 0;

        for entry in entries {
            let decoded = decode(material, &entry.external_id)
                .and_then(|key| Ok((key, decode(material, &entry.encrypted_label)?)));
            match decoded {
                Ok((key, value)) => {
                    result.insert(key, value);
                }
                Err(e) => {
                    tracing::debug!("Skipping undecodable label: {}", e);
                    skipped += 1;
                }
            }
        }

        (result, skipped)
    }

    /// Merge a pull response into the wallet.
    ///
    /// Remote labels only replace local ones that are absent or empty,
    /// unless `force` is set. Labels and nonce are staged without flushing.
    pub fn apply_pull_response(
        wallet: &mut dyn LabelWallet,
        material: &SyncKeyMaterial,
        response: &PullResponse,
        force: bool,
    ) -> Result<MergeOutcome> {
        let Some(entries) = response.labels.as_deref() else {
            tracing::info!("no new labels for {}", wallet.basename());
            return Ok(MergeOutcome::default());
        };

        let (decoded, skipped) = Self::decode_labels(material, entries);

        let mut applied = 0;
        let labels = wallet.labels_mut();
        for (key, value) in decoded {
            let has_local = labels.get(&key).is_some_and(|v| !v.is_empty());
            if force || !has_local {
                labels.insert(key, value);
                applied += 1;
            }
        }

        let stored = labels_to_value(wallet.labels())?;
        wallet.put(LABELS_KEY, stored, false)?;
        let nonce = NonceStore::set_nonce(wallet, response.nonce.saturating_add(1), false)?;

        tracing::info!(
            "received {} labels for {} ({} applied, {} skipped)",
            entries.len(),
            wallet.basename(),
            applied,
            skipped
        );

        Ok(MergeOutcome {
            received: entries.len(),
            applied,
            skipped,
            nonce: Some(nonce),
        })
    }

    /// Upload every local label of `wallet`.
    pub async fn push_all(&self, wallet: &SharedWallet, material: &SyncKeyMaterial) -> Result<usize> {
        let bundle = {
            let mut guard = lock_wallet(wallet, "push all")?;
            Self::build_push_bundle(&mut *guard, material)?
        };

        let count = bundle.labels.len();
        self.service.push_all(&bundle).await?;
        tracing::info!("uploaded {} labels at nonce {}", count, bundle.wallet_nonce);
        Ok(count)
    }

    /// Ask the service for labels newer than the wallet's nonce.
    pub async fn fetch(
        &self,
        wallet: &SharedWallet,
        material: &SyncKeyMaterial,
        force: bool,
    ) -> Result<PullResponse> {
        let since = {
            let mut guard = lock_wallet(wallet, "pull nonce")?;
            Self::pull_since_nonce(&mut *guard, force)?
        };

        tracing::info!("asking for labels since nonce {}", since);
        self.service.pull_since(material.wallet_id(), since).await
    }

    /// Fetch and merge in one go.
    pub async fn pull(
        &self,
        wallet: &SharedWallet,
        material: &SyncKeyMaterial,
        force: bool,
    ) -> Result<MergeOutcome> {
        let response = self.fetch(wallet, material, force).await?;
        let mut guard = lock_wallet(wallet, "apply pull")?;
        Self::apply_pull_response(&mut *guard, material, &response, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_key_material;
    use crate::sync::nonce::NONCE_KEY;
    use crate::sync::testing::RecordingService;
    use crate::wallet::{share, MemoryWallet};
    use serde_json::json;

    fn material() -> SyncKeyMaterial {
        derive_key_material(["pub1", "pub2"]).unwrap()
    }

    fn entry(m: &SyncKeyMaterial, key: &str, value: &str) -> EncryptedLabelEntry {
        EncryptedLabelEntry {
            external_id: encode(m, key),
            encrypted_label: encode(m, value),
        }
    }

    fn response(labels: Option<Vec<EncryptedLabelEntry>>, nonce: u64) -> PullResponse {
        PullResponse { labels, nonce }
    }

    #[test]
    fn label_bundle_scenario() {
        let m = material();
        let bundle = ReconcileEngine::build_label_bundle(&m, 1, "addr1", "rent");
        assert_eq!(
            bundle,
            LabelBundle {
                wallet_id: "187da86d2d6bb32f43d111ed19573feaed560f22d59c3eb44edf694be2222a6c"
                    .to_string(),
                wallet_nonce: 1,
                external_id: "hQZPqLRoDQ3kmTLzbaGF2Q==".to_string(),
                encrypted_label: "FzzCkFLfI4fvvbOKF/F3fg==".to_string(),
            }
        );
    }

    #[test]
    fn push_bundle_encodes_all_labels_without_advancing_nonce() {
        let m = material();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"])
            .with_label("addr1", "rent")
            .with_label("tx9", "coffee");
        NonceStore::set_nonce(&mut wallet, 4, true).unwrap();

        let bundle = ReconcileEngine::build_push_bundle(&mut wallet, &m).unwrap();
        assert_eq!(bundle.wallet_nonce, 4);
        assert_eq!(bundle.labels.len(), 2);
        assert!(bundle.labels.contains(&entry(&m, "addr1", "rent")));
        assert_eq!(NonceStore::get_nonce(&mut wallet).unwrap(), 4);
    }

    #[test]
    fn pull_since_nonce_normal_and_forced() {
        let mut wallet = MemoryWallet::new("w", ["pub1"]);
        assert_eq!(ReconcileEngine::pull_since_nonce(&mut wallet, false).unwrap(), 0);

        NonceStore::set_nonce(&mut wallet, 8, true).unwrap();
        assert_eq!(ReconcileEngine::pull_since_nonce(&mut wallet, false).unwrap(), 7);
        assert_eq!(ReconcileEngine::pull_since_nonce(&mut wallet, true).unwrap(), 1);
    }

    #[test]
    fn new_remote_label_applied_regardless_of_force() {
        let m = material();
        for force in [false, true] {
            let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"]);
            let resp = response(Some(vec![entry(&m, "addr2", "car")]), 5);

            let outcome =
                ReconcileEngine::apply_pull_response(&mut wallet, &m, &resp, force).unwrap();

            assert_eq!(wallet.labels()["addr2"], "car");
            assert_eq!(outcome.nonce, Some(6));
            assert_eq!(NonceStore::get_nonce(&mut wallet).unwrap(), 6);
        }
    }

    #[test]
    fn normal_pull_keeps_non_empty_local_labels() {
        let m = material();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"])
            .with_label("addr1", "mine")
            .with_label("addr2", "");
        let resp = response(
            Some(vec![entry(&m, "addr1", "theirs"), entry(&m, "addr2", "filled")]),
            3,
        );

        let outcome = ReconcileEngine::apply_pull_response(&mut wallet, &m, &resp, false).unwrap();

        assert_eq!(wallet.labels()["addr1"], "mine");
        assert_eq!(wallet.labels()["addr2"], "filled");
        assert_eq!(outcome.applied, 1);
    }

    #[test]
    fn forced_pull_overwrites_every_received_key() {
        let m = material();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"])
            .with_label("addr1", "mine")
            .with_label("untouched", "stays");
        let resp = response(Some(vec![entry(&m, "addr1", "theirs")]), 3);

        ReconcileEngine::apply_pull_response(&mut wallet, &m, &resp, true).unwrap();

        assert_eq!(wallet.labels()["addr1"], "theirs");
        assert_eq!(wallet.labels()["untouched"], "stays");
    }

    #[test]
    fn null_labels_change_nothing() {
        let m = material();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"]).with_label("a", "b");
        NonceStore::set_nonce(&mut wallet, 2, true).unwrap();

        let outcome =
            ReconcileEngine::apply_pull_response(&mut wallet, &m, &response(None, 40), false)
                .unwrap();

        assert_eq!(outcome, MergeOutcome::default());
        assert_eq!(wallet.labels().len(), 1);
        assert_eq!(NonceStore::get_nonce(&mut wallet).unwrap(), 2);
    }

    #[test]
    fn one_bad_entry_of_three_is_skipped() {
        let m = material();
        let other = derive_key_material(["stale-device-key"]).unwrap();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"]);
        let resp = response(
            Some(vec![
                entry(&m, "a", "one"),
                EncryptedLabelEntry {
                    external_id: "%%% not base64".to_string(),
                    encrypted_label: encode(&other, "x"),
                },
                entry(&m, "c", "three"),
            ]),
            7,
        );

        let outcome = ReconcileEngine::apply_pull_response(&mut wallet, &m, &resp, false).unwrap();

        assert_eq!(outcome.received, 3);
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(wallet.labels()["a"], "one");
        assert_eq!(wallet.labels()["c"], "three");
        assert_eq!(outcome.nonce, Some(8));
    }

    #[test]
    fn merge_never_lowers_nonce() {
        let m = material();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"]);
        NonceStore::set_nonce(&mut wallet, 20, true).unwrap();

        let outcome = ReconcileEngine::apply_pull_response(
            &mut wallet,
            &m,
            &response(Some(vec![entry(&m, "k", "v")]), 4),
            true,
        )
        .unwrap();

        assert_eq!(outcome.nonce, Some(20));
        assert_eq!(NonceStore::get_nonce(&mut wallet).unwrap(), 20);
    }

    #[test]
    fn merge_stages_without_flushing() {
        let m = material();
        let mut wallet = MemoryWallet::new("w", ["pub1", "pub2"]);
        let flushes = wallet.flush_count();

        ReconcileEngine::apply_pull_response(
            &mut wallet,
            &m,
            &response(Some(vec![entry(&m, "k", "v")]), 1),
            false,
        )
        .unwrap();

        assert_eq!(wallet.flush_count(), flushes);
        assert!(wallet.persisted(LABELS_KEY).is_none());
        assert_eq!(wallet.get(LABELS_KEY), Some(json!({"k": "v"})));
        assert_eq!(wallet.get(NONCE_KEY), Some(json!(2)));
    }

    #[tokio::test]
    async fn pull_and_push_all_through_service() {
        let m = material();
        let service = Arc::new(RecordingService::new());
        let engine = ReconcileEngine::new(service.clone());
        let wallet = share(MemoryWallet::new("w", ["pub1", "pub2"]).with_label("addr1", "rent"));

        service.respond_to_pull(json!({
            "labels": [{"externalId": encode(&m, "addr2"), "encryptedLabel": encode(&m, "car")}],
            "nonce": 5
        }));
        let outcome = engine.pull(&wallet, &m, false).await.unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(service.pulls.lock().unwrap()[0], (m.wallet_id().to_string(), 0));

        let count = engine.push_all(&wallet, &m).await.unwrap();
        assert_eq!(count, 2);
        let batches = service.batches.lock().unwrap();
        assert_eq!(batches[0].wallet_nonce, 6);
        assert_eq!(batches[0].wallet_id, m.wallet_id());
    }
}
