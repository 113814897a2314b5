//! Vault session management.
//!
//! A session is an explicit value owned by one caller; there is no ambient
//! vault singleton. It walks `Locked → Unlocking → Unlocked → Locked`,
//! caches derived key material only while unlocked, and wipes it on lock.
//!
//! Derivation and bulk decryption are expensive and run on blocking worker
//! threads. Unlock attempts are serialized per session, and `lock()` takes
//! effect immediately: it bumps the session epoch, so results computed by
//! an in-flight operation against an older epoch are discarded rather than
//! surfaced.

use crate::crypto::envelope::{self, Envelope};
use crate::crypto::kdf::{derive_vault_key, KdfParams, VaultKey, SALT_LEN};
use crate::crypto::CryptoError;
use crate::store::{EntryStore, StoredEntry};
use crate::{KeywardError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;
use zeroize::Zeroizing;

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Unlocking,
    Unlocked,
}

/// A fully decrypted vault entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedEntry {
    pub label: String,
    pub username: String,
    pub password: String,
}

/// Per-entry outcome of a lenient batch decrypt.
#[derive(Debug)]
pub struct EntryOutcome {
    pub label: String,
    pub username: String,
    pub result: std::result::Result<String, CryptoError>,
}

struct KeyCache {
    state: SessionState,
    /// Master secret, retained while unlocked: stored blobs may carry
    /// heterogeneous salts, and decrypting one with an unseen salt needs a
    /// fresh derivation.
    secret: Option<Zeroizing<Vec<u8>>>,
    keys: HashMap<[u8; SALT_LEN], VaultKey>,
    /// Salt whose key new entries are encrypted under.
    active_salt: Option<[u8; SALT_LEN]>,
}

impl KeyCache {
    fn wipe(&mut self) {
        self.state = SessionState::Locked;
        self.secret = None;
        self.keys.clear();
        self.active_salt = None;
    }
}

/// An owned handle to one principal's vault.
pub struct VaultSession {
    owner: String,
    store: Arc<dyn EntryStore>,
    cache: Arc<StdMutex<KeyCache>>,
    epoch: Arc<AtomicU64>,
    unlock_gate: Arc<AsyncMutex<()>>,
}

impl VaultSession {
    pub fn new(owner: impl Into<String>, store: Arc<dyn EntryStore>) -> Self {
        Self {
            owner: owner.into(),
            store,
            cache: Arc::new(StdMutex::new(KeyCache {
                state: SessionState::Locked,
                secret: None,
                keys: HashMap::new(),
                active_salt: None,
            })),
            epoch: Arc::new(AtomicU64::new(0)),
            unlock_gate: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> SessionState {
        self.lock_cache().map(|c| c.state).unwrap_or(SessionState::Locked)
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// Attempt to unlock the vault with a candidate master password.
    ///
    /// Concurrent calls are serialized; a second attempt waits for the
    /// first instead of racing it. An empty store accepts the candidate
    /// outright (first-use bootstrap); otherwise the candidate is validated
    /// against a stored blob and a mismatch leaves the session `Locked`.
    pub async fn unlock(&self, candidate: &str) -> Result<()> {
        let _serial = self.unlock_gate.lock().await;

        {
            let mut cache = self.lock_cache()?;
            if cache.state == SessionState::Unlocked {
                return Ok(());
            }
            cache.state = SessionState::Unlocking;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let store = Arc::clone(&self.store);
        let owner = self.owner.clone();
        let candidate = Zeroizing::new(candidate.as_bytes().to_vec());

        let derived = tokio::task::spawn_blocking(move || -> Result<(Zeroizing<Vec<u8>>, VaultKey)> {
            let entries = store.get_all(&owner)?;
            match entries.first() {
                None => {
                    let key = derive_vault_key(&candidate, &KdfParams::new())?;
                    Ok((candidate, key))
                }
                Some(entry) => {
                    let probe = Envelope::decode(&entry.blob)?;
                    let key =
                        derive_vault_key(&candidate, &KdfParams::with_salt(probe.salt))?;
                    match envelope::open(&probe, &key) {
                        Ok(_) => Ok((candidate, key)),
                        Err(CryptoError::AuthenticationFailed) => {
                            Err(KeywardError::IncorrectPassword)
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            }
        })
        .await
        .map_err(|e| KeywardError::Task(e.to_string()))?;

        let mut cache = self.lock_cache()?;
        let (secret, key) = match derived {
            Ok(pair) => pair,
            Err(e) => {
                cache.wipe();
                return Err(e);
            }
        };

        // Locked while we were deriving: discard the result.
        if self.epoch.load(Ordering::SeqCst) != epoch {
            cache.wipe();
            return Err(KeywardError::VaultLocked);
        }

        cache.active_salt = Some(*key.salt());
        cache.keys.insert(*key.salt(), key);
        cache.secret = Some(secret);
        cache.state = SessionState::Unlocked;
        tracing::debug!(owner = %self.owner, "vault unlocked");
        Ok(())
    }

    /// Encrypt and upsert one entry. Valid only while unlocked; reuses the
    /// cached key so no derivation runs.
    pub async fn add_or_update(&self, label: &str, username: &str, plaintext: &str) -> Result<()> {
        if label.trim().is_empty() {
            return Err(KeywardError::Validation(
                "Entry label cannot be empty".to_string(),
            ));
        }

        let key = {
            let cache = self.lock_cache()?;
            if cache.state != SessionState::Unlocked {
                return Err(KeywardError::VaultLocked);
            }
            let salt = cache.active_salt.ok_or(KeywardError::VaultLocked)?;
            cache.keys.get(&salt).cloned().ok_or(KeywardError::VaultLocked)?
        };

        let blob = envelope::encrypt_with_key(plaintext, &key)?;

        // Re-check: a lock while encrypting must win.
        if !self.is_unlocked() {
            return Err(KeywardError::VaultLocked);
        }
        self.store.upsert(&self.owner, label, username, &blob)?;
        Ok(())
    }

    /// Decrypt every stored entry.
    ///
    /// Strict policy: any authentication failure locks the session and
    /// surfaces a vault-integrity error; no partial plaintext is returned.
    pub async fn list_decrypted(&self) -> Result<Vec<DecryptedEntry>> {
        let outcomes = self.decrypt_all().await?;

        let mut entries = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome.result {
                Ok(password) => entries.push(DecryptedEntry {
                    label: outcome.label,
                    username: outcome.username,
                    password,
                }),
                Err(CryptoError::AuthenticationFailed) => {
                    self.lock();
                    return Err(KeywardError::VaultIntegrity);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    /// Decrypt every stored entry, reporting failures per item.
    ///
    /// A corrupt row does not abort the batch and does not lock the
    /// session; reacting to the failures is the caller's policy.
    pub async fn list_decrypted_lenient(&self) -> Result<Vec<EntryOutcome>> {
        self.decrypt_all().await
    }

    /// Remove one entry. No cryptographic material is involved.
    pub async fn delete(&self, label: &str) -> Result<()> {
        self.store.delete(&self.owner, label)?;
        Ok(())
    }

    /// Lock the vault, discarding cached key material. Effective
    /// immediately; always safe to call. In-flight operations started
    /// before the lock observe the epoch change and discard their results.
    pub fn lock(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cache) = self.lock_cache() {
            cache.wipe();
        }
        tracing::debug!(owner = %self.owner, "vault locked");
    }

    async fn decrypt_all(&self) -> Result<Vec<EntryOutcome>> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let (secret, keys) = {
            let cache = self.lock_cache()?;
            if cache.state != SessionState::Unlocked {
                return Err(KeywardError::VaultLocked);
            }
            let secret = cache.secret.clone().ok_or(KeywardError::VaultLocked)?;
            (secret, cache.keys.clone())
        };

        let store = Arc::clone(&self.store);
        let owner = self.owner.clone();

        let (outcomes, keys) = tokio::task::spawn_blocking(
            move || -> Result<(Vec<EntryOutcome>, HashMap<[u8; SALT_LEN], VaultKey>)> {
                let entries = store.get_all(&owner)?;
                let mut keys = keys;
                let outcomes = entries
                    .into_iter()
                    .map(|entry| decrypt_entry(entry, &secret, &mut keys))
                    .collect();
                Ok((outcomes, keys))
            },
        )
        .await
        .map_err(|e| KeywardError::Task(e.to_string()))??;

        let mut cache = self.lock_cache()?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // Locked while decrypting: the results are stale, drop them.
            return Err(KeywardError::VaultLocked);
        }
        if cache.state == SessionState::Unlocked {
            cache.keys.extend(keys);
        }
        Ok(outcomes)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, KeyCache>> {
        self.cache
            .lock()
            .map_err(|_| KeywardError::Task("Session cache poisoned".to_string()))
    }
}

fn decrypt_entry(
    entry: StoredEntry,
    secret: &[u8],
    keys: &mut HashMap<[u8; SALT_LEN], VaultKey>,
) -> EntryOutcome {
    let result = Envelope::decode(&entry.blob).and_then(|probe| {
        let key = match keys.get(&probe.salt) {
            Some(key) => key.clone(),
            None => {
                let key = derive_vault_key(secret, &KdfParams::with_salt(probe.salt))?;
                keys.insert(probe.salt, key.clone());
                key
            }
        };
        envelope::open(&probe, &key)
    });
    EntryOutcome {
        label: entry.label,
        username: entry.username,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use base64::{engine::general_purpose::STANDARD, Engine};

    /// In-memory store double; keyed by (owner, label).
    #[derive(Default)]
    struct MemoryStore {
        rows: StdMutex<Vec<(String, StoredEntry)>>,
    }

    impl MemoryStore {
        fn corrupt_last_byte(&self, owner: &str, label: &str) {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|(o, e)| o == owner && e.label == label)
                .expect("row exists");
            let mut raw = STANDARD.decode(&row.1.blob).unwrap();
            *raw.last_mut().unwrap() ^= 0x01;
            row.1.blob = STANDARD.encode(raw);
        }
    }

    impl EntryStore for MemoryStore {
        fn get_all(&self, owner: &str) -> std::result::Result<Vec<StoredEntry>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(o, _)| o == owner)
                .map(|(_, e)| e.clone())
                .collect())
        }

        fn upsert(
            &self,
            owner: &str,
            label: &str,
            username: &str,
            blob: &str,
        ) -> std::result::Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let entry = StoredEntry {
                label: label.to_string(),
                username: username.to_string(),
                blob: blob.to_string(),
            };
            if let Some(row) = rows.iter_mut().find(|(o, e)| o == owner && e.label == label) {
                row.1 = entry;
            } else {
                rows.push((owner.to_string(), entry));
            }
            Ok(())
        }

        fn delete(&self, owner: &str, label: &str) -> std::result::Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|(o, e)| !(o == owner && e.label == label));
            if rows.len() == before {
                return Err(StoreError::NotFound(label.to_string()));
            }
            Ok(())
        }
    }

    fn session(store: &Arc<MemoryStore>) -> VaultSession {
        VaultSession::new("alice", Arc::clone(store) as Arc<dyn EntryStore>)
    }

    #[tokio::test]
    async fn test_bootstrap_add_relock_and_list() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);

        // Empty vault: first-use bootstrap accepts the candidate.
        vault.unlock("p1").await.unwrap();
        assert!(vault.is_unlocked());

        vault.add_or_update("GitHub", "alice", "g-pass").await.unwrap();
        vault.lock();
        assert_eq!(vault.state(), SessionState::Locked);

        vault.unlock("p1").await.unwrap();
        let entries = vault.list_decrypted().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, "GitHub");
        assert_eq!(entries[0].username, "alice");
        assert_eq!(entries[0].password, "g-pass");
    }

    #[tokio::test]
    async fn test_wrong_password_against_nonempty_vault_stays_locked() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);

        vault.unlock("p1").await.unwrap();
        vault.add_or_update("GitHub", "alice", "g-pass").await.unwrap();
        vault.lock();

        let err = vault.unlock("wrong").await.unwrap_err();
        assert!(matches!(err, KeywardError::IncorrectPassword));
        assert_eq!(vault.state(), SessionState::Locked);

        // Operations stay rejected while locked.
        assert!(matches!(
            vault.add_or_update("X", "u", "p").await.unwrap_err(),
            KeywardError::VaultLocked
        ));
        assert!(matches!(
            vault.list_decrypted().await.unwrap_err(),
            KeywardError::VaultLocked
        ));
    }

    #[tokio::test]
    async fn test_strict_list_locks_on_corruption() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);

        vault.unlock("p1").await.unwrap();
        vault.add_or_update("one", "u1", "s1").await.unwrap();
        vault.add_or_update("two", "u2", "s2").await.unwrap();
        store.corrupt_last_byte("alice", "two");

        let err = vault.list_decrypted().await.unwrap_err();
        assert!(matches!(err, KeywardError::VaultIntegrity));
        assert_eq!(vault.state(), SessionState::Locked);
    }

    #[tokio::test]
    async fn test_lenient_list_reports_per_item() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);

        vault.unlock("p1").await.unwrap();
        for (label, value) in [("a", "s1"), ("b", "s2"), ("c", "s3")] {
            vault.add_or_update(label, "user", value).await.unwrap();
        }
        store.corrupt_last_byte("alice", "b");

        let outcomes = vault.list_decrypted_lenient().await.unwrap();
        assert_eq!(outcomes.len(), 3);

        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.label.as_str())
            .collect();
        assert_eq!(failed, ["b"]);
        assert!(matches!(
            outcomes[1].result,
            Err(CryptoError::AuthenticationFailed)
        ));
        assert_eq!(outcomes[0].result.as_deref().unwrap(), "s1");
        assert_eq!(outcomes[2].result.as_deref().unwrap(), "s3");

        // Lenient mode leaves the locking decision to the caller.
        assert!(vault.is_unlocked());
    }

    #[tokio::test]
    async fn test_decrypts_entries_with_foreign_salts() {
        let store = Arc::new(MemoryStore::default());

        // Entry written outside any session, with its own fresh salt.
        let blob = envelope::encrypt("imported-secret", "p1").unwrap();
        store.upsert("alice", "Imported", "alice", &blob).unwrap();

        let vault = session(&store);
        vault.unlock("p1").await.unwrap();
        vault.add_or_update("Native", "alice", "native-secret").await.unwrap();

        let mut entries = vault.list_decrypted().await.unwrap();
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        assert_eq!(entries[0].password, "imported-secret");
        assert_eq!(entries[1].password, "native-secret");
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent_while_unlocked() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);
        vault.unlock("p1").await.unwrap();
        vault.unlock("anything").await.unwrap();
        assert!(vault.is_unlocked());
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);
        vault.unlock("p1").await.unwrap();
        assert!(matches!(
            vault.add_or_update("  ", "u", "p").await.unwrap_err(),
            KeywardError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_forwards_to_store() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);
        vault.unlock("p1").await.unwrap();
        vault.add_or_update("GitHub", "alice", "g-pass").await.unwrap();

        vault.delete("GitHub").await.unwrap();
        assert!(vault.list_decrypted().await.unwrap().is_empty());
        assert!(vault.delete("GitHub").await.is_err());
    }

    #[tokio::test]
    async fn test_lock_is_immediate_and_repeatable() {
        let store = Arc::new(MemoryStore::default());
        let vault = session(&store);
        vault.unlock("p1").await.unwrap();
        vault.lock();
        vault.lock();
        assert_eq!(vault.state(), SessionState::Locked);
    }
}
