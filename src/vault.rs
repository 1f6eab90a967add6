//! Encrypted account vault
//!
//! Records are sealed with the tenant key that was presented on `add`
//! and can only be read, edited, or deleted by presenting the same key
//! again. No key, hash, or key-check value is stored: a wrong key is
//! indistinguishable from a missing row.

use crate::account::{AccountId, AccountRecord, VaultEntry};
use crate::cipher::CredentialCipher;
use crate::error::{Error, Result};
use crate::store::{MemoryStore, Store};
use tracing::{debug, info, warn};

/// Upper bound on conditional-write retries when another writer keeps
/// changing the same row between our read and our write.
const MAX_WRITE_ATTEMPTS: usize = 16;

/// CRUD over encrypted [`AccountRecord`]s, scoped by tenant key.
#[derive(Debug)]
pub struct CredentialVault<S = MemoryStore> {
    store: S,
    cipher: CredentialCipher,
}

impl<S: Store> CredentialVault<S> {
    #[must_use]
    pub const fn new(store: S, cipher: CredentialCipher) -> Self {
        Self { store, cipher }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Look up one record.
    ///
    /// Returns `None` both when nothing is stored at `id` and when the
    /// stored blob does not open under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn one(&self, key: &str, id: AccountId) -> Result<Option<AccountRecord>> {
        Ok(self
            .store
            .get(id)?
            .and_then(|blob| self.open(key, id, &blob)))
    }

    /// Every record that opens under `key`. Rows sealed under other keys
    /// are skipped silently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn all(&self, key: &str) -> Result<Vec<VaultEntry>> {
        let rows = self.store.scan()?;
        let total = rows.len();

        let entries: Vec<VaultEntry> = rows
            .into_iter()
            .filter_map(|(id, blob)| {
                self.open(key, id, &blob)
                    .map(|record| VaultEntry { id, record })
            })
            .collect();

        debug!(
            returned = entries.len(),
            skipped = total - entries.len(),
            "Listed vault entries"
        );
        Ok(entries)
    }

    /// Seal and store a new record, returning its freshly assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store is unavailable, or
    /// [`Error::InvalidArgument`] if the key cannot be used.
    pub fn add(&self, key: &str, record: &AccountRecord) -> Result<AccountId> {
        let plaintext = record.to_plaintext()?;
        let id = self.store.allocate_id()?;
        let blob = self.cipher.encrypt(&plaintext, key, &id.to_aad())?;
        self.store.insert(id, blob)?;

        info!(%id, "Added account");
        Ok(id)
    }

    /// Overwrite the record at `id`. Returns `false` without writing
    /// anything if no record at `id` opens under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store is unavailable or the row
    /// keeps changing underneath us.
    pub fn edit(&self, key: &str, id: AccountId, record: &AccountRecord) -> Result<bool> {
        let plaintext = record.to_plaintext()?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.owned_blob(key, id)? else {
                return Ok(false);
            };
            let blob = self.cipher.encrypt(&plaintext, key, &id.to_aad())?;
            if self.store.compare_and_swap(id, &current, blob)? {
                info!(%id, "Edited account");
                return Ok(true);
            }
            debug!(%id, "Row changed during edit, retrying");
        }

        Err(contended(id))
    }

    /// Remove the record at `id`. Returns `false` if no record at `id`
    /// opens under `key`, so a second delete is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store is unavailable or the row
    /// keeps changing underneath us.
    pub fn delete(&self, key: &str, id: AccountId) -> Result<bool> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.owned_blob(key, id)? else {
                return Ok(false);
            };
            if self.store.remove_if(id, &current)? {
                info!(%id, "Deleted account");
                return Ok(true);
            }
            debug!(%id, "Row changed during delete, retrying");
        }

        Err(contended(id))
    }

    /// The raw blob at `id`, if it opens under `key`.
    fn owned_blob(&self, key: &str, id: AccountId) -> Result<Option<Vec<u8>>> {
        Ok(self
            .store
            .get(id)?
            .filter(|blob| self.open(key, id, blob).is_some()))
    }

    fn open(&self, key: &str, id: AccountId, blob: &[u8]) -> Option<AccountRecord> {
        let plaintext = self.cipher.decrypt(blob, key, &id.to_aad()).ok()?;
        match AccountRecord::from_plaintext(&plaintext) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(%id, "Authenticated row failed to deserialize: {e}");
                None
            }
        }
    }
}

fn contended(id: AccountId) -> Error {
    Error::Storage(format!("Row {id} kept changing during update"))
}
