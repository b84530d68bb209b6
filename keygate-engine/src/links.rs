//! Identity link store over fjall partitions
//!
//! Layout:
//! - `links`: pubkey hex → JSON [`IdentityLink`]
//! - `subject_keys`: `<subject>\0<pubkey>` → empty, one entry per active link
//!
//! Mutations run inside a write transaction. fjall admits one write
//! transaction at a time, so concurrent `link` calls for the same key are
//! serialized and at most one of them can create an active link.

use crate::{storage_error, StorageEngine};
use chrono::Utc;
use fjall::{PartitionCreateOptions, TxPartitionHandle, WriteTransaction};
use keygate_core::*;
use tracing::{debug, info};

const LINKS_PARTITION: &str = "links";
const SUBJECT_KEYS_PARTITION: &str = "subject_keys";
const INDEX_SEPARATOR: char = '\0';

/// Durable [`IdentityLinkStore`]
#[derive(Clone)]
pub struct FjallLinkStore {
    engine: StorageEngine,
    links: TxPartitionHandle,
    subject_keys: TxPartitionHandle,
}

impl FjallLinkStore {
    pub(crate) fn open(engine: StorageEngine) -> Result<Self> {
        let keyspace = engine.keyspace();
        let links = keyspace
            .open_partition(LINKS_PARTITION, PartitionCreateOptions::default())
            .map_err(storage_error)?;
        let subject_keys = keyspace
            .open_partition(SUBJECT_KEYS_PARTITION, PartitionCreateOptions::default())
            .map_err(storage_error)?;

        Ok(FjallLinkStore {
            engine,
            links,
            subject_keys,
        })
    }

    /// Current record for `pubkey`, active or not
    pub fn get(&self, pubkey: &PubKey) -> Result<Option<IdentityLink>> {
        match self.links.get(pubkey.as_str()).map_err(storage_error)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn index_key(subject: &SubjectId, pubkey: &PubKey) -> String {
        format!("{}{}{}", subject.as_str(), INDEX_SEPARATOR, pubkey.as_str())
    }

    fn index_prefix(subject: &SubjectId) -> String {
        format!("{}{}", subject.as_str(), INDEX_SEPARATOR)
    }

    fn load(&self, tx: &WriteTransaction, pubkey: &PubKey) -> Result<Option<IdentityLink>> {
        match tx.get(&self.links, pubkey.as_str()).map_err(storage_error)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, tx: &mut WriteTransaction, link: &IdentityLink) -> Result<()> {
        let value = serde_json::to_vec(link)?;
        tx.insert(&self.links, link.pubkey.as_str(), value);
        Ok(())
    }

    fn commit(&self, tx: WriteTransaction) -> Result<()> {
        tx.commit().map_err(storage_error)?;
        self.engine.persist()
    }
}

impl IdentityLinkStore for FjallLinkStore {
    fn link(&self, pubkey: &PubKey, subject: &SubjectId) -> Result<IdentityLink> {
        let mut tx = self.engine.keyspace().write_tx();
        let now = Utc::now();

        let link = match self.load(&tx, pubkey)? {
            Some(existing) if existing.active && &existing.subject_id == subject => {
                debug!(%pubkey, %subject, "link already present");
                return Ok(existing);
            }
            Some(existing) if existing.active => {
                debug!(%pubkey, owner = %existing.subject_id, requested = %subject, "key linked elsewhere");
                return Err(KeygateError::LinkConflict);
            }
            Some(mut existing) => {
                existing.active = true;
                existing.subject_id = subject.clone();
                existing.linked_at = now;
                existing
            }
            None => IdentityLink::new(pubkey.clone(), subject.clone(), now),
        };

        self.save(&mut tx, &link)?;
        tx.insert(&self.subject_keys, Self::index_key(subject, pubkey), "");
        self.commit(tx)?;

        info!(%pubkey, %subject, "linked key");
        Ok(link)
    }

    fn unlink(&self, pubkey: &PubKey, subject: &SubjectId) -> Result<IdentityLink> {
        let mut tx = self.engine.keyspace().write_tx();

        let mut link = self
            .load(&tx, pubkey)?
            .ok_or(KeygateError::UnknownPrincipal)?;

        if &link.subject_id != subject {
            return Err(KeygateError::NotOwner);
        }
        if !link.active {
            return Err(KeygateError::AlreadyUnlinked);
        }

        link.active = false;
        self.save(&mut tx, &link)?;
        tx.remove(&self.subject_keys, Self::index_key(subject, pubkey));
        self.commit(tx)?;

        info!(%pubkey, %subject, "unlinked key");
        Ok(link)
    }

    fn resolve(&self, pubkey: &PubKey) -> Result<SubjectId> {
        match self.get(pubkey)? {
            None => Err(KeygateError::UnknownPrincipal),
            Some(link) if !link.active => Err(KeygateError::InactiveAccount),
            Some(link) => Ok(link.subject_id),
        }
    }

    fn list_active(&self, subject: &SubjectId) -> Result<Vec<IdentityLink>> {
        let rtx = self.engine.keyspace().read_tx();
        let prefix = Self::index_prefix(subject);
        let mut active = Vec::new();

        for item in rtx.prefix(&self.subject_keys, prefix.as_bytes()) {
            let (key, _) = item.map_err(storage_error)?;
            let Some(pubkey) = key.get(prefix.len()..) else {
                continue;
            };

            let Some(bytes) = rtx.get(&self.links, pubkey).map_err(storage_error)? else {
                continue;
            };
            let link: IdentityLink = serde_json::from_slice(&bytes)?;
            if link.active && &link.subject_id == subject {
                active.push(link);
            }
        }

        Ok(active)
    }

    fn touch(&self, pubkey: &PubKey) -> Result<()> {
        let mut tx = self.engine.keyspace().write_tx();

        let mut link = self
            .load(&tx, pubkey)?
            .ok_or(KeygateError::UnknownPrincipal)?;
        link.last_used_at = Some(Utc::now());

        self.save(&mut tx, &link)?;
        tx.commit().map_err(storage_error)
    }
}

impl std::fmt::Debug for FjallLinkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallLinkStore").finish_non_exhaustive()
    }
}
