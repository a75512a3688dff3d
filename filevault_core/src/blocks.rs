//! The content block store.
//!
//! Block records carry the hash, size and reference count; payload bytes live
//! in [`crate::payload::PayloadStore`]. Callers hold the hash's stripe lock
//! around any sequence that pairs a payload file change with a block change.

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::record_store::{Transaction, View};
use crate::records::ContentBlock;
use chrono::Utc;
use tracing::debug;

/// Hash a payload.
pub fn hash(payload: &[u8]) -> ContentHash {
    ContentHash::of(payload)
}

pub(crate) fn find_block<V: View>(view: &V, hash: &ContentHash) -> Option<ContentBlock> {
    view.find_by_key(&hash.to_hex())
}

/// Take a reference on the block for `hash`, creating it if needed.
///
/// Returns the block and whether it was created by this call.
pub(crate) fn acquire_or_create<T: Transaction>(
    tx: &mut T,
    hash: &ContentHash,
    size: u64,
) -> Result<(ContentBlock, bool)> {
    if let Some(block) = find_block(tx, hash) {
        return increment(tx, block).map(|block| (block, false));
    }

    let created = tx.create(ContentBlock {
        id: 0,
        hash: *hash,
        size,
        ref_count: 1,
        created_at: Utc::now(),
    });

    match created {
        Ok(block) => {
            debug!(%hash, size, "created content block");
            Ok((block, true))
        }
        Err(Error::ConstraintViolation { .. }) => {
            let block = find_block(tx, hash).ok_or_else(|| {
                Error::consistency(format!("block {} vanished after key conflict", hash))
            })?;
            increment(tx, block).map(|block| (block, false))
        }
        Err(e) => Err(e),
    }
}

/// Take a reference on a block that must already exist.
pub(crate) fn acquire<T: Transaction>(tx: &mut T, hash: &ContentHash) -> Result<ContentBlock> {
    let block = find_block(tx, hash)
        .ok_or_else(|| Error::consistency(format!("acquire of missing block {}", hash)))?;
    increment(tx, block)
}

fn increment<T: Transaction>(tx: &mut T, mut block: ContentBlock) -> Result<ContentBlock> {
    block.ref_count += 1;
    tx.update(&block)?;
    debug!(hash = %block.hash, ref_count = block.ref_count, "reused content block");
    Ok(block)
}

/// Drop one reference on the block for `hash`.
///
/// Returns the remaining count. At zero the block record is deleted; the
/// payload file is left for the caller to remove after commit.
pub(crate) fn release<T: Transaction>(tx: &mut T, hash: &ContentHash) -> Result<u64> {
    let mut block = find_block(tx, hash)
        .ok_or_else(|| Error::consistency(format!("release of missing block {}", hash)))?;

    if block.ref_count == 0 {
        return Err(Error::consistency(format!(
            "release of block {} with zero references",
            hash
        )));
    }

    block.ref_count -= 1;
    if block.ref_count == 0 {
        tx.delete::<ContentBlock>(block.id)?;
        debug!(%hash, "released last reference to content block");
    } else {
        tx.update(&block)?;
    }

    Ok(block.ref_count)
}
