//! Concurrent mutations and bookkeeping conservation.

use filevault_core::{
    ContentBlock, Error, OwnerId, RecordStore, Vault, VaultConfig, View, by_id, hash,
};
use proptest::prelude::*;
use std::thread;
use tempfile::TempDir;

const THREADS: usize = 8;

fn setup() -> (TempDir, Vault, OwnerId) {
    let temp_dir = TempDir::new().unwrap();
    let vault = Vault::init(temp_dir.path(), VaultConfig::default()).unwrap();
    let owner = vault.create_account(Some(1 << 20)).unwrap().id;
    (temp_dir, vault, owner)
}

fn all_blocks(vault: &Vault) -> Vec<ContentBlock> {
    vault
        .records()
        .read(|view| view.find_many(|_: &ContentBlock| true, by_id, None))
}

#[test]
fn test_identical_concurrent_uploads_share_one_block() {
    let (_tmp, vault, owner) = setup();
    let payload = vec![42u8; 2048];

    thread::scope(|scope| {
        for i in 0..THREADS {
            let vault = &vault;
            let payload = &payload;
            scope.spawn(move || {
                vault
                    .upload(owner, "/race", &format!("copy-{}.bin", i), payload, "")
                    .unwrap();
            });
        }
    });

    let blocks = all_blocks(&vault);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].hash, hash(&payload));
    assert_eq!(blocks[0].ref_count, THREADS as u64);

    let account = vault.account(owner).unwrap();
    assert_eq!(account.quota_used, 2048);
    assert_eq!(account.storage_saved, 2048 * (THREADS as u64 - 1));

    assert_eq!(vault.list_children(owner, "/race").unwrap().len(), THREADS);
    assert!(vault.check_consistency().is_healthy());
}

#[test]
fn test_concurrent_upload_delete_churn_leaves_no_residue() {
    let (_tmp, vault, owner) = setup();
    let payload = b"churning payload".to_vec();

    thread::scope(|scope| {
        for i in 0..THREADS {
            let vault = &vault;
            let payload = &payload;
            scope.spawn(move || {
                let name = format!("f{}", i);
                for _ in 0..20 {
                    vault.upload(owner, "/churn", &name, payload, "").unwrap();
                    vault
                        .delete_file(owner, &format!("/churn/{}", name))
                        .unwrap();
                }
            });
        }
    });

    assert!(all_blocks(&vault).is_empty());
    assert!(vault.payloads().list().unwrap().is_empty());
    assert_eq!(vault.account(owner).unwrap().quota_used, 0);
    assert!(vault.check_consistency().is_healthy());
}

#[test]
fn test_concurrent_links_and_deletes_keep_refcounts() {
    let (_tmp, vault, owner) = setup();
    vault.upload(owner, "/", "origin", b"linked content", "").unwrap();

    thread::scope(|scope| {
        for i in 0..THREADS {
            let vault = &vault;
            scope.spawn(move || {
                let dest = format!("/links/l{}", i);
                vault.hard_link(owner, "/origin", &dest).unwrap();
                if i % 2 == 0 {
                    vault.delete_file(owner, &dest).unwrap();
                }
            });
        }
    });

    let blocks = all_blocks(&vault);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].ref_count, 1 + THREADS as u64 / 2);
    let report = vault.check_consistency();
    assert!(report.is_healthy(), "{:?}", report.problems);
}

#[test]
fn test_overlapping_directory_creation() {
    let (_tmp, vault, owner) = setup();

    thread::scope(|scope| {
        for i in 0..THREADS {
            let vault = &vault;
            scope.spawn(move || {
                vault
                    .insert_directory(owner, &format!("/shared/deep/d{}", i), false)
                    .unwrap();
            });
        }
    });

    let shared = vault.list_children(owner, "/shared").unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(
        vault.list_children(owner, "/shared/deep").unwrap().len(),
        THREADS
    );
}

#[derive(Debug, Clone)]
enum Op {
    Upload { slot: usize, content: usize },
    HardLink { from: usize, to: usize },
    Delete { slot: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6usize, 0..3usize).prop_map(|(slot, content)| Op::Upload { slot, content }),
        (0..6usize, 0..6usize).prop_map(|(from, to)| Op::HardLink { from, to }),
        (0..6usize).prop_map(|slot| Op::Delete { slot }),
    ]
}

fn slot_path(slot: usize) -> String {
    format!("/dir{}/file{}", slot % 2, slot)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_refcount_and_quota_conservation(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let (_tmp, vault, owner) = setup();
        let contents: [Vec<u8>; 3] = [vec![1u8; 10], vec![2u8; 20], vec![3u8; 5000]];

        for op in &ops {
            let result = match op {
                Op::Upload { slot, content } => {
                    let path = slot_path(*slot);
                    let (dir, name) = path.rsplit_once('/').unwrap();
                    vault.upload(owner, dir, name, &contents[*content], "").map(|_| ())
                }
                Op::HardLink { from, to } => vault
                    .hard_link(owner, &slot_path(*from), &slot_path(*to))
                    .map(|_| ()),
                Op::Delete { slot } => vault.delete_file(owner, &slot_path(*slot)),
            };

            if let Err(e) = result {
                prop_assert!(
                    matches!(
                        e,
                        Error::FileExists { .. }
                            | Error::DestExists { .. }
                            | Error::NotFound { .. }
                            | Error::SourceNotFound { .. }
                    ),
                    "unexpected error: {}",
                    e
                );
            }
        }

        let report = vault.check_consistency();
        prop_assert!(report.is_healthy(), "{:?}", report.problems);

        // No payload outlives its block
        prop_assert_eq!(vault.payloads().list().unwrap().len(), all_blocks(&vault).len());

        let account = vault.account(owner).unwrap();
        prop_assert!(account.quota_used <= account.quota_max);
    }
}
