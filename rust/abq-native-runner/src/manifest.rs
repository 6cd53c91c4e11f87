//! Manifest generation.
//!
//! The manifest lists every test in exactly the order the selective runner
//! will later visit them: within a group, its own tests first, then its
//! child groups, each ordered by the group's strategy. Runners replaying the
//! manifest in other processes depend on that order matching.

use std::collections::BTreeMap;
use std::time::SystemTime;

use abq_protocol::{Manifest, ManifestMember};

use crate::host::{GroupNode, TestTree};
use crate::metadata::extract_metadata_and_tags;
use crate::ordering::{self, GlobalOrdering, OrderingStrategy};
use crate::WorkerError;

/// Build the manifest for `tree` under the host's global ordering and seed.
///
/// Fails if the global ordering is not one every runner can reproduce.
pub fn generate(
    tree: &TestTree,
    seed: u64,
    global: &GlobalOrdering,
    modified_at: BTreeMap<String, SystemTime>,
) -> Result<Manifest, WorkerError> {
    let init_meta = ordering::to_meta(seed, global)?;
    let strategy =
        OrderingStrategy::new(global.supported()?, seed).with_modification_times(modified_at);
    Ok(Manifest {
        init_meta,
        members: members(tree, &strategy),
    })
}

/// Top-level manifest members for `tree`, empty groups pruned.
pub fn members(tree: &TestTree, strategy: &OrderingStrategy) -> Vec<ManifestMember> {
    strategy
        .order(&tree.groups, None)
        .into_iter()
        .filter_map(|group| to_manifest_group(group, strategy))
        .collect()
}

fn to_manifest_group(group: &GroupNode, strategy: &OrderingStrategy) -> Option<ManifestMember> {
    let mut members: Vec<ManifestMember> = strategy
        .order(&group.tests, group.ordering)
        .into_iter()
        .map(|test| {
            let (tags, meta) = extract_metadata_and_tags(&test.metadata);
            ManifestMember::Test {
                id: test.id.clone(),
                tags,
                meta,
            }
        })
        .collect();

    members.extend(
        strategy
            .order(&group.children, group.ordering)
            .into_iter()
            .filter_map(|child| to_manifest_group(child, strategy)),
    );

    if members.is_empty() {
        return None;
    }

    let (tags, meta) = extract_metadata_and_tags(&group.metadata);
    Some(ManifestMember::Group {
        name: group.id.clone(),
        tags,
        meta,
        members,
    })
}
