//! Duplicate grouping over perceptual fingerprints.
//!
//! Two images are linked when their Hamming distance is at most
//! `max_distance`; groups are the connected components of that relation
//! (union-find), so membership is symmetric and transitive by construction.
//! Groups are listed in discovery order of their first member, members in
//! discovery order within a group.

pub mod review;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::DuplicatesConfig;
use crate::pipeline::hash::{hamming, Fingerprint};
use crate::types::{DuplicatePair, ImageRecord};

pub use review::{ReviewSession, ReviewState};

/// Two or more images whose fingerprints link them as duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    members: Vec<ImageRecord>,
}

impl DuplicateGroup {
    pub fn members(&self) -> &[ImageRecord] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// A group with fewer than two members no longer describes a duplicate.
    pub fn is_retired(&self) -> bool {
        self.members.len() < 2
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| m.path.clone()).collect()
    }

    /// Remove a member by path. Returns whether it was present.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.path != path);
        self.members.len() != before
    }

    /// The first member paired with each other member.
    pub fn pairs(&self) -> Vec<DuplicatePair> {
        let Some((first, rest)) = self.members.split_first() else {
            return vec![];
        };
        rest.iter()
            .filter_map(|other| {
                let (a, b) = (first.hash.as_ref()?, other.hash.as_ref()?);
                let distance = a.distance(b)?;
                let bits = a.bit_len().max(1);
                Some(DuplicatePair {
                    left: first.path.clone(),
                    right: other.path.clone(),
                    distance,
                    similarity: 1.0 - distance as f64 / bits as f64,
                })
            })
            .collect()
    }
}

/// Groups records by fingerprint distance.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateGrouper {
    max_distance: u32,
}

impl DuplicateGrouper {
    pub fn new(config: &DuplicatesConfig) -> Self {
        Self {
            max_distance: config.max_distance,
        }
    }

    /// Group records, which must be in discovery order. Records without a
    /// fingerprint never group.
    pub fn group(&self, records: &[ImageRecord]) -> Vec<DuplicateGroup> {
        let n = records.len();
        let mut parent: Vec<usize> = (0..n).collect();
        let mut rank = vec![0usize; n];

        let decoded: Vec<_> = records
            .iter()
            .map(|r| r.hash.as_ref().and_then(Fingerprint::decode))
            .collect();
        for i in 0..n {
            let Some(hi) = decoded[i].as_ref() else {
                continue;
            };
            for j in (i + 1)..n {
                let Some(hj) = decoded[j].as_ref() else {
                    continue;
                };
                if hamming(hi, hj).is_some_and(|d| d <= self.max_distance) {
                    union(&mut parent, &mut rank, i, j);
                }
            }
        }

        // Bucket by root, keeping the order in which roots are first seen.
        let mut slot_of_root: Vec<Option<usize>> = vec![None; n];
        let mut buckets: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = find(&mut parent, i);
            match slot_of_root[root] {
                Some(slot) => buckets[slot].push(i),
                None => {
                    slot_of_root[root] = Some(buckets.len());
                    buckets.push(vec![i]);
                }
            }
        }

        let groups: Vec<DuplicateGroup> = buckets
            .into_iter()
            .filter(|bucket| bucket.len() >= 2)
            .map(|bucket| DuplicateGroup {
                members: bucket.into_iter().map(|i| records[i].clone()).collect(),
            })
            .collect();

        tracing::debug!(
            "Grouped {} images into {} duplicate groups (max distance {})",
            n,
            groups.len(),
            self.max_distance
        );
        groups
    }
}

fn find(parent: &mut [usize], i: usize) -> usize {
    if parent[i] != i {
        parent[i] = find(parent, parent[i]);
    }
    parent[i]
}

fn union(parent: &mut [usize], rank: &mut [usize], i: usize, j: usize) {
    let (pi, pj) = (find(parent, i), find(parent, j));
    if pi == pj {
        return;
    }
    match rank[pi].cmp(&rank[pj]) {
        std::cmp::Ordering::Less => parent[pi] = pj,
        std::cmp::Ordering::Greater => parent[pj] = pi,
        std::cmp::Ordering::Equal => {
            parent[pj] = pi;
            rank[pi] += 1;
        }
    }
}

/// All pairs of all groups, in group order.
pub fn flatten_pairs(groups: &[DuplicateGroup]) -> Vec<DuplicatePair> {
    groups.iter().flat_map(DuplicateGroup::pairs).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::hash::Fingerprint;
    use image_hasher::ImageHash;

    /// Fingerprint with the given 64-bit pattern.
    pub(crate) fn fingerprint(bits: u64) -> Fingerprint {
        let hash = ImageHash::<Vec<u8>>::from_bytes(&bits.to_be_bytes()).unwrap();
        Fingerprint::from_encoded(&hash.to_base64()).unwrap()
    }

    pub(crate) fn record(name: &str, bits: Option<u64>) -> ImageRecord {
        ImageRecord {
            path: PathBuf::from(format!("/photos/{name}")),
            size: 100,
            modified_ns: 0,
            hash: bits.map(fingerprint),
            embedding: None,
        }
    }

    fn grouper(max_distance: u32) -> DuplicateGrouper {
        DuplicateGrouper::new(&DuplicatesConfig {
            hash_size: 8,
            max_distance,
        })
    }

    fn names(group: &DuplicateGroup) -> Vec<String> {
        group.members().iter().map(|m| m.file_name()).collect()
    }

    #[test]
    fn test_identical_pair_has_full_similarity() {
        let records = vec![record("a.jpg", Some(0xF0F0)), record("b.jpg", Some(0xF0F0))];
        let groups = grouper(0).group(&records);
        assert_eq!(groups.len(), 1);

        let pairs = groups[0].pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].distance, 0);
        assert_eq!(pairs[0].similarity, 1.0);
        assert!(pairs[0].left.ends_with("a.jpg"));
        assert!(pairs[0].right.ends_with("b.jpg"));
    }

    #[test]
    fn test_grouping_is_transitive() {
        // a–b distance 2, b–c distance 2, a–c distance 4: with bound 3 all
        // three still land in one group through b.
        let records = vec![
            record("a.jpg", Some(0b0000)),
            record("x.jpg", Some(u64::MAX)),
            record("b.jpg", Some(0b0011)),
            record("c.jpg", Some(0b1111)),
        ];
        let groups = grouper(3).group(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn test_bound_excludes_distant_hashes() {
        let records = vec![record("a.jpg", Some(0)), record("b.jpg", Some(0b11111))];
        assert!(grouper(4).group(&records).is_empty());
        assert_eq!(grouper(5).group(&records).len(), 1);
    }

    #[test]
    fn test_mixed_hash_sizes_never_link() {
        let wide = ImageHash::<Vec<u8>>::from_bytes(&[0u8; 32]).unwrap();
        let records = vec![
            record("a.jpg", Some(0)),
            record("b.jpg", Some(0)),
            ImageRecord {
                hash: Fingerprint::from_encoded(&wide.to_base64()),
                ..record("c.jpg", None)
            },
        ];
        let groups = grouper(64).group(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_groups_follow_discovery_order() {
        let records = vec![
            record("a.jpg", Some(0xFF00)),
            record("b.jpg", Some(0x00FF_0000_0000)),
            record("c.jpg", Some(0xFF00)),
            record("d.jpg", Some(0x00FF_0000_0000)),
            record("e.jpg", None),
        ];
        let groups = grouper(0).group(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["a.jpg", "c.jpg"]);
        assert_eq!(names(&groups[1]), vec!["b.jpg", "d.jpg"]);

        let pairs = flatten_pairs(&groups);
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].left.ends_with("a.jpg"));
        assert!(pairs[1].left.ends_with("b.jpg"));
    }

    #[test]
    fn test_similarity_scales_with_distance() {
        let records = vec![record("a.jpg", Some(0)), record("b.jpg", Some(0b11))];
        let pairs = flatten_pairs(&grouper(4).group(&records));
        assert_eq!(pairs[0].distance, 2);
        assert!((pairs[0].similarity - (1.0 - 2.0 / 64.0)).abs() < 1e-12);
    }

    #[test]
    fn test_remove_member() {
        let records = vec![
            record("a.jpg", Some(1)),
            record("b.jpg", Some(1)),
            record("c.jpg", Some(1)),
        ];
        let mut group = grouper(0).group(&records).remove(0);
        assert!(group.remove(Path::new("/photos/b.jpg")));
        assert!(!group.remove(Path::new("/photos/b.jpg")));
        assert_eq!(group.len(), 2);
        assert!(!group.is_retired());
        assert!(group.remove(Path::new("/photos/a.jpg")));
        assert!(group.is_retired());
    }
}
