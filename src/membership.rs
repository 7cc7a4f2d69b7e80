//! K-mer membership counters consumed while anchoring.
//!
//! Membership is computed by an external k-mer counting stage; anchoring
//! only reads the per-group counter vectors through [`MembershipSource`].

use std::collections::HashMap;

use auto_impl::auto_impl;

use crate::bitmap::{num_groups, PresenceMatrix};
use crate::error::{BuildError, Result};

/// Provider of per-position membership counters for anchor chromosomes
#[auto_impl(&, Box, Arc)]
pub trait MembershipSource {
    /// Membership bits of genomes `32 * group .. 32 * group + 32` for every
    /// k-mer start position of `chrom` in the anchor `genome`.
    ///
    /// Bit `i` of a counter is set when genome `32 * group + i + 1` contains
    /// the k-mer.
    fn counters(&self, genome: &str, chrom: &str, group: usize) -> Result<Vec<u32>>;
}

/// In-memory membership counters keyed by anchor genome and chromosome
#[derive(Clone, Debug, Default)]
pub struct MemoryMembership {
    ngenomes: usize,
    groups: HashMap<(String, String), Vec<Vec<u32>>>,
}
impl MemoryMembership {
    #[must_use]
    pub fn new(ngenomes: usize) -> Self {
        Self {
            ngenomes,
            groups: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ngenomes(&self) -> usize {
        self.ngenomes
    }

    /// Stores raw counter groups for one chromosome
    pub fn insert_counters(&mut self, genome: &str, chrom: &str, groups: Vec<Vec<u32>>) {
        self.groups
            .insert((genome.to_string(), chrom.to_string()), groups);
    }

    /// Stores the counters equivalent to a presence matrix
    pub fn insert_presence(&mut self, genome: &str, chrom: &str, presence: &PresenceMatrix) {
        let ngroups = num_groups(self.ngenomes);
        let mut groups = vec![vec![0u32; presence.nrows()]; ngroups];
        for (pos, row) in presence.rows().enumerate() {
            for (col, _) in row
                .iter()
                .take(self.ngenomes)
                .enumerate()
                .filter(|(_, present)| **present)
            {
                groups[col / 32][pos] |= 1 << (col % 32);
            }
        }
        self.insert_counters(genome, chrom, groups);
    }
}
impl MembershipSource for MemoryMembership {
    fn counters(&self, genome: &str, chrom: &str, group: usize) -> Result<Vec<u32>> {
        let groups = self
            .groups
            .get(&(genome.to_string(), chrom.to_string()))
            .ok_or_else(|| BuildError::Membership {
                genome: genome.to_string(),
                chrom: chrom.to_string(),
                reason: "no counters".to_string(),
            })?;
        groups.get(group).cloned().ok_or_else(|| {
            BuildError::Membership {
                genome: genome.to_string(),
                chrom: chrom.to_string(),
                reason: format!("no counter group {group}"),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{pack_counters, PackedRows};

    #[test]
    fn test_presence_to_counters() -> crate::Result<()> {
        let rows = PackedRows::from_bytes(1, vec![0b111, 0b011, 0b001, 0b110, 0b111])?;
        let mut source = MemoryMembership::new(3);
        source.insert_presence("A", "X", &rows.unpack(3));
        let counters = source.counters("A", "X", 0)?;
        assert_eq!(counters, vec![0b111, 0b011, 0b001, 0b110, 0b111]);
        Ok(())
    }

    #[test]
    fn test_presence_spans_groups() -> crate::Result<()> {
        // genome 34 sits in bit 1 of group 1
        let mut bits = vec![false; 40];
        bits[0] = true;
        bits[33] = true;
        let matrix = PresenceMatrix::new(40, bits)?;

        let mut source = MemoryMembership::new(40);
        source.insert_presence("A", "X", &matrix);
        let groups = [source.counters("A", "X", 0)?, source.counters("A", "X", 1)?];
        assert_eq!(groups[0], vec![1]);
        assert_eq!(groups[1], vec![0b10]);

        let packed = pack_counters(&groups, 40)?;
        assert_eq!(packed.unpack(40), matrix);
        Ok(())
    }

    #[test]
    fn test_missing_counters() {
        let source = MemoryMembership::new(3);
        let err = source.counters("A", "X", 0).unwrap_err();
        assert!(matches!(err, crate::Error::BuildError(_)));
    }
}
