//! # Mutation Calling
//!
//! Position-by-position comparison of an aligned sequence against its
//! reference. Ambiguous symbols (`N` for nucleotides, `X` for amino acids)
//! are never reported as mutations. Positions are 1-based.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub mutation: String,
    pub mutation_from: String,
    pub mutation_to: String,
    pub position: usize,
    pub sequence_name: Option<String>,
    pub count: u64,
    pub coverage: u64,
    pub proportion: f64,
}

/// Calls nucleotide mutations for one aligned segment.
pub fn nucleotide_mutations(reference: &str, sequence: &str) -> Vec<Mutation> {
    call_mutations(reference, sequence, 'N', None)
}

/// Calls amino-acid mutations for one gene; mutation labels carry the
/// `gene:` prefix and `sequenceName` names the gene.
pub fn amino_acid_mutations(reference: &str, sequence: &str, gene: &str) -> Vec<Mutation> {
    call_mutations(reference, sequence, 'X', Some(gene))
}

fn call_mutations(
    reference: &str,
    sequence: &str,
    ambiguous: char,
    gene: Option<&str>,
) -> Vec<Mutation> {
    let mut mutations = Vec::new();
    for (i, (ref_symbol, seq_symbol)) in reference.chars().zip(sequence.chars()).enumerate() {
        if ref_symbol == seq_symbol || seq_symbol == ambiguous {
            continue;
        }
        let position = i + 1;
        let mutation = match gene {
            Some(gene) => format!("{gene}:{ref_symbol}{position}{seq_symbol}"),
            None => format!("{ref_symbol}{position}{seq_symbol}"),
        };
        mutations.push(Mutation {
            mutation,
            mutation_from: ref_symbol.to_string(),
            mutation_to: seq_symbol.to_string(),
            position,
            sequence_name: gene.map(str::to_string),
            count: 1,
            coverage: 1,
            proportion: 1.0,
        });
    }
    mutations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nucleotide_diff_is_one_based() {
        let muts = nucleotide_mutations("ATGC", "ATCC");
        assert_eq!(muts.len(), 1);
        assert_eq!(muts[0].mutation, "G3C");
        assert_eq!(muts[0].position, 3);
        assert_eq!(muts[0].mutation_from, "G");
        assert_eq!(muts[0].mutation_to, "C");
        assert_eq!(muts[0].sequence_name, None);
    }

    #[test]
    fn test_ambiguous_nucleotides_are_skipped() {
        let muts = nucleotide_mutations("ATGC", "NNNC");
        assert!(muts.is_empty());
    }

    #[test]
    fn test_amino_acid_mutation_carries_gene_prefix() {
        let muts = amino_acid_mutations("MKV", "MRV", "E");
        assert_eq!(muts.len(), 1);
        assert_eq!(muts[0].mutation, "E:K2R");
        assert_eq!(muts[0].sequence_name.as_deref(), Some("E"));
    }

    #[test]
    fn test_ambiguous_amino_acids_are_skipped() {
        let muts = amino_acid_mutations("MKV", "MXV", "E");
        assert!(muts.is_empty());
    }

    #[test]
    fn test_length_mismatch_compares_the_overlap() {
        let muts = nucleotide_mutations("ATGC", "AC");
        assert_eq!(muts.len(), 1);
        assert_eq!(muts[0].mutation, "T2C");
    }
}
