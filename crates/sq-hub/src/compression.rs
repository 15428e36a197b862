//! # Sequence Decompression
//!
//! Sequences are stored zstd-compressed against a dictionary built from the
//! organism's reference sequence (the backend's compression scheme), then
//! base64-encoded into the JSONB metadata. Dictionaries are precomputed at
//! startup for every (organism, segment) and (organism, gene) pair; a
//! segment without a reference decompresses without a dictionary.

use std::collections::HashMap;
use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::config::BackendConfig;
use crate::error::DecompressionError;

pub struct CompressionService {
    nucleotide_dicts: HashMap<(String, String), Vec<u8>>,
    amino_acid_dicts: HashMap<(String, String), Vec<u8>>,
}

impl CompressionService {
    pub fn new(config: &BackendConfig) -> Self {
        let mut nucleotide_dicts = HashMap::new();
        let mut amino_acid_dicts = HashMap::new();
        for (organism, cfg) in &config.organisms {
            for seq in &cfg.reference_genome.nucleotide_sequences {
                nucleotide_dicts.insert(
                    (organism.clone(), seq.name.clone()),
                    seq.sequence.as_bytes().to_vec(),
                );
            }
            for gene in &cfg.reference_genome.genes {
                amino_acid_dicts.insert(
                    (organism.clone(), gene.name.clone()),
                    gene.sequence.as_bytes().to_vec(),
                );
            }
        }
        CompressionService {
            nucleotide_dicts,
            amino_acid_dicts,
        }
    }

    pub fn decompress_nucleotide(
        &self,
        compressed_b64: &str,
        organism: &str,
        segment: &str,
    ) -> Result<String, DecompressionError> {
        let dict = self
            .nucleotide_dicts
            .get(&(organism.to_string(), segment.to_string()));
        decompress(compressed_b64, dict.map(Vec::as_slice))
    }

    pub fn decompress_amino_acid(
        &self,
        compressed_b64: &str,
        organism: &str,
        gene: &str,
    ) -> Result<String, DecompressionError> {
        let dict = self
            .amino_acid_dicts
            .get(&(organism.to_string(), gene.to_string()));
        decompress(compressed_b64, dict.map(Vec::as_slice))
    }
}

fn decompress(compressed_b64: &str, dict: Option<&[u8]>) -> Result<String, DecompressionError> {
    let compressed = BASE64.decode(compressed_b64)?;
    let mut decompressed = Vec::new();
    match dict {
        Some(dict) => {
            let mut decoder = zstd::stream::read::Decoder::with_dictionary(&compressed[..], dict)?;
            decoder.read_to_end(&mut decompressed)?;
        }
        None => {
            let mut decoder = zstd::stream::read::Decoder::new(&compressed[..])?;
            decoder.read_to_end(&mut decompressed)?;
        }
    }
    Ok(String::from_utf8(decompressed)?)
}
