use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One pre-noised training example.
/// Rows are residues, columns are feature channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoisedSample {
    pub corrupted:    Vec<Vec<f32>>,
    pub t:            f32,
    pub known_noise:  Vec<Vec<f32>>,
    pub attn_mask:    Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_ids: Option<Vec<u32>>,
}

impl NoisedSample {
    pub fn seq_len(&self) -> usize {
        self.corrupted.len()
    }

    pub fn num_channels(&self) -> usize {
        self.corrupted.first().map_or(0, Vec::len)
    }

    pub fn valid_residues(&self) -> usize {
        self.attn_mask.iter().filter(|&&m| m != 0).count()
    }
}

pub struct NoisedDataset {
    samples: Vec<NoisedSample>,
}

impl NoisedDataset {
    pub fn new(samples: Vec<NoisedSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }
}

impl Dataset<NoisedSample> for NoisedDataset {
    fn get(&self, index: usize) -> Option<NoisedSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
