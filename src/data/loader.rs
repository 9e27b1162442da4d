// ============================================================
// Layer 4 — JSON Lines Sample Loader
// ============================================================
// Reads pre-noised samples, one JSON object per line:
//
//   {"corrupted": [[..C..], ..L..], "t": 412.0,
//    "known_noise": [[..C..], ..L..], "attn_mask": [1, 1, .., 0],
//    "position_ids": [0, 1, ..]}            ← optional
//
// Blank lines are skipped. Every sample is checked before it is
// accepted: both grids L x C with the file-wide channel count,
// a mask of length L with at least one valid residue, and
// position ids (when given) of length L.

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::data::dataset::NoisedSample;
use crate::domain::error::DiffusionError;

pub struct JsonlLoader {
    path: PathBuf,
    /// Channel count every sample must have; taken from the first sample when unset.
    expected_channels: Option<usize>,
}

impl JsonlLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), expected_channels: None }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.expected_channels = Some(channels);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_all(&self) -> Result<Vec<NoisedSample>> {
        let file = File::open(&self.path)
            .map_err(|e| DiffusionError::io(&self.path, e))
            .with_context(|| format!("Cannot open samples file '{}'", self.path.display()))?;

        let mut channels = self.expected_channels;
        let mut samples  = Vec::new();

        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line_no = i + 1;
            let line = line.map_err(|e| DiffusionError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }

            let sample: NoisedSample = serde_json::from_str(&line)
                .map_err(|e| DiffusionError::json(&self.path, e))
                .with_context(|| format!("line {line_no}"))?;

            let expected = *channels.get_or_insert(sample.num_channels());
            validate_sample(&sample, expected)
                .with_context(|| format!("{}:{line_no}", self.path.display()))?;
            samples.push(sample);
        }

        tracing::info!(
            "Loaded {} samples ({} channels) from '{}'",
            samples.len(),
            channels.unwrap_or(0),
            self.path.display()
        );
        Ok(samples)
    }
}

/// Shape and mask checks for one sample against the expected channel count.
pub fn validate_sample(sample: &NoisedSample, channels: usize) -> Result<(), DiffusionError> {
    let seq_len = sample.seq_len();
    if seq_len == 0 || channels == 0 {
        return Err(DiffusionError::ShapeMismatch("empty sample".to_string()));
    }
    if sample.known_noise.len() != seq_len {
        return Err(DiffusionError::shape("known_noise rows", seq_len, sample.known_noise.len()));
    }
    for (row, (c, k)) in sample.corrupted.iter().zip(&sample.known_noise).enumerate() {
        if c.len() != channels || k.len() != channels {
            return Err(DiffusionError::ShapeMismatch(format!(
                "residue {row}: expected {channels} channels, got {} corrupted / {} noise",
                c.len(),
                k.len()
            )));
        }
    }
    if sample.attn_mask.len() != seq_len {
        return Err(DiffusionError::shape("attn_mask", seq_len, sample.attn_mask.len()));
    }
    if sample.valid_residues() == 0 {
        return Err(DiffusionError::EmptyMask { batch: 1, seq_len });
    }
    if let Some(ids) = &sample.position_ids {
        if ids.len() != seq_len {
            return Err(DiffusionError::shape("position_ids", seq_len, ids.len()));
        }
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    const GOOD: &str = r#"{"corrupted": [[0.1, 0.2], [0.3, 0.4]], "t": 12.0, "known_noise": [[0.0, 0.1], [0.2, 0.3]], "attn_mask": [1, 0]}"#;

    #[test]
    fn test_loads_valid_lines_and_skips_blanks() {
        let with_ids = r#"{"corrupted": [[1.0, 1.0]], "t": 3.0, "known_noise": [[0.5, 0.5]], "attn_mask": [1], "position_ids": [7]}"#;
        let f = write_lines(&[GOOD, "", with_ids]);
        let samples = JsonlLoader::new(f.path()).load_all().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].seq_len(), 2);
        assert!(samples[0].position_ids.is_none());
        assert_eq!(samples[1].position_ids.as_deref(), Some(&[7u32][..]));
    }

    #[test]
    fn test_channel_count_fixed_by_first_sample() {
        let three = r#"{"corrupted": [[1.0, 1.0, 1.0]], "t": 3.0, "known_noise": [[0.5, 0.5, 0.5]], "attn_mask": [1]}"#;
        let f = write_lines(&[GOOD, three]);
        let err = JsonlLoader::new(f.path()).load_all().unwrap_err();
        assert!(err.to_string().contains(":2"), "{err:#}");
    }

    #[test]
    fn test_expected_channels_enforced() {
        let f = write_lines(&[GOOD]);
        assert!(JsonlLoader::new(f.path()).with_channels(4).load_all().is_err());
        assert!(JsonlLoader::new(f.path()).with_channels(2).load_all().is_ok());
    }

    #[test]
    fn test_fully_masked_sample_rejected() {
        let masked = r#"{"corrupted": [[1.0, 1.0]], "t": 3.0, "known_noise": [[0.5, 0.5]], "attn_mask": [0]}"#;
        let f = write_lines(&[masked]);
        let err = JsonlLoader::new(f.path()).load_all().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiffusionError>(),
            Some(DiffusionError::EmptyMask { .. })
        ));
    }

    #[test]
    fn test_mask_length_checked() {
        let sample = NoisedSample {
            corrupted:    vec![vec![0.0]; 2],
            t:            1.0,
            known_noise:  vec![vec![0.0]; 2],
            attn_mask:    vec![1],
            position_ids: None,
        };
        assert!(matches!(validate_sample(&sample, 1), Err(DiffusionError::ShapeMismatch(_))));
    }

    #[test]
    fn test_bad_json_reports_line() {
        let f = write_lines(&[GOOD, "{not json"]);
        let err = JsonlLoader::new(f.path()).load_all().unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_missing_file() {
        assert!(JsonlLoader::new("/nonexistent/samples.jsonl").load_all().is_err());
    }
}
