use serde::Serialize;
use std::path::Path;

use crate::audio::spectral::TimeAxis;
use crate::config::Normalization;
use crate::error::Result;
use crate::notes::extract::Chromagram;
use crate::notes::table::FrequencyTable;

#[derive(Debug, Serialize)]
pub struct ChromagramExport {
    pub variant: String,
    pub normalization: &'static str,
    pub threshold: f32,
    pub keys: Vec<u8>,
    pub frequencies: Vec<f32>,
    pub times: Vec<f32>,
    /// One 88-value row per time step.
    pub steps: Vec<Vec<f32>>,
}

impl ChromagramExport {
    pub fn new(
        chromagram: &Chromagram,
        times: &TimeAxis,
        table: &FrequencyTable,
        variant: &str,
        normalization: Normalization,
        threshold: f32,
    ) -> Self {
        let normalized = chromagram.normalized(normalization, threshold);
        Self {
            variant: variant.to_string(),
            normalization: normalization.name(),
            threshold,
            keys: table.rows().iter().map(|r| r.key).collect(),
            frequencies: table.rows().iter().map(|r| r.frequency).collect(),
            times: times.times().to_vec(),
            steps: normalized.columns().into_iter().map(|c| c.to_vec()).collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(file, self).map_err(std::io::Error::from)?;
        log::info!("Wrote chromagram ({} steps) to {}", self.steps.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_normalized_steps_with_time_axis() {
        let mut chroma = Chromagram::new(3);
        chroma.record(49, 0, 8.0);
        chroma.record(40, 0, 2.0);
        chroma.record(40, 2, 1.0);
        let times = TimeAxis::linspace(3, 1.0);
        let table = FrequencyTable::build(2.0);
        let export = ChromagramExport::new(&chroma, &times, &table, "harmonic", Normalization::DivMax, 0.3);

        let path = std::env::temp_dir().join(format!("keyroll_chroma_{}.json", std::process::id()));
        export.write(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(value["normalization"], "div-max");
        assert_eq!(value["keys"].as_array().unwrap().len(), 88);
        assert_eq!(value["times"].as_array().unwrap().len(), 3);
        let steps = value["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0][48], 1.0);
        // 2/8 is below the threshold
        assert_eq!(steps[0][39], 0.0);
        assert_eq!(steps[1].as_array().unwrap().iter().filter(|v| **v != 0.0).count(), 0);
        assert_eq!(steps[2][39], 1.0);
    }
}
