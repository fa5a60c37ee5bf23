use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use super::{file_stem, Result, ScoreRenderer};
use crate::nrt::Score;

/// Writes each score as pretty JSON into a directory, for an offline
/// synthesis host to pick up.
#[derive(Debug, Clone)]
pub struct JsonScoreRenderer {
    dir: PathBuf,
}

impl JsonScoreRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Destination for `output_name`. Only the final path component of the
    /// name is used.
    pub fn path_for(&self, output_name: &str) -> PathBuf {
        self.dir.join(format!("{}.score.json", file_stem(output_name)))
    }
}

impl ScoreRenderer for JsonScoreRenderer {
    fn render(&self, score: &Score) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&score.output_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, score)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), rows = score.rows.len(), "score written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_cannot_escape_the_directory() {
        let renderer = JsonScoreRenderer::new("/tmp/scores");
        assert_eq!(
            renderer.path_for("../../etc/take1.wav"),
            PathBuf::from("/tmp/scores/take1.wav.score.json")
        );
        assert_eq!(
            renderer.path_for(".."),
            PathBuf::from("/tmp/scores/score.score.json")
        );
    }
}
