//! Tile archive generation.

use std::ops::RangeInclusive;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, instrument};

use crate::error::{ErrorContext, MirrorError, Result};

/// Turns a serialized feature collection into a tile archive.
#[async_trait]
pub trait TileBuilder: Send + Sync {
    async fn build(&self, collection: &[u8]) -> Result<Vec<u8>>;
}

/// [`TileBuilder`] that shells out to `tippecanoe` and produces PMTiles.
#[derive(Debug, Clone)]
pub struct Tippecanoe {
    program: String,
    zoom: RangeInclusive<u8>,
    layer: String,
}

impl Default for Tippecanoe {
    fn default() -> Self {
        Self {
            program: "tippecanoe".to_string(),
            zoom: 0..=12,
            layer: "images".to_string(),
        }
    }
}

impl Tippecanoe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable, e.g. an absolute path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_zoom(mut self, zoom: RangeInclusive<u8>) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    fn args(&self, input: &str, output: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            output.to_string(),
            "-z".to_string(),
            self.zoom.end().to_string(),
            "-Z".to_string(),
            self.zoom.start().to_string(),
            "--force".to_string(),
            "--no-feature-limit".to_string(),
            "--no-tile-size-limit".to_string(),
            "-l".to_string(),
            self.layer.clone(),
            input.to_string(),
        ]
    }
}

#[async_trait]
impl TileBuilder for Tippecanoe {
    #[instrument(skip(self, collection), fields(program = %self.program, bytes = collection.len()))]
    async fn build(&self, collection: &[u8]) -> Result<Vec<u8>> {
        let workdir = tempfile::tempdir().context("Failed to create tile work directory")?;
        let input = workdir.path().join("features.geojson");
        let output = workdir.path().join("tiles.pmtiles");
        tokio::fs::write(&input, collection).await?;

        let args = self.args(&input.to_string_lossy(), &output.to_string_lossy());
        info!(zoom = ?self.zoom, layer = %self.layer, "Generating tile archive");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MirrorError::tile_build(format!("could not run {}: {e}", self.program)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(MirrorError::tile_build(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        let archive = tokio::fs::read(&output).await.map_err(|e| {
            MirrorError::tile_build(format!("{} produced no archive: {e}", self.program))
        })?;
        info!(bytes = archive.len(), "Tile archive generated");
        Ok(archive)
    }
}
