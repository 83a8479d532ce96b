/*
 In-memory representation of a decoded pulse sequence. The native pulseq text
 format is parsed elsewhere; this crate consumes the already-decoded block and
 shape tables as json. Shape samples are stored uncompressed, one sample per
 RF raster tick.
 */

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::block::SeqBlock;
use crate::event::RfEvent;

#[derive(Debug, Error)]
pub enum SeqError {
    #[error("cannot read sequence file {path}: {source}")]
    FileUnreadable {
        path:PathBuf,
        source:std::io::Error,
    },
    #[error("malformed sequence file: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("block references unknown shape id {0}")]
    UnknownShape(u32),
    #[error("magnitude shape {mag_shape} and phase shape {phase_shape} have different lengths")]
    ShapeLengthMismatch {
        mag_shape:u32,
        phase_shape:u32,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shape {
    pub id:u32,
    pub samples:Vec<f64>,
}

/// Raw per-raster-tick RF arrays for one block, before any resampling
#[derive(Clone, Debug)]
pub struct DecodedRf {
    pub amplitude:Vec<f64>,
    pub phase:Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sequence {
    pub version_major:u32,
    pub version_minor:u32,
    /// RF raster time [s], declared by format 1.4 and later
    pub rf_raster_time:Option<f64>,
    shapes:BTreeMap<u32, Shape>,
    pub blocks:Vec<SeqBlock>,
}

impl Sequence {
    pub fn new(version_major:u32, version_minor:u32) -> Sequence {
        Sequence {
            version_major,
            version_minor,
            rf_raster_time:None,
            shapes:BTreeMap::new(),
            blocks:Vec::new(),
        }
    }

    pub fn load(path:&Path) -> Result<Sequence, SeqError> {
        let file = File::open(path).map_err(|e| SeqError::FileUnreadable {
            path:path.to_owned(),
            source:e,
        })?;
        let seq = serde_json::from_reader(BufReader::new(file))?;
        Ok(seq)
    }

    pub fn add_shape(&mut self, shape:Shape) {
        self.shapes.insert(shape.id, shape);
    }

    pub fn add_block(&mut self, block:SeqBlock) {
        self.blocks.push(block);
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, idx:usize) -> Option<&SeqBlock> {
        self.blocks.get(idx)
    }

    /// Time shapes and a declared RF raster exist from format 1.4 on
    pub fn supports_time_shapes(&self) -> bool {
        (self.version_major, self.version_minor) >= (1, 4)
    }

    /// Per-sample timestep unit [s]. Fixed at 1 us below format 1.4.
    pub fn rf_raster_s(&self) -> f64 {
        if self.supports_time_shapes() {
            self.rf_raster_time.unwrap_or(1e-6)
        } else {
            1e-6
        }
    }

    fn shape(&self, id:u32) -> Result<&Shape, SeqError> {
        self.shapes.get(&id).ok_or(SeqError::UnknownShape(id))
    }

    /// Expand the magnitude and phase shapes of an RF event into their raw
    /// sample arrays
    pub fn decode_rf(&self, rf:&RfEvent) -> Result<DecodedRf, SeqError> {
        let mag = self.shape(rf.mag_shape)?;
        let phase = self.shape(rf.phase_shape)?;
        if mag.samples.len() != phase.samples.len() {
            return Err(SeqError::ShapeLengthMismatch {
                mag_shape:rf.mag_shape,
                phase_shape:rf.phase_shape,
            });
        }
        Ok(DecodedRf {
            amplitude:mag.samples.clone(),
            phase:phase.samples.clone(),
        })
    }
}
