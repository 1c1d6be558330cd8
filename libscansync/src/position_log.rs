//! Parser for the position/rotation log written by the VR rig's
//! controlling PC.
//!
//! The log is line oriented. A movement line looks like
//!
//! ```text
//! 2022-01-18 15:21:21.100 X=0.532 Z=1.004 Rot=1840 MouseMove ...
//! ```
//!
//! with a date-time prefix on the PC clock, X/Z translation values, and
//! the rotation in raw rotary encoder units. One line near the top of
//! newer files carries an angular reference value, and exactly one line
//! (phrased differently by older and newer logging software) marks the
//! instant the microscope started acquiring.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use time::PrimitiveDateTime;

use super::constants::{
    EQUAL_TOKEN, INIT_ROT_TOKEN, MOUSE_MOVE_TOKEN, ROT_TOKEN, SCOPE_TOKEN, SPACEBAR_TOKEN,
    X_TOKEN, Z_TOKEN,
};
use super::error::LogError;
use super::vr_data::{parse_line_time, zero_normalize, RotationUnits, SampleStream};

/// Loads and tokenizes a position log, yielding per-sample timestamps,
/// X/Z translation and rotation, plus the acquisition trigger.
///
/// Construction takes the rotary-encoder units-per-turn because the
/// physical encoder has been swapped historically and the log itself
/// does not record which one was fitted.
#[derive(Debug)]
pub struct PositionLog {
    filename: PathBuf,
    units_per_turn: u32,
    stream: SampleStream,
    x_translation: Vec<f64>,
    z_translation: Vec<f64>,
    original_x_translation: Vec<f64>,
    original_z_translation: Vec<f64>,
    init_rotation: i64,
    is_loaded: bool,
}

impl PositionLog {
    pub fn new(filename: &Path, units_per_turn: u32) -> Self {
        PositionLog {
            filename: filename.to_path_buf(),
            units_per_turn,
            stream: SampleStream::default(),
            x_translation: Vec::new(),
            z_translation: Vec::new(),
            original_x_translation: Vec::new(),
            original_z_translation: Vec::new(),
            init_rotation: 0,
            is_loaded: false,
        }
    }

    /// Read the whole file in a single pass.
    ///
    /// Returns `Ok(true)` when the file was parsed and the derived
    /// (trigger-relative) series could be computed. `Ok(false)` means
    /// the file parsed but carries no acquisition trigger; raw samples
    /// remain queryable but the log cannot be synchronized against.
    pub fn load(&mut self) -> Result<bool, LogError> {
        if !self.filename.exists() {
            return Err(LogError::BadFilePath(self.filename.clone()));
        }
        log::info!("Loading log file: {}", self.filename.to_string_lossy());

        let file = BufReader::new(File::open(&self.filename)?);
        let mut last_seen: Option<PrimitiveDateTime> = None;
        for (line_index, line) in file.lines().enumerate() {
            let line = line?;

            if let Some(pos) = line.find(INIT_ROT_TOKEN) {
                // the value is the last whitespace-separated field
                let value = line[pos..].split_whitespace().last().unwrap_or_default();
                self.init_rotation =
                    value
                        .parse()
                        .map_err(|_| LogError::BadInteger {
                            line: line_index,
                            field: "angular reference",
                            value: value.to_string(),
                        })?;
            }

            if let Some(rot_pos) = line.find(ROT_TOKEN) {
                let t = parse_line_time(&line)?;
                last_seen = Some(t);
                if self.stream.accepts(&t) {
                    let (x, z, rotation) = Self::parse_movement(&line, rot_pos, line_index)?;
                    self.stream.push_sample(t, rotation as f64);
                    self.original_x_translation.push(x);
                    self.original_z_translation.push(z);
                }
            }

            // acquisition start, in either historical phrasing; marker
            // lines carry their own timestamp prefix in most files
            if line.contains(SCOPE_TOKEN) || line.contains(SPACEBAR_TOKEN) {
                let marker_time = parse_line_time(&line).ok().or(last_seen);
                self.stream.latch_trigger(marker_time);
            }
        }
        self.stream.resolve_trigger();
        self.is_loaded = self.calculate_durations_and_rotations();
        Ok(self.is_loaded)
    }

    /// Pull X, Z and the raw rotation out of a movement line.
    fn parse_movement(
        line: &str,
        rot_pos: usize,
        line_index: usize,
    ) -> Result<(f64, f64, i64), LogError> {
        let x_pos = line.find(X_TOKEN);
        let z_pos = line.find(Z_TOKEN);
        let (Some(x_pos), Some(z_pos)) = (x_pos, z_pos) else {
            return Err(LogError::MalformedLine(line_index));
        };
        if x_pos + X_TOKEN.len() > z_pos || z_pos + Z_TOKEN.len() > rot_pos {
            return Err(LogError::MalformedLine(line_index));
        }

        let x_text = line[x_pos + X_TOKEN.len()..z_pos].trim();
        let x = x_text.parse().map_err(|_| LogError::BadFloat {
            line: line_index,
            field: "X",
            value: x_text.to_string(),
        })?;

        let z_text = line[z_pos + Z_TOKEN.len()..rot_pos].trim();
        let z = z_text.parse().map_err(|_| LogError::BadFloat {
            line: line_index,
            field: "Z",
            value: z_text.to_string(),
        })?;

        // the rotation is the integer between the key's '=' and the
        // movement marker
        let after_rot = &line[rot_pos..];
        let eq = after_rot.find(EQUAL_TOKEN);
        let mm = after_rot.find(MOUSE_MOVE_TOKEN);
        let (Some(eq), Some(mm)) = (eq, mm) else {
            return Err(LogError::MalformedLine(line_index));
        };
        if eq + EQUAL_TOKEN.len() > mm {
            return Err(LogError::MalformedLine(line_index));
        }
        let rot_text = after_rot[eq + EQUAL_TOKEN.len()..mm].trim();
        let rotation = rot_text.parse().map_err(|_| LogError::BadInteger {
            line: line_index,
            field: "Rot",
            value: rot_text.to_string(),
        })?;

        Ok((x, z, rotation))
    }

    /// Derive the trigger-relative durations, the radian rotation
    /// series and the normalized X/Z series. Returns false (leaving the
    /// derived series empty) when the file carries no trigger.
    pub fn calculate_durations_and_rotations(&mut self) -> bool {
        if !self.stream.contains_acquisition() {
            log::warn!(
                "The file {} has no microscope trigger associated",
                self.filename.to_string_lossy()
            );
            return false;
        }
        log::info!("Calculating rotations and times from log file data...");
        let units = RotationUnits::EncoderUnits {
            units_per_turn: self.units_per_turn,
        };
        if !self.stream.derive_durations_and_rotations(units) {
            log::warn!(
                "The trigger in {} precedes no usable sample",
                self.filename.to_string_lossy()
            );
            return false;
        }
        self.x_translation = self.original_x_translation.clone();
        self.z_translation = self.original_z_translation.clone();
        zero_normalize(&mut self.x_translation);
        zero_normalize(&mut self.z_translation);
        log::info!(
            "The raw log file has {} timestamps in it",
            self.stream.len()
        );
        true
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn contains_acquisition(&self) -> bool {
        self.stream.contains_acquisition()
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Angular reference value from the top of the file (raw units)
    pub fn init_rotation(&self) -> i64 {
        self.init_rotation
    }

    pub fn trigger_index(&self) -> Option<usize> {
        self.stream.trigger_index()
    }

    pub fn trigger_time(&self) -> Option<PrimitiveDateTime> {
        self.stream.trigger_time()
    }

    pub fn ptimes(&self) -> &[PrimitiveDateTime] {
        self.stream.ptimes()
    }

    pub fn times(&self) -> &[f64] {
        self.stream.times()
    }

    pub fn theta(&self) -> &[f64] {
        self.stream.rotations_in_rads()
    }

    /// Raw rotation in encoder units
    pub fn rotation(&self, i: usize) -> i64 {
        self.stream.rotation(i) as i64
    }

    pub fn radian_rotation(&self, i: usize) -> f64 {
        self.stream.radian_rotation(i)
    }

    pub fn time(&self, i: usize) -> f64 {
        self.stream.time(i)
    }

    pub fn x(&self) -> &[f64] {
        &self.x_translation
    }

    pub fn z(&self) -> &[f64] {
        &self.z_translation
    }

    pub fn raw_x(&self) -> &[f64] {
        &self.original_x_translation
    }

    pub fn raw_z(&self) -> &[f64] {
        &self.original_z_translation
    }

    pub fn x_translation(&self, i: usize) -> f64 {
        self.x_translation[i]
    }

    pub fn z_translation(&self, i: usize) -> f64 {
        self.z_translation[i]
    }

    pub fn raw_x_translation(&self, i: usize) -> f64 {
        self.original_x_translation[i]
    }

    pub fn raw_z_translation(&self, i: usize) -> f64 {
        self.original_z_translation[i]
    }

    pub fn find_nearest_index(&self, duration: f64) -> Option<usize> {
        self.stream.find_nearest_index(duration)
    }

    pub fn find_nearest_ptime_index(&self, t: &PrimitiveDateTime) -> Option<usize> {
        self.stream.find_nearest_ptime_index(t)
    }
}
