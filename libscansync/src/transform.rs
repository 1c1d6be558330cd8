//! Per-frame transform records: the position/rotation/time of one
//! image frame plus whatever stabilization transforms downstream
//! tooling attaches to it.

use std::collections::BTreeMap;
use std::fmt::Display;

use ndarray::Array2;

/// The transforms that can be attached to a frame, in the order they
/// are usually applied when stabilizing a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransformKind {
    InitialRotation,
    TrackerTranslation,
    MultiTrackerTranslation,
    LogPolarRotation,
    FftTranslation,
    OpticalFlow,
    PieceWiseMapping,
}

impl Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransformKind::InitialRotation => "InitialRotation",
            TransformKind::TrackerTranslation => "TrackerTranslation",
            TransformKind::MultiTrackerTranslation => "MultiTrackerTranslation",
            TransformKind::LogPolarRotation => "LogPolarRotation",
            TransformKind::FftTranslation => "FftTranslation",
            TransformKind::OpticalFlow => "OpticalFlow",
            TransformKind::PieceWiseMapping => "PieceWiseMapping",
        };
        write!(f, "{name}")
    }
}

/// One output record of a synchronization pass: the frame's number and
/// image timestamp, its position/rotation both normalized and raw, and
/// an ordered map of transform payloads.
#[derive(Debug, Clone, Default)]
pub struct FrameTransform {
    pub frame_number: u32,
    /// Image timestamp in seconds relative to the file epoch
    pub timestamp: f64,
    pub x: f64,
    pub z: f64,
    pub r: f64,
    /// X/Z before normalization
    pub raw_x: f64,
    pub raw_z: f64,
    transforms: BTreeMap<TransformKind, Array2<f64>>,
}

impl FrameTransform {
    pub fn new(frame_number: u32, timestamp: f64) -> Self {
        FrameTransform {
            frame_number,
            timestamp,
            ..Default::default()
        }
    }

    pub fn set_pos_data(&mut self, x: f64, z: f64, r: f64) {
        self.x = x;
        self.z = z;
        self.r = r;
    }

    pub fn set_raw_pos_data(&mut self, x: f64, z: f64) {
        self.raw_x = x;
        self.raw_z = z;
    }

    pub fn pos_data(&self) -> (f64, f64, f64) {
        (self.x, self.z, self.r)
    }

    pub fn raw_pos_data(&self) -> (f64, f64, f64) {
        (self.raw_x, self.raw_z, self.r)
    }

    pub fn add_transform(&mut self, kind: TransformKind, payload: Array2<f64>) {
        self.transforms.insert(kind, payload);
    }

    pub fn has_transform(&self, kind: TransformKind) -> bool {
        self.transforms.contains_key(&kind)
    }

    pub fn transform(&self, kind: TransformKind) -> Option<&Array2<f64>> {
        self.transforms.get(&kind)
    }

    /// Replace a transform's payload, except tracker translations which
    /// accumulate across updates.
    pub fn update_transform(&mut self, kind: TransformKind, payload: Array2<f64>) {
        match self.transforms.get_mut(&kind) {
            Some(existing) if kind == TransformKind::TrackerTranslation => {
                *existing += &payload;
            }
            Some(existing) => *existing = payload,
            None => {
                self.transforms.insert(kind, payload);
            }
        }
    }

    pub fn transforms(&self) -> &BTreeMap<TransformKind, Array2<f64>> {
        &self.transforms
    }
}

impl Display for FrameTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ Frame {}, Timestamp {}, X {}, Z {}, R {}",
            self.frame_number, self.timestamp, self.x, self.z, self.r
        )?;
        for kind in self.transforms.keys() {
            write!(f, ", {kind}")?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_tracker_translation_accumulates() {
        let mut tc = FrameTransform::new(1, 0.0);
        tc.update_transform(TransformKind::TrackerTranslation, arr2(&[[1.0, 2.0]]));
        tc.update_transform(TransformKind::TrackerTranslation, arr2(&[[0.5, -1.0]]));
        let m = tc.transform(TransformKind::TrackerTranslation).unwrap();
        assert_eq!(m, arr2(&[[1.5, 1.0]]));
    }

    #[test]
    fn test_other_transforms_replace() {
        let mut tc = FrameTransform::new(1, 0.0);
        tc.update_transform(TransformKind::InitialRotation, arr2(&[[1.0]]));
        tc.update_transform(TransformKind::InitialRotation, arr2(&[[2.0]]));
        let m = tc.transform(TransformKind::InitialRotation).unwrap();
        assert_eq!(m, arr2(&[[2.0]]));
        assert!(!tc.has_transform(TransformKind::OpticalFlow));
    }
}
