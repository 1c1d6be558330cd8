//! # scansync
//!
//! scansync fuses the three loosely-synchronized outputs of a
//! two-photon microscopy VR rig into one per-frame record of position,
//! rotation and acquisition time:
//!
//! - the multi-directory TIFF written by the acquisition software, whose
//!   per-frame metadata is embedded as free-text key/value pairs in the
//!   ImageDescription and Software tags (in either of two historical
//!   schema dialects);
//! - the position/rotation log written by the VR controlling PC on its
//!   own clock;
//! - an optional standalone rotary-encoder log with its own timestamps.
//!
//! Each frame's epoch-relative timestamp is converted to wall-clock time
//! using the epoch embedded in the image file, matched against the
//! nearest log sample, and recorded together with normalized and raw
//! X/Z translation and rotation in radians. The fused records feed the
//! downstream stabilization tooling that removes the animal's rotation
//! from the video.
//!
//! ## Usage
//!
//! The [`sync::SyncEngine`] is the front door:
//!
//! ```no_run
//! use libscansync::sync::SyncEngine;
//! # fn main() -> Result<(), libscansync::error::SyncError> {
//! let mut engine = SyncEngine::new();
//! engine.open_tiff_reader(std::path::Path::new("run_0001.tif"))?;
//! engine.open_position_log(std::path::Path::new("run_0001_log.txt"))?;
//! engine.interpolate_indices(0)?;
//! let theta = engine.get_theta();
//! let stable = engine.find_stable_frames(100, 1e-3);
//! # let _ = (theta, stable);
//! # Ok(())
//! # }
//! ```
//!
//! The `scansync_cli` crate wraps this in a YAML-configured command
//! line tool. The YAML format of a configuration file is as follows:
//!
//! ```yml
//! tiff_path: /data/run_0001.tif
//! log_path: /data/run_0001_log.txt
//! rotary_path: null
//! channel: 1
//! encoder_units_per_turn: 36800
//! tail_frames: null
//! tail_path: null
//! ```
//!
//! ## Known log defects handled here
//!
//! The rig's logging chain has two long-standing defects the parsers
//! reproduce deliberately: repeated samples (the same timestamp logged
//! twice) are dropped whole, and acquisitions cut short leave corrupted
//! trailing TIFF directories whose metadata reads are treated as
//! "unavailable" rather than as errors.
pub mod config;
pub mod constants;
pub mod error;
pub mod header;
pub mod position_log;
pub mod reader;
pub mod rotary_log;
pub mod scrape;
pub mod sync;
pub mod transform;
pub mod vr_data;
pub mod writer;
