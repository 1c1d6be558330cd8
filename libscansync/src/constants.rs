//! Token literals and fixed values shared by the parsers.
//!
//! The log files written by the VR rig have gone through several software
//! revisions; where two phrasings of the same event exist both are listed
//! here and the parsers accept either.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Key for the angular reference value near the top of newer position logs
pub const INIT_ROT_TOKEN: &str = "Angular reference";
/// Key marking a line that carries a rotation sample
pub const ROT_TOKEN: &str = "Rot";
/// Acquisition-start marker, older logging software
pub const SCOPE_TOKEN: &str = "MicroscopeTriggered";
/// Acquisition-start marker, newer logging software
pub const SPACEBAR_TOKEN: &str = "Started with SpaceBar";
/// Acquisition-start marker in the rotary encoder log
pub const ROTARY_TRIGGER_TOKEN: &str = "Trigger=1.000000";
pub const EQUAL_TOKEN: &str = "=";
/// Terminates the rotation field on a position line
pub const MOUSE_MOVE_TOKEN: &str = "MouseMove";
pub const X_TOKEN: &str = "X=";
pub const Z_TOKEN: &str = "Z=";

/// The rotary encoder has been swapped over the rig's lifetime so the
/// number of units per full rotation is configurable; this is the value
/// for the current hardware.
pub const DEFAULT_ENCODER_UNITS_PER_TURN: u32 = 36800;

/// Timestamp prefix on every log line, fractional seconds optional
pub const LOG_TIME_FMT: &[BorrowedFormatItem<'static>] = format_description!(
    version = 2,
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);

/// Key for the acquisition epoch vector in the first image description tag
pub const EPOCH_KEY: &str = "epoch =";

/// Rounding-error tolerance when thresholding the second difference of
/// the rotation series for stable-interval detection
pub const DEFAULT_STABLE_TOLERANCE: f64 = 1e-3;

/// Image size assumed when directory 0 carries no description tag
pub const DEFAULT_IMAGE_WIDTH: u32 = 512;
pub const DEFAULT_IMAGE_HEIGHT: u32 = 512;

/// Software-tag keys whose values name the channels an acquisition keeps.
/// All three are rewritten when a channel subset is written back out.
pub const CHANNEL_SELECT_KEYS: [&str; 3] = [
    "SI.hChannels.channelSave =",
    "SI.hChannels.channelActive =",
    "SI.hChannels.channelDisplay =",
];
