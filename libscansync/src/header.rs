//! Version-aware scraping of the free-text metadata embedded in the
//! image file's directory tags.
//!
//! The acquisition software has written its per-frame metadata in two
//! incompatible dialects over the years. Older files key their values
//! with strings like `Frame Number =` inside the ImageDescription tag
//! and leave the Software tag unused; newer files use `frameNumbers =`
//! style keys and put channel metadata in the Software tag. Which
//! dialect a file speaks is decided once, from directory 0, and never
//! changes for the life of the file.

use std::io::{Read, Seek};

use fxhash::FxHashMap;
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use time::PrimitiveDateTime;

use super::constants::{DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_WIDTH, EPOCH_KEY};
use super::error::HeaderError;
use super::scrape::{grab_str, grab_value, parse_bracketed_ints};

/// The two known dialects of embedded metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    Legacy,
    Current,
}

/// The key literals used to locate values inside the tag text for one
/// schema dialect.
#[derive(Debug)]
pub struct HeaderKeys {
    pub channel_saved: &'static str,
    pub channel_lut: &'static str,
    pub channel_offsets: &'static str,
    pub channel_names: Option<&'static str>,
    pub frame_number: &'static str,
    pub frame_timestamp: &'static str,
}

const LEGACY_KEYS: HeaderKeys = HeaderKeys {
    channel_saved: "scanimage.SI5.channelsSave =",
    channel_lut: "scanimage.SI5.chan1LUT =",
    channel_offsets: "scanimage.SI5.channelOffsets =",
    channel_names: None,
    frame_number: "Frame Number =",
    frame_timestamp: "Frame Timestamp(s) =",
};

const CURRENT_KEYS: HeaderKeys = HeaderKeys {
    channel_saved: "SI.hChannels.channelSave =",
    channel_lut: "SI.hChannels.channelLUT =",
    channel_offsets: "SI.hChannels.channelOffset =",
    channel_names: Some("SI.hChannels.channelName ="),
    frame_number: "frameNumbers =",
    frame_timestamp: "frameTimestamps_sec =",
};

impl SchemaVersion {
    pub fn keys(self) -> &'static HeaderKeys {
        match self {
            SchemaVersion::Legacy => &LEGACY_KEYS,
            SchemaVersion::Current => &CURRENT_KEYS,
        }
    }

    /// Decide the dialect from directory 0's description text. None
    /// means the file speaks neither dialect and every tag-dependent
    /// read will come back empty.
    pub fn detect(description: &str) -> Option<SchemaVersion> {
        if grab_str(description, LEGACY_KEYS.frame_number).is_some() {
            Some(SchemaVersion::Legacy)
        } else if grab_str(description, CURRENT_KEYS.frame_number).is_some() {
            Some(SchemaVersion::Current)
        } else {
            None
        }
    }
}

/// Select directory `dirnum` and read its ImageDescription text, or
/// None when the directory or tag is unavailable.
pub fn image_description<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    dirnum: usize,
) -> Option<String> {
    decoder.seek_to_image(dirnum).ok()?;
    decoder
        .get_tag_ascii_string(Tag::ImageDescription)
        .ok()
        .filter(|s| !s.is_empty())
}

/// Select directory `dirnum` and read its Software tag text, or None
/// when the directory or tag is unavailable.
pub fn software_text<R: Read + Seek>(decoder: &mut Decoder<R>, dirnum: usize) -> Option<String> {
    decoder.seek_to_image(dirnum).ok()?;
    decoder
        .get_tag_ascii_string(Tag::Software)
        .ok()
        .filter(|s| !s.is_empty())
}

/// Everything scraped from the metadata tags: schema version, channel
/// maps and the acquisition epoch. Owned by the reader; the channel
/// maps are rebuilt wholesale on every re-scrape rather than patched.
#[derive(Debug, Default)]
pub struct ScanImageHeader {
    version: Option<SchemaVersion>,
    chan_lut: FxHashMap<u32, (i32, i32)>,
    chan_offsets: FxHashMap<u32, i32>,
    chan_saved: FxHashMap<u32, u32>,
    epoch_time: Option<PrimitiveDateTime>,
}

impl ScanImageHeader {
    /// Decide the schema dialect from directory 0 and report the image
    /// size, defaulting to 512x512 when directory 0 carries no
    /// description text at all.
    pub fn version_check<R: Read + Seek>(&mut self, decoder: &mut Decoder<R>) -> (u32, u32) {
        match image_description(decoder, 0) {
            Some(desc) => {
                self.version = SchemaVersion::detect(&desc);
                decoder
                    .dimensions()
                    .unwrap_or((DEFAULT_IMAGE_WIDTH, DEFAULT_IMAGE_HEIGHT))
            }
            None => (DEFAULT_IMAGE_WIDTH, DEFAULT_IMAGE_HEIGHT),
        }
    }

    pub fn version(&self) -> Option<SchemaVersion> {
        self.version
    }

    /// Rebuild the channel LUT/offset/saved maps from directory
    /// `dirnum` and return the tag text they came from. For Legacy
    /// files the channel metadata lives in the description tag (and the
    /// saved channel has to be inferred); for Current files it lives in
    /// the Software tag.
    pub fn read_channel_info<R: Read + Seek>(
        &mut self,
        decoder: &mut Decoder<R>,
        dirnum: usize,
    ) -> Result<Option<String>, HeaderError> {
        let Some(version) = self.version else {
            return Ok(None);
        };
        let keys = version.keys();
        match version {
            SchemaVersion::Legacy => {
                let Some(desc) = image_description(decoder, dirnum) else {
                    return Ok(None);
                };
                // old headers don't say which channel was kept
                let mut saved = FxHashMap::default();
                saved.insert(0, 1);
                self.chan_saved = saved;
                self.chan_lut = parse_channel_lut(keys.channel_lut, grab_str(&desc, keys.channel_lut))?;
                self.chan_offsets =
                    parse_channel_offsets(keys.channel_offsets, grab_str(&desc, keys.channel_offsets))?;
                Ok(Some(desc))
            }
            SchemaVersion::Current => {
                let Some(sw) = software_text(decoder, dirnum) else {
                    return Ok(None);
                };
                self.chan_lut = parse_channel_lut(keys.channel_lut, grab_str(&sw, keys.channel_lut))?;
                self.chan_offsets =
                    parse_channel_offsets(keys.channel_offsets, grab_str(&sw, keys.channel_offsets))?;
                self.chan_saved =
                    parse_saved_channels(keys.channel_saved, grab_str(&sw, keys.channel_saved))?;
                Ok(Some(sw))
            }
        }
    }

    /// Per-channel display LUT bounds, 1-indexed by channel
    pub fn chan_lut(&self) -> &FxHashMap<u32, (i32, i32)> {
        &self.chan_lut
    }

    /// Per-channel offsets, 1-indexed by channel
    pub fn chan_offsets(&self) -> &FxHashMap<u32, i32> {
        &self.chan_offsets
    }

    /// The channels saved in this acquisition, 0-indexed by the order
    /// they appear in the header. Channels are interleaved
    /// directory-by-directory in this order.
    pub fn chan_saved(&self) -> &FxHashMap<u32, u32> {
        &self.chan_saved
    }

    /// Frame number (1-based, as the acquisition software wrote it) and
    /// timestamp in fractional seconds since the file epoch for
    /// directory `dirnum`. None when either key is missing, which is
    /// expected for corrupted directories at end-of-file.
    pub fn frame_number_and_timestamp<R: Read + Seek>(
        &self,
        decoder: &mut Decoder<R>,
        dirnum: usize,
    ) -> Result<Option<(u32, f64)>, HeaderError> {
        let Some(version) = self.version else {
            return Ok(None);
        };
        let keys = version.keys();
        let Some(desc) = image_description(decoder, dirnum) else {
            return Ok(None);
        };
        let Some(frame_text) = grab_value(&desc, keys.frame_number) else {
            return Ok(None);
        };
        let Some(ts_text) = grab_value(&desc, keys.frame_timestamp) else {
            return Ok(None);
        };
        let framenum = frame_text.parse().map_err(|_| HeaderError::BadInteger {
            key: keys.frame_number.to_string(),
            value: frame_text.to_string(),
        })?;
        let timestamp = ts_text.parse().map_err(|_| HeaderError::BadFloat {
            key: keys.frame_timestamp.to_string(),
            value: ts_text.to_string(),
        })?;
        Ok(Some((framenum, timestamp)))
    }

    /// Scrape the per-directory timestamps sequentially from directory
    /// 0, stopping at the first directory whose header is missing or
    /// corrupt (common at end-of-file when an acquisition was cut
    /// short).
    pub fn scrape_timestamps<R: Read + Seek>(&self, decoder: &mut Decoder<R>) -> Vec<f64> {
        let mut timestamps = Vec::new();
        let Some(version) = self.version else {
            return timestamps;
        };
        let key = version.keys().frame_timestamp;
        if decoder.seek_to_image(0).is_err() {
            return timestamps;
        }
        loop {
            let Ok(desc) = decoder.get_tag_ascii_string(Tag::ImageDescription) else {
                break;
            };
            let Some(text) = grab_value(&desc, key) else {
                break;
            };
            let Ok(ts) = text.parse::<f64>() else {
                break;
            };
            timestamps.push(ts);
            if !decoder.more_images() || decoder.next_image().is_err() {
                break;
            }
        }
        timestamps
    }

    /// The wall-clock instant acquisition started, from the
    /// `epoch = [...]` vector in directory 0's description text.
    pub fn read_epoch_time<R: Read + Seek>(
        &mut self,
        decoder: &mut Decoder<R>,
    ) -> Result<Option<PrimitiveDateTime>, HeaderError> {
        let Some(desc) = image_description(decoder, 0) else {
            return Ok(None);
        };
        let Some(text) = grab_value(&desc, EPOCH_KEY) else {
            return Ok(None);
        };
        let epoch = parse_epoch(text)?;
        self.epoch_time = Some(epoch);
        Ok(self.epoch_time)
    }

    pub fn epoch_time(&self) -> Option<PrimitiveDateTime> {
        self.epoch_time
    }

    /// Rough per-directory byte footprint of directory `dirnum`: the
    /// raw pixel payload assuming 4 bytes per sample.
    pub fn size_per_directory<R: Read + Seek>(
        &self,
        decoder: &mut Decoder<R>,
        dirnum: usize,
    ) -> u64 {
        if decoder.seek_to_image(dirnum).is_err() {
            return 0;
        }
        match decoder.dimensions() {
            Ok((w, h)) => u64::from(w) * u64::from(h) * 4,
            Err(_) => 0,
        }
    }

    /// Fast approximate directory count: file size over the footprint
    /// of directory 0 (half its pixel payload plus its header text).
    /// Only good enough to seed [`Self::count_directories`].
    pub fn quick_count_directories<R: Read + Seek>(
        &self,
        decoder: &mut Decoder<R>,
        file_size: u64,
    ) -> u64 {
        let header_len = (software_text(decoder, 0).map_or(0, |s| s.len())
            + image_description(decoder, 0).map_or(0, |s| s.len())) as u64;
        let size_per_dir = self.size_per_directory(decoder, 0) / 2 + header_len;
        if size_per_dir == 0 {
            return 0;
        }
        file_size / size_per_dir
    }

    /// Authoritative directory count: seeded by the fast estimate, then
    /// advanced one directory at a time until the file says there are
    /// no more (or a trailing directory fails to parse).
    pub fn count_directories<R: Read + Seek>(
        &self,
        decoder: &mut Decoder<R>,
        file_size: u64,
    ) -> u32 {
        let estimate = self.quick_count_directories(decoder, file_size);
        let mut count;
        if estimate > 1 && decoder.seek_to_image(estimate as usize - 1).is_ok() {
            count = estimate as u32;
        } else if decoder.seek_to_image(0).is_ok() {
            count = 1;
        } else {
            return 0;
        }
        while decoder.more_images() {
            if decoder.next_image().is_err() {
                break;
            }
            count += 1;
        }
        count
    }
}

/// Decode channel LUT text (bracketed integer pairs) into a map
/// 1-indexed by encounter order.
fn parse_channel_lut(
    key: &str,
    text: Option<&str>,
) -> Result<FxHashMap<u32, (i32, i32)>, HeaderError> {
    let mut map = FxHashMap::default();
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(map);
    };
    let values = parse_bracketed_ints(text).map_err(|_| HeaderError::BadInteger {
        key: key.to_string(),
        value: text.to_string(),
    })?;
    for (i, pair) in values.chunks_exact(2).enumerate() {
        map.insert(i as u32 + 1, (pair[0] as i32, pair[1] as i32));
    }
    Ok(map)
}

/// Decode channel offset text (bracketed integers) into a map 1-indexed
/// by encounter order.
fn parse_channel_offsets(
    key: &str,
    text: Option<&str>,
) -> Result<FxHashMap<u32, i32>, HeaderError> {
    let mut map = FxHashMap::default();
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(map);
    };
    let values = parse_bracketed_ints(text).map_err(|_| HeaderError::BadInteger {
        key: key.to_string(),
        value: text.to_string(),
    })?;
    for (i, v) in values.iter().enumerate() {
        map.insert(i as u32 + 1, *v as i32);
    }
    Ok(map)
}

/// Decode saved-channel text: a single bare number is one channel at
/// index 0, otherwise a bracketed semicolon-separated list 0-indexed in
/// encounter order.
fn parse_saved_channels(
    key: &str,
    text: Option<&str>,
) -> Result<FxHashMap<u32, u32>, HeaderError> {
    let mut map = FxHashMap::default();
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(map);
    };
    let values = parse_bracketed_ints(text).map_err(|_| HeaderError::BadInteger {
        key: key.to_string(),
        value: text.to_string(),
    })?;
    for (i, v) in values.iter().enumerate() {
        map.insert(i as u32, *v as u32);
    }
    Ok(map)
}

/// Interpret the epoch vector text, e.g. `[2022  1 18 15 21 21.5]`:
/// year, month, day, hour, minute and (possibly fractional) second.
fn parse_epoch(text: &str) -> Result<PrimitiveDateTime, HeaderError> {
    let bad = || HeaderError::BadEpoch(text.to_string());
    let inner = text
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    let fields: Vec<&str> = inner.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(bad());
    }
    let year: i32 = fields[0].parse().map_err(|_| bad())?;
    let month: u8 = fields[1].parse().map_err(|_| bad())?;
    let day: u8 = fields[2].parse().map_err(|_| bad())?;
    let hour: u8 = fields[3].parse().map_err(|_| bad())?;
    let minute: u8 = fields[4].parse().map_err(|_| bad())?;
    let second: f64 = fields[5].parse().map_err(|_| bad())?;
    if !(0.0..60.0).contains(&second) {
        return Err(bad());
    }

    let month = time::Month::try_from(month).map_err(|_| bad())?;
    let date = time::Date::from_calendar_date(year, month, day).map_err(|_| bad())?;
    let nanos = ((second - second.trunc()) * 1e9).round() as u32;
    let tod = time::Time::from_hms_nano(hour, minute, second.trunc() as u8, nanos)
        .map_err(|_| bad())?;
    Ok(PrimitiveDateTime::new(date, tod))
}
