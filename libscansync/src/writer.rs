//! Writing side of the image container.
//!
//! Frames go out as BigTIFF directories holding uncompressed 16-bit
//! signed samples, one strip per row, so a decoded frame written back
//! out round-trips bit-exact. Each frame can carry the Software and
//! ImageDescription text of the source directory it was derived from,
//! optionally with the channel-selection keys rewritten when a single
//! channel of a multi-channel acquisition is being kept.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tiff::encoder::{colortype, TiffEncoder, TiffKindBig};
use tiff::tags::Tag;

use super::constants::CHANNEL_SELECT_KEYS;
use super::error::WriterError;
use super::scrape::grab_str;

type BigTiffEncoder = TiffEncoder<BufWriter<File>, TiffKindBig>;

pub struct TiffStackWriter {
    path: PathBuf,
    encoder: Option<BigTiffEncoder>,
    pending_tags: Option<(String, String)>,
}

impl TiffStackWriter {
    /// Create `path` and open it for BigTIFF output.
    pub fn open(path: &Path) -> Result<Self, WriterError> {
        let file = File::create(path)?;
        let encoder = TiffEncoder::new_big(BufWriter::new(file))?;
        Ok(TiffStackWriter {
            path: path.to_path_buf(),
            encoder: Some(encoder),
            pending_tags: None,
        })
    }

    pub fn is_opened(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stage acquisition metadata to be written verbatim onto the next
    /// frame's directory.
    pub fn stage_si_header(&mut self, software: &str, description: &str) {
        self.pending_tags = Some((software.to_string(), description.to_string()));
    }

    /// Write one frame as a new directory and commit it.
    ///
    /// The buffer is height x width, emitted row by row as uncompressed
    /// strips. Any tags staged with [`Self::stage_si_header`] are
    /// written onto this directory and cleared.
    pub fn write_frame(&mut self, frame: &Array2<i16>) -> Result<(), WriterError> {
        let encoder = self.encoder.as_mut().ok_or(WriterError::NotOpened)?;
        let (height, width) = frame.dim();
        if height == 0 || width == 0 {
            return Err(WriterError::EmptyFrame);
        }

        let mut image = encoder.new_image::<colortype::GrayI16>(width as u32, height as u32)?;
        image.rows_per_strip(1)?;
        if let Some((software, description)) = self.pending_tags.take() {
            image
                .encoder()
                .write_tag(Tag::ImageDescription, description.as_str())?;
            image.encoder().write_tag(Tag::Software, software.as_str())?;
        }

        let data = frame.as_standard_layout();
        let samples = data.as_slice().expect("row-major frame buffer");
        let mut offset = 0;
        loop {
            let strip_len = image.next_strip_sample_count() as usize;
            if strip_len == 0 {
                break;
            }
            image.write_strip(&samples[offset..offset + strip_len])?;
            offset += strip_len;
        }
        image.finish()?;
        Ok(())
    }

    /// Rewrite the value of each channel-selection key in a Software
    /// tag to a bracketed list of the channels being kept. Used when a
    /// subset of a multi-channel acquisition is written back out.
    pub fn modify_channels(tag_text: &str, channels_to_keep: &[u32]) -> String {
        let list = format!(
            "[{}]",
            channels_to_keep
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(";")
        );
        let mut out = tag_text.to_string();
        for key in CHANNEL_SELECT_KEYS {
            let Some(old_value) = grab_str(&out, key) else {
                continue;
            };
            let replaced = format!("{key} {list}");
            let whole = format!("{key}{old_value}");
            out = out.replacen(&whole, &replaced, 1);
        }
        out
    }

    /// Drop the encoder, flushing the file. Returns false when nothing
    /// was open.
    pub fn close(&mut self) -> bool {
        self.pending_tags = None;
        self.encoder.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modify_channels_rewrites_all_selection_keys() {
        let tag = "SI.hChannels.channelSave = [1;2]\n\
                   SI.hChannels.channelActive = [1;2]\n\
                   SI.hChannels.channelDisplay = [1;2]\n\
                   SI.hChannels.channelLUT = {[0 100] [0 200]}\n";
        let out = TiffStackWriter::modify_channels(tag, &[2]);
        assert!(out.contains("SI.hChannels.channelSave = [2]\n"));
        assert!(out.contains("SI.hChannels.channelActive = [2]\n"));
        assert!(out.contains("SI.hChannels.channelDisplay = [2]\n"));
        // unrelated keys untouched
        assert!(out.contains("SI.hChannels.channelLUT = {[0 100] [0 200]}\n"));
    }

    #[test]
    fn test_modify_channels_missing_keys_left_alone() {
        let tag = "SI.hChannels.channelSave = 1\n";
        let out = TiffStackWriter::modify_channels(tag, &[1]);
        assert!(out.contains("SI.hChannels.channelSave = [1]\n"));
        assert!(!out.contains("channelActive"));
    }

    #[test]
    fn test_write_requires_open_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let mut writer = TiffStackWriter::open(&path).unwrap();
        assert!(writer.is_opened());
        assert!(writer.close());
        assert!(!writer.close());
        let frame = Array2::<i16>::zeros((4, 4));
        assert!(matches!(
            writer.write_frame(&frame),
            Err(WriterError::NotOpened)
        ));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let mut writer = TiffStackWriter::open(&path).unwrap();
        let frame = Array2::<i16>::zeros((0, 0));
        assert!(matches!(
            writer.write_frame(&frame),
            Err(WriterError::EmptyFrame)
        ));
    }
}
