//! Reading side of the image container: opens the multi-directory TIFF,
//! scrapes its metadata through [`ScanImageHeader`] and decodes frames
//! into dense pixel buffers.
//!
//! The acquisition software stores one channel per directory,
//! interleaved in acquisition order, as uncompressed 16-bit signed
//! samples in either horizontal strips or tiles. Directories are
//! zero-indexed here; the frame numbers embedded in the metadata are
//! one-indexed.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult};
use time::PrimitiveDateTime;

use super::error::ReaderError;
use super::header::{image_description, ScanImageHeader};

pub struct TiffStackReader {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    header: ScanImageHeader,
    image_width: u32,
    image_height: u32,
}

impl TiffStackReader {
    /// Open a file for reading and scrape directory 0: schema version,
    /// image size, channel maps and the acquisition epoch.
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        if !path.exists() {
            return Err(ReaderError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let mut header = ScanImageHeader::default();
        let (width, height) = header.version_check(&mut decoder);
        if header.version().is_none() {
            log::warn!(
                "Unrecognized metadata dialect in {}; tag-dependent reads will be empty",
                path.to_string_lossy()
            );
        }
        header.read_channel_info(&mut decoder, 0)?;
        header.read_epoch_time(&mut decoder)?;
        Ok(TiffStackReader {
            path: path.to_path_buf(),
            decoder,
            header,
            image_width: width,
            image_height: height,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ScanImageHeader {
        &self.header
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn epoch_time(&self) -> Option<PrimitiveDateTime> {
        self.header.epoch_time()
    }

    /// Re-scrape the channel maps from directory `dirnum` and return
    /// the tag text carrying them (the Software tag for Current files,
    /// the description tag for Legacy ones).
    pub fn software_tag(&mut self, dirnum: usize) -> Result<Option<String>, ReaderError> {
        Ok(self.header.read_channel_info(&mut self.decoder, dirnum)?)
    }

    pub fn image_description_tag(&mut self, dirnum: usize) -> Option<String> {
        image_description(&mut self.decoder, dirnum)
    }

    /// Frame number and epoch-relative timestamp for one directory.
    /// None for corrupted trailing directories.
    pub fn frame_number_and_timestamp(
        &mut self,
        dirnum: usize,
    ) -> Result<Option<(u32, f64)>, ReaderError> {
        Ok(self
            .header
            .frame_number_and_timestamp(&mut self.decoder, dirnum)?)
    }

    /// Every per-directory timestamp, scraped sequentially until the
    /// first missing/corrupt header.
    pub fn all_timestamps(&mut self) -> Vec<f64> {
        log::info!("Starting scraping timestamps...");
        let timestamps = self.header.scrape_timestamps(&mut self.decoder);
        log::info!("Finished scraping timestamps ({} found)", timestamps.len());
        timestamps
    }

    pub fn count_directories(&mut self) -> u32 {
        let file_size = self.file_size();
        self.header.count_directories(&mut self.decoder, file_size)
    }

    pub fn size_per_directory(&mut self, dirnum: usize) -> u64 {
        self.header.size_per_directory(&mut self.decoder, dirnum)
    }

    /// Decode directory `dirnum` into a dense height x width buffer.
    ///
    /// Both strip and tile layouts decode; samples are 16-bit signed,
    /// one per pixel. Returns an empty grid when the directory cannot
    /// be selected or its fields don't read, mirroring the tolerance
    /// needed for corrupted trailing frames.
    pub fn read_frame(&mut self, dirnum: usize) -> Array2<i16> {
        let empty = || Array2::zeros((0, 0));
        if self.decoder.seek_to_image(dirnum).is_err() {
            log::warn!("Could not select directory {dirnum}");
            return empty();
        }
        let Ok((width, height)) = self.decoder.dimensions() else {
            return empty();
        };
        self.image_width = width;
        self.image_height = height;
        let shape = (height as usize, width as usize);
        match self.decoder.read_image() {
            Ok(DecodingResult::I16(samples)) => {
                Array2::from_shape_vec(shape, samples).unwrap_or_else(|_| empty())
            }
            // some writers mark the data unsigned; the bit patterns
            // are what the acquisition wrote either way
            Ok(DecodingResult::U16(samples)) => {
                let samples = samples.into_iter().map(|v| v as i16).collect();
                Array2::from_shape_vec(shape, samples).unwrap_or_else(|_| empty())
            }
            Ok(_) => {
                log::warn!("Directory {dirnum} does not hold 16-bit samples");
                empty()
            }
            Err(e) => {
                log::warn!("Failed to decode directory {dirnum}: {e}");
                empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SchemaVersion;
    use crate::writer::TiffStackWriter;
    use ndarray::Array2;

    fn test_frame(seed: i16) -> Array2<i16> {
        Array2::from_shape_fn((8, 16), |(r, c)| seed + (r * 16 + c) as i16 - 64)
    }

    fn description(framenum: usize) -> String {
        format!(
            "frameNumbers = {framenum}\n\
             frameTimestamps_sec = {:.3}\n\
             epoch = [2022  1 18 15 21 21]\n",
            (framenum - 1) as f64 * 0.1
        )
    }

    const SOFTWARE: &str = "SI.hChannels.channelSave = 1\n\
SI.hChannels.channelLUT = {[0 32767]}\n\
SI.hChannels.channelOffset = [0]\n";

    fn write_stack(path: &Path, frames: usize) {
        let mut writer = TiffStackWriter::open(path).unwrap();
        for n in 1..=frames {
            writer.stage_si_header(SOFTWARE, &description(n));
            writer.write_frame(&test_frame(n as i16)).unwrap();
        }
        writer.close();
    }

    #[test]
    fn test_open_and_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        write_stack(&path, 4);

        let mut reader = TiffStackReader::open(&path).unwrap();
        assert_eq!(reader.header().version(), Some(SchemaVersion::Current));
        assert_eq!(reader.image_width(), 16);
        assert_eq!(reader.image_height(), 8);
        assert_eq!(reader.header().chan_saved().len(), 1);
        assert_eq!(reader.header().chan_lut()[&1], (0, 32767));
        assert_eq!(
            reader.epoch_time(),
            Some(time::macros::datetime!(2022-01-18 15:21:21))
        );
        assert_eq!(reader.count_directories(), 4);

        let timestamps = reader.all_timestamps();
        assert_eq!(timestamps.len(), 4);
        assert!((timestamps[3] - 0.3).abs() < 1e-9);

        let (framenum, ts) = reader.frame_number_and_timestamp(2).unwrap().unwrap();
        assert_eq!(framenum, 3);
        assert!((ts - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_read_frame_round_trips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        write_stack(&path, 2);

        let mut reader = TiffStackReader::open(&path).unwrap();
        assert_eq!(reader.read_frame(0), test_frame(1));
        assert_eq!(reader.read_frame(1), test_frame(2));
        // out of range directories come back empty, not as errors
        assert_eq!(reader.read_frame(99).len(), 0);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            TiffStackReader::open(Path::new("/no/such/stack.tif")),
            Err(ReaderError::BadFilePath(_))
        ));
    }
}
