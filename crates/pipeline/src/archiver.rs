//! ZIP assembly for a batch of images.
//!
//! Images are fetched in fixed-size groups; a group finishes before the next
//! one starts. Failed fetches are skipped and reported, never fatal. The ZIP
//! itself is written on the blocking thread pool.

use std::io::{Cursor, Write};

use bytes::Bytes;
use futures::future::join_all;
use shutter_core::download::{FailedImage, ImageRef};
use shutter_core::naming::{entry_stem, UniqueNames};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::fetcher::{source_url, Fetcher};

/// Result of one archive run.
#[derive(Debug, Clone)]
pub struct ArchiveOutput {
    /// Serialized ZIP. Empty when nothing could be fetched.
    pub bytes: Bytes,
    /// Entry paths in archive order, e.g. `images/sunset.jpg`.
    pub entries: Vec<String>,
    /// Images that could not be fetched.
    pub skipped: Vec<FailedImage>,
}

impl ArchiveOutput {
    pub fn archived(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fetches a batch of images and packs the successes into one ZIP.
#[derive(Clone)]
pub struct Archiver {
    fetcher: Fetcher,
    config: ArchiveConfig,
}

impl Archiver {
    pub fn new(fetcher: Fetcher, config: ArchiveConfig) -> Self {
        Self { fetcher, config }
    }

    /// Build the archive for `images`.
    ///
    /// Returns [`ArchiveError`] only when writing the ZIP fails. A batch in
    /// which every fetch failed yields an empty output rather than an empty
    /// archive.
    pub async fn build(
        &self,
        images: &[ImageRef],
        high_definition: bool,
    ) -> Result<ArchiveOutput, ArchiveError> {
        let mut names = UniqueNames::new();
        let mut files: Vec<(String, Bytes)> = Vec::with_capacity(images.len());
        let mut skipped = Vec::new();

        for group in images.chunks(self.config.group_size.max(1)) {
            let fetches = group.iter().map(|image| {
                let url = source_url(&image.url, high_definition, self.fetcher.config());
                async move { self.fetcher.fetch(&url).await }
            });
            let results = join_all(fetches).await;

            for (image, result) in group.iter().zip(results) {
                match result {
                    Ok(fetched) => {
                        let stem = entry_stem(image.title.as_deref(), &image.id);
                        let name = names.reserve(&stem, fetched.extension);
                        files.push((format!("{}/{name}", self.config.folder), fetched.bytes));
                    }
                    Err(e) => {
                        tracing::warn!(
                            image_id = %image.id,
                            url = %e.url,
                            error = %e.cause,
                            "Skipping image that could not be fetched",
                        );
                        skipped.push(FailedImage {
                            image_id: image.id.clone(),
                            url: image.url.clone(),
                            cause: e.cause.to_string(),
                        });
                    }
                }
            }
        }

        let entries: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
        if files.is_empty() {
            return Ok(ArchiveOutput {
                bytes: Bytes::new(),
                entries,
                skipped,
            });
        }

        let folder = self.config.folder.clone();
        let level = self.config.compression_level;
        let bytes = tokio::task::spawn_blocking(move || write_zip(&folder, level, files)).await??;

        tracing::debug!(
            archived = entries.len(),
            skipped = skipped.len(),
            size = bytes.len(),
            "Archive written",
        );

        Ok(ArchiveOutput {
            bytes: Bytes::from(bytes),
            entries,
            skipped,
        })
    }
}

/// Serialize `files` (already prefixed with `folder/`) into a deflated ZIP.
fn write_zip(folder: &str, level: i64, files: Vec<(String, Bytes)>) -> Result<Vec<u8>, ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_directory(format!("{folder}/"), options)?;
    for (name, bytes) in files {
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn write_zip_places_entries_under_folder() {
        let files = vec![
            ("images/a.jpg".to_string(), Bytes::from_static(b"aaa")),
            ("images/b.png".to_string(), Bytes::from_static(b"bbb")),
        ];
        let bytes = write_zip("images", 6, files).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("images/b.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "bbb");
        assert!(archive.by_name("images/a.jpg").is_ok());
    }
}
