// Copyright (c) The devtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::CompressionError;
use camino::{Utf8Path, Utf8PathBuf};
use devtest_metadata::LogDataType;
use std::{
    fs::File,
    io::{self, BufWriter},
};
use tracing::debug;

/// Compresses a report directory into a single archive file before it is logged.
pub trait CompressionStrategy {
    /// Compresses `dir` into a new archive file inside `out_dir`, returning the archive's path.
    fn compress(&self, dir: &Utf8Path, out_dir: &Utf8Path) -> Result<Utf8PathBuf, CompressionError>;

    /// Returns the data type archives are logged with.
    fn log_data_type(&self) -> LogDataType;
}

/// Compresses directories into zstd-compressed tarballs.
#[derive(Clone, Copy, Debug)]
pub struct TarZstdCompression {
    level: i32,
}

impl TarZstdCompression {
    /// The default zstd compression level.
    pub const DEFAULT_LEVEL: i32 = 3;

    /// Creates a new strategy with the given zstd compression level.
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    fn write_archive(&self, dir: &Utf8Path, archive: &Utf8Path) -> io::Result<()> {
        let file = File::create(archive)?;
        let mut encoder = zstd::Encoder::new(BufWriter::new(file), self.level)?;
        encoder.include_checksum(true)?;

        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        let root = dir.file_name().unwrap_or("report");
        builder.append_dir_all(root, dir)?;

        let encoder = builder.into_inner()?;
        let buf_writer = encoder.finish()?;
        buf_writer.into_inner().map_err(|err| err.into_error())?;
        Ok(())
    }
}

impl Default for TarZstdCompression {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl CompressionStrategy for TarZstdCompression {
    fn compress(&self, dir: &Utf8Path, out_dir: &Utf8Path) -> Result<Utf8PathBuf, CompressionError> {
        let name = dir.file_name().unwrap_or("report");
        let archive = out_dir.join(format!("{name}.tar.zst"));
        self.write_archive(dir, &archive)
            .map_err(|error| CompressionError::new(dir, error))?;
        debug!(%dir, %archive, "compressed report directory");
        Ok(archive)
    }

    fn log_data_type(&self) -> LogDataType {
        LogDataType::TarZstd
    }
}
