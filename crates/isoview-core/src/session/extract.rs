//! Copy a directory tree out of an image onto the local filesystem

use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::image::IsoImage;
use crate::error::Result;
use crate::iso9660::Record;
use crate::rockridge::RockRidgeAttributes;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExtractStatus {
    Success,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedItem {
    /// Path inside the image
    pub image_path: String,
    pub output_path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the written content, files only
    pub sha256: Option<String>,
    pub status: ExtractStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractReport {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_bytes: u64,
    pub details: Vec<ExtractedItem>,
}

/// Progress reported after each file
#[derive(Debug, Clone)]
pub struct ExtractProgress {
    pub current: String,
    pub files_done: usize,
    pub bytes_done: u64,
}

/// Size of a tree, used to size progress reporting up front
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeSize {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Count files, directories and content bytes below `directory`
pub fn measure_tree(image: &mut IsoImage, directory: &Record) -> Result<TreeSize> {
    let mut size = TreeSize::default();
    let mut visited = HashSet::from([directory.location]);
    let mut pending = vec![directory.clone()];

    while let Some(dir) = pending.pop() {
        for child in image.children(&dir)? {
            if child.is_directory {
                if !visited.insert(child.location) {
                    tracing::warn!("Directory extent {} already visited", child.location);
                    continue;
                }
                size.directories += 1;
                pending.push(child);
            } else {
                size.files += 1;
                size.bytes += u64::from(child.length);
            }
        }
    }

    Ok(size)
}

pub struct Extractor<'a> {
    image: &'a mut IsoImage,
    preserve_permissions: bool,
    progress_callback: Option<Box<dyn Fn(&ExtractProgress) + 'a>>,
    report: ExtractReport,
    /// Directory extents already entered
    visited: HashSet<u32>,
}

impl<'a> Extractor<'a> {
    pub fn new(image: &'a mut IsoImage) -> Self {
        Self {
            image,
            preserve_permissions: true,
            progress_callback: None,
            report: ExtractReport::default(),
            visited: HashSet::new(),
        }
    }

    /// Apply Rock Ridge permission bits to extracted files (Unix only)
    pub fn with_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ExtractProgress) + 'a,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Extract `record` (file or directory) into `output_dir`
    pub fn run(mut self, record: &Record, output_dir: &Path) -> Result<ExtractReport> {
        create_dir_all(output_dir)?;
        tracing::info!("Extracting to {}", output_dir.display());

        if record.is_directory {
            self.visited.insert(record.location);
            self.extract_directory(record, "", output_dir)?;
        } else {
            let name = self.image.display_name(record)?;
            if is_safe_name(&name) {
                let attributes = self.image.rock_ridge_attributes(record)?;
                self.extract_item(record, attributes.as_ref(), &name, &output_dir.join(&name));
            } else {
                tracing::warn!("Skipping entry with unsafe name {:?}", name);
                let status = ExtractStatus::Skipped("unsafe name".to_string());
                self.push(name, output_dir.to_path_buf(), 0, None, status);
            }
        }

        tracing::info!(
            "Extraction complete: {} files, {} directories, {} symlinks, {} failed, {} bytes",
            self.report.files,
            self.report.directories,
            self.report.symlinks,
            self.report.failed,
            self.report.total_bytes
        );
        Ok(self.report)
    }

    fn extract_directory(
        &mut self,
        directory: &Record,
        image_path: &str,
        target: &Path,
    ) -> Result<()> {
        create_dir_all(target)?;

        for child in self.image.children(directory)? {
            let name = self.image.display_name(&child)?;
            let child_path = format!("{}/{}", image_path, name);

            if !is_safe_name(&name) {
                tracing::warn!("Skipping entry with unsafe name {:?}", name);
                let status = ExtractStatus::Skipped("unsafe name".to_string());
                self.push(child_path, target.to_path_buf(), 0, None, status);
                continue;
            }

            let output_path = target.join(&name);
            let attributes = self.image.rock_ridge_attributes(&child)?;

            let is_link = attributes.as_ref().map_or(false, |a| a.symlink.is_some());
            if child.is_directory && !is_link {
                if !self.visited.insert(child.location) {
                    tracing::warn!("Skipping {}: directory extent already visited", child_path);
                    let status = ExtractStatus::Skipped("directory loop".to_string());
                    self.push(child_path, output_path, 0, None, status);
                    continue;
                }
                self.report.directories += 1;
                self.extract_directory(&child, &child_path, &output_path)?;
                self.apply_permissions(&output_path, attributes.as_ref());
            } else {
                self.extract_item(&child, attributes.as_ref(), &child_path, &output_path);
            }
        }

        Ok(())
    }

    /// Extract a file or symlink; failures are recorded, not returned
    fn extract_item(
        &mut self,
        record: &Record,
        attributes: Option<&RockRidgeAttributes>,
        image_path: &str,
        output_path: &Path,
    ) {
        if let Some(target) = attributes.and_then(|a| a.symlink.as_deref()) {
            let target = String::from_utf8_lossy(target).into_owned();
            let status = match make_symlink(&target, output_path) {
                Ok(()) => {
                    self.report.symlinks += 1;
                    ExtractStatus::Success
                }
                Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                    ExtractStatus::Skipped("symlinks unsupported on this platform".to_string())
                }
                Err(e) => ExtractStatus::Failed(e.to_string()),
            };
            self.push(image_path.to_string(), output_path.to_path_buf(), 0, None, status);
            return;
        }

        match self.copy_file(record, output_path) {
            Ok((bytes, digest)) => {
                self.report.files += 1;
                self.report.total_bytes += bytes;
                self.apply_permissions(output_path, attributes);
                tracing::debug!("Extracted {} ({} bytes, sha256 {})", image_path, bytes, digest);
                self.push(
                    image_path.to_string(),
                    output_path.to_path_buf(),
                    bytes,
                    Some(digest),
                    ExtractStatus::Success,
                );
            }
            Err(e) => {
                tracing::warn!("Failed to extract {}: {}", image_path, e);
                self.push(
                    image_path.to_string(),
                    output_path.to_path_buf(),
                    0,
                    None,
                    ExtractStatus::Failed(e.to_string()),
                );
            }
        }

        if let Some(ref callback) = self.progress_callback {
            callback(&ExtractProgress {
                current: image_path.to_string(),
                files_done: self.report.files + self.report.failed,
                bytes_done: self.report.total_bytes,
            });
        }
    }

    /// Copy content to `output_path`, returning the byte count and hex digest
    fn copy_file(&mut self, record: &Record, output_path: &Path) -> Result<(u64, String)> {
        let mut stream = self.image.open_stream(record)?;
        let mut writer = HashingWriter {
            inner: File::create(output_path)?,
            hasher: Sha256::new(),
        };
        let bytes = io::copy(&mut stream, &mut writer)?;
        writer.flush()?;
        Ok((bytes, format!("{:x}", writer.hasher.finalize())))
    }

    fn push(
        &mut self,
        image_path: String,
        output_path: PathBuf,
        bytes: u64,
        sha256: Option<String>,
        status: ExtractStatus,
    ) {
        match status {
            ExtractStatus::Failed(_) => self.report.failed += 1,
            ExtractStatus::Skipped(_) => self.report.skipped += 1,
            ExtractStatus::Success => {}
        }
        self.report.details.push(ExtractedItem {
            image_path,
            output_path,
            bytes,
            sha256,
            status,
        });
    }

    #[cfg(unix)]
    fn apply_permissions(&self, path: &Path, attributes: Option<&RockRidgeAttributes>) {
        use std::os::unix::fs::PermissionsExt;

        if !self.preserve_permissions {
            return;
        }
        if let Some(mode) = attributes.and_then(RockRidgeAttributes::permissions) {
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
                tracing::warn!("Could not set mode {:o} on {}: {}", mode, path.display(), e);
            }
        }
    }

    #[cfg(not(unix))]
    fn apply_permissions(&self, _path: &Path, _attributes: Option<&RockRidgeAttributes>) {}
}

/// Extract with default settings and no progress reporting
pub fn extract_tree(
    image: &mut IsoImage,
    record: &Record,
    output_dir: &Path,
) -> Result<ExtractReport> {
    Extractor::new(image).run(record, output_dir)
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &str, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks not supported"))
}
