//! An open image: descriptor set, path table, root directory and SUSP state

use std::io::Read;
use std::path::Path;

use crate::config::SourceConfig;
use crate::error::{IsoError, Result};
use crate::iso9660::{Children, PathTable, Record, VolumeDescriptorSet, VolumeInfo};
use crate::rockridge::RockRidgeAttributes;
use crate::source::{BlockSource, BlockTransport, FileTransport, HttpTransport, SECTOR_SIZE};
use crate::susp::{EntryKind, ExtensionId, SuspContext, SuspEntry, SuspMode};

use super::listing::{DirEntry, VolumeSummary};

pub struct IsoImage {
    source: BlockSource,
    descriptors: VolumeDescriptorSet,
    path_table: PathTable,
    root: Record,
    susp: SuspMode,
}

impl IsoImage {
    /// Open a local image file with the default configuration
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, SourceConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: SourceConfig) -> Result<Self> {
        let transport = FileTransport::open(path.as_ref())?;
        Self::from_transport(transport, config)
    }

    /// Open an image given as a local path, a `file://` URL or an
    /// `http(s)://` URL. Other schemes go through `from_transport`.
    pub fn open_location(location: &str, config: SourceConfig) -> Result<Self> {
        match location.split_once("://") {
            None => Self::open_with_config(location, config),
            Some(("file", path)) => Self::open_with_config(path, config),
            Some(("http" | "https", _)) => {
                Self::from_transport(HttpTransport::new(location), config)
            }
            Some(_) => Err(IsoError::UnsupportedSource(location.to_string())),
        }
    }

    pub fn from_transport<T>(transport: T, config: SourceConfig) -> Result<Self>
    where
        T: BlockTransport + 'static,
    {
        let mut source = BlockSource::new(Box::new(transport), config);

        let descriptors = VolumeDescriptorSet::read(&mut source)?;
        let primary = descriptors
            .primary()
            .ok_or_else(|| IsoError::BadDescriptor("no primary volume descriptor".to_string()))?;
        let root = primary.root.clone();
        let path_table = PathTable::read(
            &mut source,
            primary.path_table_location,
            primary.path_table_size,
        )?;

        let susp = detect_susp(&mut source, &root)?;
        match &susp {
            SuspMode::Active(ctx) => tracing::info!(
                "SUSP active (skip {}), extensions: {}",
                ctx.skip,
                ctx.extensions
                    .iter()
                    .map(ExtensionId::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => tracing::info!("SUSP not in use"),
        }

        Ok(Self {
            source,
            descriptors,
            path_table,
            root,
            susp,
        })
    }

    pub fn descriptors(&self) -> &VolumeDescriptorSet {
        &self.descriptors
    }

    pub fn primary(&self) -> Option<&VolumeInfo> {
        self.descriptors.primary()
    }

    pub fn path_table(&self) -> &PathTable {
        &self.path_table
    }

    pub fn root(&self) -> &Record {
        &self.root
    }

    pub fn susp_mode(&self) -> &SuspMode {
        &self.susp
    }

    /// The Rock Ridge identity in use, if any
    pub fn rock_ridge(&self) -> Option<&ExtensionId> {
        self.susp.rock_ridge()
    }

    pub fn source(&self) -> &BlockSource {
        &self.source
    }

    /// Record at `path`, given as segments below the root. An empty path is
    /// the root itself.
    ///
    /// With Rock Ridge active, segments are compared exactly against NM names
    /// by walking directories from the root. Otherwise the path table locates
    /// the deepest parent directory it can and only the rest is walked, with
    /// case-insensitive matching.
    pub fn record<S: AsRef<str>>(&mut self, path: &[S]) -> Result<Record> {
        let Some((_, parents)) = path.split_last() else {
            return Ok(self.root.clone());
        };

        if self.rock_ridge().is_some() || self.path_table.is_empty() {
            return self.walk(self.root.clone(), path);
        }

        let (start, resolved) = match self.path_table.resolve(parents) {
            Ok(location) => (location, parents.len()),
            Err(partial) => (partial.location, partial.resolved),
        };
        let directory = if resolved == 0 {
            self.root.clone()
        } else {
            Record::self_record(&mut self.source, start, SECTOR_SIZE, &self.susp)?
        };

        tracing::trace!("Path table resolved {} of {} segments", resolved, path.len());
        self.walk(directory, &path[resolved..])
    }

    fn walk<S: AsRef<str>>(&mut self, mut current: Record, segments: &[S]) -> Result<Record> {
        let exact = self.rock_ridge().is_some();

        for segment in segments {
            let wanted = segment.as_ref().as_bytes();
            if !current.is_directory {
                return Err(IsoError::NotFound(segment.as_ref().to_string()));
            }

            let mut children = Children::new(&mut self.source, &self.susp, &current)?;
            let mut found = None;
            while let Some(child) = children.next() {
                let child = child?;
                let matched = if exact {
                    children.effective_name(&child)? == wanted
                } else {
                    child.raw_name.eq_ignore_ascii_case(wanted)
                };
                if matched {
                    found = Some(child);
                    break;
                }
            }

            current = found.ok_or_else(|| IsoError::NotFound(segment.as_ref().to_string()))?;
        }

        Ok(current)
    }

    /// All children of a directory, excluding the self and parent entries
    pub fn children(&mut self, directory: &Record) -> Result<Vec<Record>> {
        Children::new(&mut self.source, &self.susp, directory)?.collect()
    }

    /// Lazy variant of `children`; the source stays borrowed until it is dropped
    pub fn children_lazy(&mut self, directory: &Record) -> Result<Children<'_>> {
        Children::new(&mut self.source, &self.susp, directory)
    }

    /// Effective name: the joined NM name when Rock Ridge supplies one,
    /// otherwise the ISO 9660 identifier
    pub fn name(&mut self, record: &Record) -> Result<Vec<u8>> {
        record.effective_name(&mut self.source, &self.susp)
    }

    pub fn display_name(&mut self, record: &Record) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.name(record)?).into_owned())
    }

    /// Every SUSP entry of a record, continuation areas included
    pub fn system_use_entries(&mut self, record: &Record) -> Result<Vec<SuspEntry>> {
        record.system_use(&mut self.source, &self.susp).collect()
    }

    /// Rock Ridge attributes, or `None` when Rock Ridge is not in use
    pub fn rock_ridge_attributes(
        &mut self,
        record: &Record,
    ) -> Result<Option<RockRidgeAttributes>> {
        if self.rock_ridge().is_none() {
            return Ok(None);
        }
        let entries = self.system_use_entries(record)?;
        Ok(Some(RockRidgeAttributes::from_entries(&entries)))
    }

    /// File content, memoized on the record
    pub fn content<'r>(&mut self, record: &'r Record) -> Result<&'r [u8]> {
        record.content(&mut self.source)
    }

    /// Independent reader over a file's content
    pub fn open_stream(&self, record: &Record) -> Result<Box<dyn Read + Send>> {
        if record.is_directory {
            return Err(IsoError::NotAFile);
        }
        self.source.open_stream(record.location, u64::from(record.length))
    }

    /// Listing entry for one record
    pub fn entry(&mut self, record: &Record) -> Result<DirEntry> {
        let name = self.display_name(record)?;
        let attributes = self.rock_ridge_attributes(record)?;
        Ok(DirEntry::new(name, record, attributes.as_ref()))
    }

    /// Listing entries for the children of a directory
    pub fn list(&mut self, directory: &Record) -> Result<Vec<DirEntry>> {
        let children = self.children(directory)?;
        children.iter().map(|child| self.entry(child)).collect()
    }

    pub fn summary(&self) -> VolumeSummary {
        VolumeSummary::new(self)
    }

    /// Release the transport
    pub fn close(mut self) -> Result<()> {
        tracing::debug!("Closing image ({} sectors cached)", self.source.cached_sector_count());
        self.source.close()
    }
}

/// Decide how system-use areas are read for the whole image, from the root
/// directory's self record.
fn detect_susp(source: &mut BlockSource, root: &Record) -> Result<SuspMode> {
    let self_record = Record::self_record(
        source,
        root.location,
        root.length as usize,
        &SuspMode::Detect,
    )?;

    let skip = match self_record.embedded_entries.first().map(|entry| &entry.kind) {
        Some(EntryKind::SharingProtocol(sp)) => usize::from(sp.skip_length),
        _ => return Ok(SuspMode::Inactive),
    };

    let mut extensions = Vec::new();
    for entry in self_record.system_use(source, &SuspMode::Detect) {
        match entry {
            Ok(SuspEntry {
                kind: EntryKind::ExtensionReference(er),
                ..
            }) => {
                tracing::debug!(
                    "Extension reference: {} v{} ({})",
                    er.id,
                    er.version,
                    er.descriptor
                );
                extensions.push(ExtensionId::new(er.id, er.version));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Stopped reading root extension references: {}", e);
                break;
            }
        }
    }

    Ok(SuspMode::Active(SuspContext { skip, extensions }))
}
