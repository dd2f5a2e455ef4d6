//! Read-only access to archive members without extracting them to disk.
//!
//! Listing an archive yields [`ArchiveMember`]s. File members carry a
//! [`MemberHandle`] that hands out a reader for exactly one member; any file
//! handle it opens is dropped as soon as that read is done. Zip members share
//! one parsed central directory, and compressed tar members are captured in
//! the single decompression pass that lists them.

use crate::entry::EntryKind;
use crate::error::ArchiveError;
use log;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const USTAR_OFFSET: usize = 257;
const SNIFF_LEN: u64 = 262;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    fn magic(self) -> &'static [u8] {
        match self {
            Compression::Gzip => GZIP_MAGIC,
            Compression::Bzip2 => BZIP2_MAGIC,
            Compression::Xz => XZ_MAGIC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar(Option<Compression>),
    /// A single compressed file such as `notes.txt.gz`.
    Stream(Compression),
}

// Longer suffixes first so `.tar.gz` wins over `.gz`.
const SUFFIXES: &[(&str, ArchiveKind)] = &[
    (".tar.gz", ArchiveKind::Tar(Some(Compression::Gzip))),
    (".tgz", ArchiveKind::Tar(Some(Compression::Gzip))),
    (".tar.bz2", ArchiveKind::Tar(Some(Compression::Bzip2))),
    (".tbz2", ArchiveKind::Tar(Some(Compression::Bzip2))),
    (".tbz", ArchiveKind::Tar(Some(Compression::Bzip2))),
    (".tar.xz", ArchiveKind::Tar(Some(Compression::Xz))),
    (".txz", ArchiveKind::Tar(Some(Compression::Xz))),
    (".tar", ArchiveKind::Tar(None)),
    (".zip", ArchiveKind::Zip),
    (".gz", ArchiveKind::Stream(Compression::Gzip)),
    (".bz2", ArchiveKind::Stream(Compression::Bzip2)),
    (".xz", ArchiveKind::Stream(Compression::Xz)),
];

impl ArchiveKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.len() > suffix.len() && lower.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }

    /// Kind implied by the file name alone.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::from_file_name)
    }

    /// By name first, then by content, so `.jar`, `.whl`, `.docx` and
    /// extensionless archives are found too.
    pub fn detect(path: &Path) -> Option<Self> {
        Self::from_path(path).or_else(|| Self::sniff(path))
    }

    /// Identifies an archive from its leading bytes. A compressed stream is a
    /// tar when its decompressed head carries the ustar marker.
    pub fn sniff(path: &Path) -> Option<Self> {
        let head = read_head(File::open(path).ok()?).ok()?;
        if is_zip(&head) {
            return Some(ArchiveKind::Zip);
        }
        if is_ustar(&head) {
            return Some(ArchiveKind::Tar(None));
        }
        let compression = [Compression::Gzip, Compression::Bzip2, Compression::Xz]
            .into_iter()
            .find(|c| head.starts_with(c.magic()))?;
        if compression == Compression::Bzip2 && !head.get(3).is_some_and(u8::is_ascii_digit) {
            return None;
        }
        // Text that merely starts like a compressed stream fails to decode here.
        let inner = File::open(path)
            .and_then(|file| read_head(decoder(compression, BufReader::new(file))))
            .ok()?;
        log::trace!("Sniffed {:?} content in {}", compression, path.display());
        if is_ustar(&inner) {
            Some(ArchiveKind::Tar(Some(compression)))
        } else {
            Some(ArchiveKind::Stream(compression))
        }
    }

    fn suffix_len(self, name: &str) -> usize {
        let lower = name.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, kind)| *kind == self && lower.ends_with(suffix))
            .map_or(0, |(suffix, _)| suffix.len())
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar(None) => "tar",
            ArchiveKind::Tar(Some(Compression::Gzip)) => "tar.gz",
            ArchiveKind::Tar(Some(Compression::Bzip2)) => "tar.bz2",
            ArchiveKind::Tar(Some(Compression::Xz)) => "tar.xz",
            ArchiveKind::Stream(Compression::Gzip) => "gz",
            ArchiveKind::Stream(Compression::Bzip2) => "bz2",
            ArchiveKind::Stream(Compression::Xz) => "xz",
        };
        f.write_str(label)
    }
}

/// Seekable reader over an archive file that is only open while in use.
/// Clones start closed, so a parsed zip can be shared between members
/// without sharing a file handle.
#[derive(Debug)]
struct LazyFile {
    path: Arc<PathBuf>,
    file: Option<BufReader<File>>,
    pos: u64,
}

impl LazyFile {
    fn new(path: Arc<PathBuf>) -> Self {
        LazyFile {
            path,
            file: None,
            pos: 0,
        }
    }

    fn file(&mut self) -> io::Result<&mut BufReader<File>> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                let mut file = BufReader::new(File::open(self.path.as_path())?);
                file.seek(SeekFrom::Start(self.pos))?;
                file
            }
        };
        Ok(self.file.insert(file))
    }
}

impl Clone for LazyFile {
    fn clone(&self) -> Self {
        LazyFile {
            path: Arc::clone(&self.path),
            file: None,
            pos: self.pos,
        }
    }
}

impl Read for LazyFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.file()?.read(buf)?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for LazyFile {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        self.pos = self.file()?.seek(from)?;
        Ok(self.pos)
    }
}

#[derive(Debug, Clone)]
enum Locator {
    /// The central directory is parsed once per archive and shared.
    Zip {
        archive: zip::ZipArchive<LazyFile>,
        index: usize,
    },
    TarOffset { offset: u64, len: u64 },
    /// Captured while listing a compressed tar.
    Buffered(Arc<[u8]>),
    /// Too large to capture; found again by decompressing up to it.
    TarIndex { compression: Compression, index: usize },
    Stream(Compression),
}

/// Lazily opens one archive member.
#[derive(Debug, Clone)]
pub struct MemberHandle {
    archive: Arc<PathBuf>,
    locator: Locator,
}

impl MemberHandle {
    pub fn with_reader<T, F>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<T>,
    {
        match &self.locator {
            Locator::Zip { archive, index } => {
                let mut archive = archive.clone();
                let mut member = archive.by_index(*index).map_err(io::Error::from)?;
                f(&mut member)
            }
            Locator::TarOffset { offset, len } => {
                let mut file = File::open(self.archive.as_path())?;
                file.seek(SeekFrom::Start(*offset))?;
                let mut member = file.take(*len);
                f(&mut member)
            }
            Locator::Buffered(bytes) => {
                let mut member: &[u8] = bytes;
                f(&mut member)
            }
            Locator::TarIndex { compression, index } => {
                let file = File::open(self.archive.as_path())?;
                let mut archive = tar::Archive::new(decoder(*compression, BufReader::new(file)));
                for (position, entry) in archive.entries()?.enumerate() {
                    let mut entry = entry?;
                    if position == *index {
                        return f(&mut entry);
                    }
                }
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("member #{} no longer present in archive", index),
                ))
            }
            Locator::Stream(compression) => {
                let file = File::open(self.archive.as_path())?;
                let mut reader = decoder(*compression, BufReader::new(file));
                f(&mut reader)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub segments: Vec<String>,
    pub kind: EntryKind,
    pub size: Option<u64>,
    /// `None` for directory members.
    pub handle: Option<MemberHandle>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Compressed tar members up to this many bytes are kept in memory while
    /// listing, so reading them later does not decompress the archive again.
    /// `None` keeps every member.
    pub buffer_limit: Option<u64>,
}

/// Detects the archive kind of `path` and lists all of its members.
pub fn open(path: &Path) -> Result<(ArchiveKind, Vec<ArchiveMember>), ArchiveError> {
    let kind = ArchiveKind::detect(path)
        .ok_or_else(|| ArchiveError::UnsupportedFormat(path.display().to_string()))?;
    let members = list_members(path, kind, &ListOptions::default(), |_, _| true)?;
    Ok((kind, members))
}

/// Lists the members of `path` that `select` accepts. Rejected members are
/// never buffered.
pub fn list_members<F>(
    path: &Path,
    kind: ArchiveKind,
    options: &ListOptions,
    mut select: F,
) -> Result<Vec<ArchiveMember>, ArchiveError>
where
    F: FnMut(&[String], EntryKind) -> bool,
{
    log::debug!("Listing {} archive: {}", kind, path.display());
    check_magic(path, kind)?;
    let archive = Arc::new(path.to_path_buf());
    let members = match kind {
        ArchiveKind::Zip => list_zip(&archive, &mut select)?,
        ArchiveKind::Tar(compression) => list_tar(&archive, compression, options, &mut select)?,
        ArchiveKind::Stream(compression) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = name[..name.len() - kind.suffix_len(&name)].to_string();
            let segments = vec![stem];
            if select(&segments, EntryKind::File) {
                vec![ArchiveMember {
                    segments,
                    kind: EntryKind::File,
                    size: None,
                    handle: Some(MemberHandle {
                        archive,
                        locator: Locator::Stream(compression),
                    }),
                }]
            } else {
                Vec::new()
            }
        }
    };
    log::debug!("Kept {} members of {}", members.len(), path.display());
    Ok(members)
}

/// Splits a member name into clean segments, dropping empty, `.` and `..`
/// components so members cannot escape the archive's own subtree.
pub fn normalize_member_path(raw: &str) -> Vec<String> {
    raw.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(str::to_string)
        .collect()
}

fn read_head<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    reader.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(head)
}

fn is_zip(head: &[u8]) -> bool {
    head.starts_with(ZIP_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC)
}

fn is_ustar(head: &[u8]) -> bool {
    head.get(USTAR_OFFSET..USTAR_OFFSET + 5) == Some(&b"ustar"[..])
}

fn check_magic(path: &Path, kind: ArchiveKind) -> Result<(), ArchiveError> {
    let head = read_head(File::open(path)?)?;
    let ok = match kind {
        ArchiveKind::Zip => is_zip(&head),
        ArchiveKind::Tar(None) => {
            if !is_ustar(&head) {
                // Pre-POSIX tars carry no magic; the header checksum catches junk later.
                log::trace!("No ustar magic in {}", path.display());
            }
            true
        }
        ArchiveKind::Tar(Some(c)) | ArchiveKind::Stream(c) => head.starts_with(c.magic()),
    };
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::UnsupportedFormat(format!(
            "{} does not look like a {} archive",
            path.display(),
            kind
        )))
    }
}

fn list_zip<F>(archive: &Arc<PathBuf>, select: &mut F) -> Result<Vec<ArchiveMember>, ArchiveError>
where
    F: FnMut(&[String], EntryKind) -> bool,
{
    let mut zip = zip::ZipArchive::new(LazyFile::new(Arc::clone(archive)))?;
    let mut members = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index_raw(index)?;
        let segments = normalize_member_path(entry.name());
        if segments.is_empty() {
            continue;
        }
        if entry.unix_mode().is_some_and(|mode| mode & 0o170000 == 0o120000) {
            log::debug!("Skipping symlink member: {}", entry.name());
            continue;
        }
        let kind = if entry.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        if !select(&segments, kind) {
            continue;
        }
        let size = entry.size();
        drop(entry);
        members.push(match kind {
            EntryKind::Directory => ArchiveMember {
                segments,
                kind,
                size: None,
                handle: None,
            },
            EntryKind::File => ArchiveMember {
                segments,
                kind,
                size: Some(size),
                handle: Some(MemberHandle {
                    archive: Arc::clone(archive),
                    locator: Locator::Zip {
                        archive: zip.clone(),
                        index,
                    },
                }),
            },
        });
    }
    Ok(members)
}

fn list_tar<F>(
    archive: &Arc<PathBuf>,
    compression: Option<Compression>,
    options: &ListOptions,
    select: &mut F,
) -> Result<Vec<ArchiveMember>, ArchiveError>
where
    F: FnMut(&[String], EntryKind) -> bool,
{
    let file = File::open(archive.as_path())?;
    let mut members = Vec::new();
    match compression {
        None => {
            let mut tar = tar::Archive::new(file);
            for entry in tar.entries_with_seek().map_err(corrupt)? {
                let entry = entry.map_err(corrupt)?;
                let Some((segments, kind)) = tar_member_path(&entry)? else {
                    continue;
                };
                if !select(&segments, kind) {
                    continue;
                }
                let locator = Locator::TarOffset {
                    offset: entry.raw_file_position(),
                    len: entry.size(),
                };
                members.push(tar_member(segments, kind, entry.size(), archive, locator));
            }
        }
        Some(compression) => {
            let mut tar = tar::Archive::new(decoder(compression, BufReader::new(file)));
            for (index, entry) in tar.entries().map_err(corrupt)?.enumerate() {
                let mut entry = entry.map_err(corrupt)?;
                let Some((segments, kind)) = tar_member_path(&entry)? else {
                    continue;
                };
                if !select(&segments, kind) {
                    continue;
                }
                let size = entry.size();
                let fits = options.buffer_limit.is_none_or(|limit| size <= limit);
                let locator = if kind == EntryKind::File && fits {
                    let mut bytes = Vec::new();
                    entry.read_to_end(&mut bytes).map_err(corrupt)?;
                    Locator::Buffered(bytes.into())
                } else {
                    Locator::TarIndex { compression, index }
                };
                members.push(tar_member(segments, kind, size, archive, locator));
            }
        }
    }
    Ok(members)
}

/// Segments and kind of a tar member; `None` for members that are skipped.
fn tar_member_path<R: Read>(
    entry: &tar::Entry<'_, R>,
) -> Result<Option<(Vec<String>, EntryKind)>, ArchiveError> {
    let raw_path = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
    let segments = normalize_member_path(&raw_path);
    if segments.is_empty() {
        return Ok(None);
    }
    let entry_type = entry.header().entry_type();
    if entry_type.is_dir() {
        Ok(Some((segments, EntryKind::Directory)))
    } else if entry_type.is_file() {
        Ok(Some((segments, EntryKind::File)))
    } else {
        log::debug!("Skipping non-regular tar member: {}", raw_path);
        Ok(None)
    }
}

fn tar_member(
    segments: Vec<String>,
    kind: EntryKind,
    size: u64,
    archive: &Arc<PathBuf>,
    locator: Locator,
) -> ArchiveMember {
    match kind {
        EntryKind::Directory => ArchiveMember {
            segments,
            kind,
            size: None,
            handle: None,
        },
        EntryKind::File => ArchiveMember {
            segments,
            kind,
            size: Some(size),
            handle: Some(MemberHandle {
                archive: Arc::clone(archive),
                locator,
            }),
        },
    }
}

fn decoder<'a, R: Read + 'a>(compression: Compression, reader: R) -> Box<dyn Read + 'a> {
    match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
    }
}

fn corrupt(err: io::Error) -> ArchiveError {
    ArchiveError::Corrupt(err.to_string())
}
