use crate::archive::MemberHandle;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

/// A name as it appears in the document: one line, whatever it contains.
pub(crate) fn display_name(name: &str) -> Cow<'_, str> {
    if name.contains(['\n', '\r']) {
        Cow::Owned(name.replace(['\n', '\r'], "?"))
    } else {
        Cow::Borrowed(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Filesystem,
    ArchiveMember,
}

/// Where the bytes of an entry come from. Nothing is opened until
/// [`Entry::with_reader`] is called.
#[derive(Debug, Clone)]
pub enum EntrySource {
    /// Directories, real or synthesized inside an archive.
    Directory,
    Filesystem(PathBuf),
    ArchiveMember(MemberHandle),
    /// An archive on disk that could not be listed.
    ArchiveFailed(String),
    /// An archive left closed because archive reading is disabled.
    ArchiveSkipped,
}

#[derive(Debug, Clone)]
pub struct Entry {
    /// Path segments relative to the root; empty for the root itself.
    pub segments: Vec<String>,
    /// Display name; for the root this is the root directory's own name.
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub source: EntrySource,
}

impl Entry {
    pub fn relative_path(&self) -> String {
        self.segments.join("/")
    }

    /// Path used as the label of a content block. Line breaks are replaced
    /// the same way as on the tree line.
    pub fn display_path(&self) -> String {
        if self.segments.is_empty() {
            display_name(&self.name).into_owned()
        } else {
            display_name(&self.relative_path()).into_owned()
        }
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn origin(&self) -> Origin {
        match self.source {
            EntrySource::ArchiveMember(_) => Origin::ArchiveMember,
            _ => Origin::Filesystem,
        }
    }

    /// Runs `f` with a reader over the entry's content. The underlying file or
    /// archive handle lives only for the duration of the call.
    pub fn with_reader<T, F>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<T>,
    {
        match &self.source {
            EntrySource::Filesystem(path) => {
                let mut file = File::open(path)?;
                f(&mut file)
            }
            EntrySource::ArchiveMember(handle) => handle.with_reader(f),
            EntrySource::Directory => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot read content of a directory",
            )),
            EntrySource::ArchiveFailed(reason) => Err(io::Error::other(reason.clone())),
            EntrySource::ArchiveSkipped => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "archive reading is disabled",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(segments: &[&str], name: &str) -> Entry {
        Entry {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            name: name.to_string(),
            kind: EntryKind::File,
            size: None,
            source: EntrySource::Directory,
        }
    }

    #[test]
    fn display_path_keeps_block_label_on_one_line() {
        let e = entry(&["dir\r", "a\nb.txt"], "a\nb.txt");
        assert_eq!(e.display_path(), "dir?/a?b.txt");
        assert_eq!(e.relative_path(), "dir\r/a\nb.txt");
    }

    #[test]
    fn root_label_is_sanitized_too() {
        assert_eq!(entry(&[], "odd\nroot").display_path(), "odd?root");
        assert_eq!(entry(&[], "plain").display_path(), "plain");
    }

    #[test]
    fn plain_names_are_borrowed() {
        assert!(matches!(display_name("main.rs"), Cow::Borrowed("main.rs")));
    }
}
