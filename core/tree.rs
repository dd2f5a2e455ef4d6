use crate::archive::{self, ArchiveKind, ArchiveMember, ListOptions};
use crate::entry::{Entry, EntryKind, EntrySource, display_name};
use crate::error::{AppError, Result};
use crate::filter::{self, IgnoreRules};
use log;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use walkdir::{DirEntry, WalkDir};

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE_INDENT: &str = "│   ";
const BLANK_INDENT: &str = "    ";

/// Sibling ordering. Names compare byte-wise so output does not depend on
/// the platform's collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    DirsFirst,
    FilesFirst,
    Name,
}

impl SortOrder {
    pub fn compare(self, a: &TreeNode, b: &TreeNode) -> Ordering {
        let by_name = a.name.as_bytes().cmp(b.name.as_bytes());
        match self {
            SortOrder::DirsFirst => b.is_dir().cmp(&a.is_dir()).then(by_name),
            SortOrder::FilesFirst => a.is_dir().cmp(&b.is_dir()).then(by_name),
            SortOrder::Name => by_name.then(b.is_dir().cmp(&a.is_dir())),
        }
    }
}

impl FromStr for SortOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dirs-first" => Ok(SortOrder::DirsFirst),
            "files-first" => Ok(SortOrder::FilesFirst),
            "name" => Ok(SortOrder::Name),
            other => Err(AppError::InvalidArgument(format!(
                "Unknown sort order '{}'. Use dirs-first, files-first or name.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeOptions {
    pub sort: SortOrder,
    pub read_archives: bool,
    /// Absolute paths left out of the walk, e.g. the output file itself.
    pub excluded_paths: Vec<PathBuf>,
    pub archive_listing: ListOptions,
}

impl Default for TreeOptions {
    fn default() -> Self {
        TreeOptions {
            sort: SortOrder::default(),
            read_archives: true,
            excluded_paths: Vec::new(),
            archive_listing: ListOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeSummary {
    pub directories: usize,
    pub files: usize,
}

impl fmt::Display for TreeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} directories, {} files", self.directories, self.files)
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub source: EntrySource,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn directory(name: impl Into<String>) -> Self {
        TreeNode {
            name: name.into(),
            kind: EntryKind::Directory,
            size: None,
            source: EntrySource::Directory,
            children: Vec::new(),
        }
    }

    fn file(name: impl Into<String>, size: Option<u64>, source: EntrySource) -> Self {
        TreeNode {
            name: name.into(),
            kind: EntryKind::File,
            size,
            source,
            children: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    fn sort_recursive(&mut self, order: SortOrder) {
        self.children.sort_by(|a, b| order.compare(a, b));
        for child in &mut self.children {
            child.sort_recursive(order);
        }
    }

    fn collect_entries(&self, segments: &mut Vec<String>, out: &mut Vec<Entry>) {
        out.push(Entry {
            segments: segments.clone(),
            name: self.name.clone(),
            kind: self.kind,
            size: self.size,
            source: self.source.clone(),
        });
        for child in &self.children {
            segments.push(child.name.clone());
            child.collect_entries(segments, out);
            segments.pop();
        }
    }

    fn render_into(&self, prefix: &str, is_last: bool, out: &mut String) {
        out.push_str(prefix);
        out.push_str(if is_last { LAST_BRANCH } else { BRANCH });
        let name = display_name(&self.name);
        if self.is_dir() {
            out.push_str(name.trim_end_matches('/'));
            out.push('/');
        } else {
            out.push_str(&name);
        }
        out.push('\n');

        let child_prefix = format!("{}{}", prefix, if is_last { BLANK_INDENT } else { PIPE_INDENT });
        let count = self.children.len();
        for (i, child) in self.children.iter().enumerate() {
            child.render_into(&child_prefix, i + 1 == count, out);
        }
    }
}

/// The selected entry set in display order, with its rendering.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub root: TreeNode,
    /// Depth-first, in the same order as the lines of `text`; the root comes first.
    pub entries: Vec<Entry>,
    /// One line per entry, each terminated by `\n`.
    pub text: String,
    pub summary: TreeSummary,
}

impl BuiltTree {
    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_file())
    }
}

pub fn build_tree(root: &Path, rules: &IgnoreRules, options: &TreeOptions) -> Result<BuiltTree> {
    log::debug!("Building tree for {}", root.display());
    validate_root(root)?;

    let mut stack: Vec<TreeNode> = vec![TreeNode::directory(root_display_name(root))];
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || keep_walked(e, root, rules, options));

    for result in walker {
        let walked = match result {
            Ok(walked) => walked,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                log::warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };
        if walked.depth() == 0 {
            continue;
        }
        close_until(&mut stack, walked.depth());
        let name = walked.file_name().to_string_lossy().into_owned();

        if walked.file_type().is_dir() {
            log::trace!("Walked directory: {}", walked.path().display());
            stack.push(TreeNode::directory(name));
        } else {
            let segments = relative_segments(walked.path(), root);
            let node = file_node(&walked, name, &segments, rules, options);
            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            }
        }
    }
    close_until(&mut stack, 1);

    let mut root_node = stack
        .pop()
        .ok_or_else(|| AppError::Invariant("tree stack lost its root".to_string()))?;
    root_node.sort_recursive(options.sort);

    let mut entries = Vec::new();
    root_node.collect_entries(&mut Vec::new(), &mut entries);

    let mut text = String::new();
    root_node.render_into("", true, &mut text);

    let summary = TreeSummary {
        directories: entries.iter().filter(|e| !e.is_file()).count(),
        files: entries.iter().filter(|e| e.is_file()).count(),
    };
    log::debug!("Tree built: {}", summary);

    Ok(BuiltTree {
        root: root_node,
        entries,
        text,
        summary,
    })
}

fn validate_root(root: &Path) -> Result<()> {
    match root.metadata() {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(AppError::RootNotDirectory(root.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::RootNotFound(root.to_path_buf()))
        }
        Err(e) => Err(AppError::FileRead {
            path: root.to_path_buf(),
            source: e,
        }),
    }
}

fn root_display_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

fn close_until(stack: &mut Vec<TreeNode>, depth: usize) {
    while stack.len() > depth.max(1) {
        if let Some(done) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(done);
            }
        }
    }
}

fn relative_segments(path: &Path, root: &Path) -> Vec<String> {
    pathdiff::diff_paths(path, root)
        .map(|rel| {
            rel.components()
                .filter_map(|c| match c {
                    Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn keep_walked(entry: &DirEntry, root: &Path, rules: &IgnoreRules, options: &TreeOptions) -> bool {
    let file_type = entry.file_type();
    if file_type.is_symlink() {
        log::debug!("Not following symlink: {}", entry.path().display());
        return false;
    }
    if !file_type.is_dir() && !file_type.is_file() {
        log::debug!("Skipping special file: {}", entry.path().display());
        return false;
    }
    if options.excluded_paths.iter().any(|p| p == entry.path()) {
        log::debug!("Skipping excluded path: {}", entry.path().display());
        return false;
    }
    let kind = if file_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    let relative = relative_segments(entry.path(), root).join("/");
    filter::included(&relative, kind, rules)
}

fn file_node(
    walked: &DirEntry,
    name: String,
    segments: &[String],
    rules: &IgnoreRules,
    options: &TreeOptions,
) -> TreeNode {
    let path = walked.path();
    let size = walked.metadata().ok().map(|m| m.len());

    if !options.read_archives {
        if ArchiveKind::from_path(path).is_some() {
            log::debug!("Archive reading disabled, leaving closed: {}", path.display());
            return TreeNode::file(name, size, EntrySource::ArchiveSkipped);
        }
        return TreeNode::file(name, size, EntrySource::Filesystem(path.to_path_buf()));
    }
    let Some(kind) = ArchiveKind::detect(path) else {
        return TreeNode::file(name, size, EntrySource::Filesystem(path.to_path_buf()));
    };
    // Members are filtered by their full root-relative path.
    let select = |member: &[String], kind: EntryKind| {
        let full_path = segments
            .iter()
            .chain(member)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/");
        filter::included(&full_path, kind, rules)
    };
    match archive::list_members(path, kind, &options.archive_listing, select) {
        Ok(members) => archive_node(name, members),
        Err(e) => {
            log::warn!("Could not open archive {}: {}", path.display(), e);
            TreeNode::file(name, size, EntrySource::ArchiveFailed(e.to_string()))
        }
    }
}

/// Archive members grouped by directory, keyed by name.
#[derive(Default)]
struct MemberDir {
    dirs: BTreeMap<String, MemberDir>,
    files: BTreeMap<String, TreeNode>,
}

impl MemberDir {
    fn dir_mut(&mut self, name: &str) -> &mut MemberDir {
        self.dirs.entry(name.to_string()).or_default()
    }

    fn into_node(self, name: String) -> TreeNode {
        let mut node = TreeNode::directory(name);
        node.children
            .extend(self.dirs.into_iter().map(|(name, dir)| dir.into_node(name)));
        node.children.extend(self.files.into_values());
        node
    }
}

/// Splices archive members under a directory node named after the archive.
fn archive_node(name: String, members: Vec<ArchiveMember>) -> TreeNode {
    let mut root = MemberDir::default();
    for member in members {
        let Some((last, parents)) = member.segments.split_last() else {
            continue;
        };
        let mut cursor = &mut root;
        for parent in parents {
            cursor = cursor.dir_mut(parent);
        }
        match (member.kind, member.handle) {
            // Later duplicates win, the same as extracting the archive would.
            (EntryKind::File, Some(handle)) => {
                cursor.files.insert(
                    last.clone(),
                    TreeNode::file(last.clone(), member.size, EntrySource::ArchiveMember(handle)),
                );
            }
            _ => {
                cursor.dir_mut(last);
            }
        }
    }
    root.into_node(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Origin;
    use std::fs;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn fixture(files: &[&str]) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir(&root).unwrap();
        for rel in files {
            let path = root.join(rel);
            if rel.ends_with('/') {
                fs::create_dir_all(&path).unwrap();
            } else {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, format!("content of {rel}\n")).unwrap();
            }
        }
        (dir, root)
    }

    fn build(root: &Path, ignore: &str, sort: SortOrder) -> BuiltTree {
        let options = TreeOptions {
            sort,
            ..TreeOptions::default()
        };
        build_tree(root, &IgnoreRules::from_comma_list(ignore), &options).unwrap()
    }

    fn file_paths(tree: &BuiltTree) -> Vec<String> {
        tree.files().map(Entry::relative_path).collect()
    }

    #[test]
    fn renders_sample_project_dirs_first() {
        let (_dir, root) = fixture(&["main.py", "README.md", "utils/helper.py"]);
        let tree = build(&root, "", SortOrder::DirsFirst);
        let expected = "\
└── proj/
    ├── utils/
    │   └── helper.py
    ├── README.md
    └── main.py
";
        assert_eq!(tree.text, expected);
        assert_eq!(tree.summary, TreeSummary { directories: 2, files: 3 });
        assert_eq!(tree.summary.to_string(), "2 directories, 3 files");
        assert_eq!(
            file_paths(&tree),
            vec!["utils/helper.py", "README.md", "main.py"]
        );
    }

    #[test]
    fn files_first_and_name_orders() {
        let (_dir, root) = fixture(&["main.py", "README.md", "utils/helper.py", "b/x"]);
        let tree = build(&root, "", SortOrder::FilesFirst);
        assert_eq!(
            file_paths(&tree),
            vec!["README.md", "main.py", "b/x", "utils/helper.py"]
        );
        let tree = build(&root, "", SortOrder::Name);
        assert_eq!(
            file_paths(&tree),
            vec!["README.md", "b/x", "main.py", "utils/helper.py"]
        );
    }

    #[test]
    fn continuation_pipe_only_under_non_last_siblings() {
        let (_dir, root) = fixture(&["a/one.txt", "a/two.txt", "b/three.txt"]);
        let tree = build(&root, "", SortOrder::DirsFirst);
        let expected = "\
└── proj/
    ├── a/
    │   ├── one.txt
    │   └── two.txt
    └── b/
        └── three.txt
";
        assert_eq!(tree.text, expected);
    }

    #[test]
    fn ignored_directories_are_not_descended() {
        let (_dir, root) = fixture(&[".venv/lib/site.py", "src/app.py", "src/app.pyc"]);
        let tree = build(&root, "/.venv/,.pyc", SortOrder::DirsFirst);
        assert_eq!(file_paths(&tree), vec!["src/app.py"]);
        assert!(!tree.text.contains(".venv"));
        assert_eq!(tree.summary, TreeSummary { directories: 2, files: 1 });
    }

    #[test]
    fn empty_directories_are_kept() {
        let (_dir, root) = fixture(&["empty/", "f.txt"]);
        let tree = build(&root, "", SortOrder::DirsFirst);
        assert!(tree.text.contains("├── empty/\n"));
        assert_eq!(tree.summary, TreeSummary { directories: 2, files: 1 });
    }

    #[test]
    fn entries_line_up_with_tree_lines() {
        let (_dir, root) = fixture(&["x/y/z.txt", "x/w.txt", "top.txt"]);
        let tree = build(&root, "", SortOrder::DirsFirst);
        let lines: Vec<&str> = tree.text.lines().collect();
        assert_eq!(lines.len(), tree.entries.len());
        for (line, entry) in lines.iter().zip(&tree.entries) {
            assert!(line.trim_end_matches('/').ends_with(&entry.name), "{line}");
        }
    }

    #[test]
    fn output_is_deterministic() {
        let (_dir, root) = fixture(&["b.txt", "a.txt", "c/d.txt", "c/e/f.txt"]);
        let first = build(&root, "", SortOrder::DirsFirst).text;
        let second = build(&root, "", SortOrder::DirsFirst).text;
        assert_eq!(first, second);
    }

    #[test]
    fn excluded_paths_are_skipped() {
        let (_dir, root) = fixture(&["keep.txt", "out.txt"]);
        let options = TreeOptions {
            excluded_paths: vec![root.join("out.txt")],
            ..TreeOptions::default()
        };
        let tree = build_tree(&root, &IgnoreRules::default(), &options).unwrap();
        assert_eq!(file_paths(&tree), vec!["keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let (_dir, root) = fixture(&["real/file.txt"]);
        std::os::unix::fs::symlink(root.join("real"), root.join("loop")).unwrap();
        std::os::unix::fs::symlink(root.join("real/file.txt"), root.join("alias.txt")).unwrap();
        let tree = build(&root, "", SortOrder::DirsFirst);
        assert_eq!(file_paths(&tree), vec!["real/file.txt"]);
    }

    #[test]
    fn archive_members_are_spliced_as_directory() {
        let (_dir, root) = fixture(&["main.rs"]);
        let mut writer = zip::ZipWriter::new(fs::File::create(root.join("data.zip")).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("sub/b.txt", options).unwrap();
        writer.write_all(b"b\n").unwrap();
        writer.start_file("a.txt", options).unwrap();
        writer.write_all(b"a\n").unwrap();
        writer.start_file("skip.log", options).unwrap();
        writer.write_all(b"log\n").unwrap();
        writer.finish().unwrap();

        let tree = build(&root, ".log", SortOrder::DirsFirst);
        let expected = "\
└── proj/
    ├── data.zip/
    │   ├── sub/
    │   │   └── b.txt
    │   └── a.txt
    └── main.rs
";
        assert_eq!(tree.text, expected);
        assert_eq!(tree.summary, TreeSummary { directories: 3, files: 3 });
        assert_eq!(
            file_paths(&tree),
            vec!["data.zip/sub/b.txt", "data.zip/a.txt", "main.rs"]
        );
        let origins: Vec<Origin> = tree.files().map(Entry::origin).collect();
        assert_eq!(
            origins,
            vec![Origin::ArchiveMember, Origin::ArchiveMember, Origin::Filesystem]
        );
    }

    #[test]
    fn broken_archive_becomes_file_entry() {
        let (_dir, root) = fixture(&["ok.txt"]);
        fs::write(root.join("broken.tar.gz"), "not gzip").unwrap();
        let tree = build(&root, "", SortOrder::DirsFirst);
        let broken = tree
            .files()
            .find(|e| e.name == "broken.tar.gz")
            .expect("broken archive listed as file");
        assert!(matches!(broken.source, EntrySource::ArchiveFailed(_)));
        assert_eq!(tree.summary, TreeSummary { directories: 1, files: 2 });
    }

    #[test]
    fn archives_can_be_left_closed() {
        let (_dir, root) = fixture(&[]);
        let mut writer = zip::ZipWriter::new(fs::File::create(root.join("a.zip")).unwrap());
        writer
            .start_file("inner.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.finish().unwrap();
        let options = TreeOptions {
            read_archives: false,
            ..TreeOptions::default()
        };
        let tree = build_tree(&root, &IgnoreRules::default(), &options).unwrap();
        assert_eq!(tree.text, "└── proj/\n    └── a.zip\n");
        assert!(matches!(tree.entries[1].source, EntrySource::ArchiveSkipped));
    }

    #[test]
    fn later_duplicate_archive_member_wins() {
        let (_dir, root) = fixture(&[]);
        let mut builder = tar::Builder::new(fs::File::create(root.join("dup.tar")).unwrap());
        for content in [&b"first\n"[..], &b"second!\n"[..]] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "dir/same.txt", content).unwrap();
        }
        builder.finish().unwrap();

        let tree = build(&root, "", SortOrder::DirsFirst);
        assert_eq!(file_paths(&tree), vec!["dup.tar/dir/same.txt"]);
        let member = tree.files().next().unwrap();
        assert_eq!(member.size, Some(8));
        let mut text = String::new();
        member.with_reader(|r| r.read_to_string(&mut text)).unwrap();
        assert_eq!(text, "second!\n");
    }

    #[test]
    fn zip_without_archive_suffix_is_expanded() {
        let (_dir, root) = fixture(&[]);
        let mut writer = zip::ZipWriter::new(fs::File::create(root.join("lib.jar")).unwrap());
        writer
            .start_file("META-INF/MANIFEST.MF", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"Manifest-Version: 1.0\n").unwrap();
        writer.finish().unwrap();

        let tree = build(&root, "", SortOrder::DirsFirst);
        assert_eq!(file_paths(&tree), vec!["lib.jar/META-INF/MANIFEST.MF"]);

        // Without archive reading a sniffed archive stays an ordinary file.
        let options = TreeOptions {
            read_archives: false,
            ..TreeOptions::default()
        };
        let tree = build_tree(&root, &IgnoreRules::default(), &options).unwrap();
        assert!(matches!(tree.entries[1].source, EntrySource::Filesystem(_)));
    }

    #[test]
    fn archive_members_are_filtered_by_full_path() {
        let (_dir, root) = fixture(&[]);
        let mut writer = zip::ZipWriter::new(fs::File::create(root.join("pkg.zip")).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for name in ["keep/a.txt", "cache/b.txt", "c.txt"] {
            writer.start_file(name, options).unwrap();
            writer.write_all(b"x\n").unwrap();
        }
        writer.finish().unwrap();

        let tree = build(&root, "pkg.zip/cache/", SortOrder::DirsFirst);
        assert_eq!(file_paths(&tree), vec!["pkg.zip/keep/a.txt", "pkg.zip/c.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn line_breaks_in_names_stay_on_one_tree_line() {
        let (_dir, root) = fixture(&["a\nb.txt"]);
        let tree = build(&root, "", SortOrder::DirsFirst);
        assert_eq!(tree.text, "└── proj/\n    └── a?b.txt\n");
        assert_eq!(tree.files().next().unwrap().display_path(), "a?b.txt");
    }

    #[test]
    fn root_errors_are_fatal() {
        let (dir, root) = fixture(&["f.txt"]);
        let missing = dir.path().join("nope");
        assert!(matches!(
            build_tree(&missing, &IgnoreRules::default(), &TreeOptions::default()),
            Err(AppError::RootNotFound(_))
        ));
        assert!(matches!(
            build_tree(&root.join("f.txt"), &IgnoreRules::default(), &TreeOptions::default()),
            Err(AppError::RootNotDirectory(_))
        ));
    }

    #[test]
    fn parses_sort_orders() {
        assert_eq!("dirs-first".parse::<SortOrder>().unwrap(), SortOrder::DirsFirst);
        assert_eq!("Name".parse::<SortOrder>().unwrap(), SortOrder::Name);
        assert!("random".parse::<SortOrder>().is_err());
    }
}
