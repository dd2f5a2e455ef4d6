use crate::entry::EntryKind;
use log;

/// Patterns that are always ignored unless `filters.use_builtin` is off.
pub const BUILTIN_IGNORES: &[&str] = &["/.git/", "/.hg/", "/.svn/"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    /// Written with a leading or trailing separator; must line up with whole path segments.
    Segments(Vec<String>),
    /// Matched anywhere inside the relative path.
    Substring(String),
}

impl Pattern {
    fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace('\\', "/");
        if normalized.is_empty() {
            return None;
        }
        let anchored = normalized.starts_with('/') || normalized.ends_with('/');
        if anchored {
            let segments: Vec<String> = normalized
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if segments.is_empty() {
                return None;
            }
            Some(Pattern::Segments(segments))
        } else {
            Some(Pattern::Substring(normalized))
        }
    }

    fn matches(&self, path: &str, segments: &[&str]) -> bool {
        match self {
            Pattern::Substring(needle) => path.contains(needle.as_str()),
            Pattern::Segments(wanted) => {
                wanted.len() <= segments.len()
                    && segments
                        .windows(wanted.len())
                        .any(|window| window.iter().zip(wanted).all(|(a, b)| *a == b))
            }
        }
    }
}

/// Case-sensitive ignore patterns applied to root-relative paths.
///
/// A pattern like `/.venv/` or `build/` only matches whole path segments,
/// anything else is a plain substring test on the `/`-joined path. Since
/// both kinds look at the full path, a match on a directory also matches
/// everything beneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| Pattern::parse(p.as_ref()))
            .collect();
        IgnoreRules { patterns }
    }

    /// Splits a comma separated list such as `-i "/.venv/,.pyc"`.
    pub fn from_comma_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn with_builtin(mut self) -> Self {
        self.patterns
            .extend(BUILTIN_IGNORES.iter().filter_map(|p| Pattern::parse(p)));
        self
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_ignored(&self, relative_path: &str) -> bool {
        let normalized = normalize_relative(relative_path);
        if normalized.is_empty() {
            return false;
        }
        let segments: Vec<&str> = normalized.split('/').collect();
        let hit = self
            .patterns
            .iter()
            .any(|pattern| pattern.matches(&normalized, &segments));
        if hit {
            log::trace!("Ignored by pattern: {}", normalized);
        }
        hit
    }
}

pub fn included(relative_path: &str, kind: EntryKind, rules: &IgnoreRules) -> bool {
    let keep = !rules.is_ignored(relative_path);
    if keep {
        log::trace!("Including {:?}: {}", kind, relative_path);
    }
    keep
}

fn normalize_relative(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(list: &str) -> IgnoreRules {
        IgnoreRules::from_comma_list(list)
    }

    #[test]
    fn segment_pattern_matches_whole_segments_only() {
        let r = rules("/.venv/");
        assert!(r.is_ignored(".venv"));
        assert!(r.is_ignored(".venv/lib/site.py"));
        assert!(r.is_ignored("app/.venv/bin/python"));
        assert!(!r.is_ignored("my.venv/file.txt"));
        assert!(!r.is_ignored(".venvs/file.txt"));
    }

    #[test]
    fn leading_or_trailing_separator_is_enough_to_anchor() {
        assert!(rules("build/").is_ignored("build/out.o"));
        assert!(!rules("build/").is_ignored("rebuild/out.o"));
        assert!(rules("/dist").is_ignored("web/dist/app.js"));
        assert!(!rules("/dist").is_ignored("web/distro/app.js"));
    }

    #[test]
    fn multi_segment_pattern_needs_contiguous_run() {
        let r = rules("/src/gen/");
        assert!(r.is_ignored("src/gen/a.rs"));
        assert!(r.is_ignored("crate/src/gen"));
        assert!(!r.is_ignored("src/other/gen/a.rs"));
    }

    #[test]
    fn bare_pattern_is_substring() {
        let r = rules(".pyc,node_modules");
        assert!(r.is_ignored("pkg/mod.pyc"));
        assert!(r.is_ignored("web/node_modules/left-pad/index.js"));
        assert!(r.is_ignored("my_node_modules_backup"));
        assert!(!r.is_ignored("pkg/mod.py"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let r = rules("Secret");
        assert!(r.is_ignored("docs/Secret.md"));
        assert!(!r.is_ignored("docs/secret.md"));
    }

    #[test]
    fn star_is_literal() {
        let r = rules("*.log");
        assert!(!r.is_ignored("app.log"));
        assert!(r.is_ignored("weird/*.log"));
    }

    #[test]
    fn blanks_and_separator_only_patterns_are_dropped() {
        let r = rules(" , /, ,");
        assert!(r.is_empty());
        assert!(!r.is_ignored("anything"));
    }

    #[test]
    fn backslashes_are_normalized() {
        let r = rules("\\target\\");
        assert!(r.is_ignored("target/debug/app"));
        assert!(r.is_ignored("crate\\target\\x"));
    }

    #[test]
    fn root_is_never_ignored() {
        let r = rules("/,.,x");
        assert!(!r.is_ignored(""));
        assert!(!r.is_ignored("."));
    }

    #[test]
    fn descendants_of_ignored_directory_are_ignored() {
        let r = rules("/cache/,tmp");
        for path in ["cache", "cache/a", "cache/a/b/c.txt", "tmp", "tmp/x/y"] {
            assert!(r.is_ignored(path), "{path} should be ignored");
        }
    }

    #[test]
    fn builtin_rules_cover_vcs_directories() {
        let r = IgnoreRules::default().with_builtin();
        assert!(r.is_ignored(".git/config"));
        assert!(r.is_ignored("sub/.hg/store"));
        assert!(!r.is_ignored(".gitignore"));
    }

    #[test]
    fn included_is_negation_of_ignored() {
        let r = rules("/vendor/");
        assert!(!included("vendor/lib.c", EntryKind::File, &r));
        assert!(included("src/lib.c", EntryKind::File, &r));
        assert!(!included("vendor", EntryKind::Directory, &r));
    }
}
