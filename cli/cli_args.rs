use clap::{Args, Parser};
use dir2txt_core::{OverLimit, SortOrder};
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigFileOpts {
    #[arg(
        long,
        help = "Path of the TOML config file (default: <DIRNAME>/.dir2txt.toml if present).",
        value_name = "PATH",
        conflicts_with = "no_config",
        help_heading = "Configuration"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        help = "Do not load any TOML config file.",
        conflicts_with = "config",
        help_heading = "Configuration"
    )]
    pub no_config: bool,

    #[arg(
        long,
        help = "Print the effective configuration as TOML and exit.",
        help_heading = "Configuration"
    )]
    pub print_config: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RenderOpts {
    #[arg(
        long,
        value_name = "N",
        help = "Line threshold per file [default: 1000].",
        help_heading = "Rendering"
    )]
    pub max_lines: Option<usize>,

    #[arg(
        long,
        value_name = "SIZE",
        help = "Size threshold per file, e.g. '10MiB', '512kb'; 'none' disables [default: 10MiB].",
        help_heading = "Rendering"
    )]
    pub max_file_size: Option<String>,

    #[arg(
        long,
        value_name = "POLICY",
        value_parser = parse_over_limit,
        help = "What to do with files over a threshold: truncate or skip [default: truncate].",
        help_heading = "Rendering"
    )]
    pub over_limit: Option<OverLimit>,

    #[arg(
        long,
        help = "Render files one at a time instead of on the thread pool.",
        help_heading = "Rendering"
    )]
    pub sequential: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TreeOpts {
    #[arg(
        short = 'i',
        long,
        value_name = "PATTERNS",
        action = clap::ArgAction::Append,
        help = "Comma-separated ignore patterns, e.g. '/.venv/,.pyc'. Repeatable.",
        help_heading = "Selection"
    )]
    pub ignore: Vec<String>,

    #[arg(
        long,
        help = "Do not apply the built-in ignores (/.git/, /.hg/, /.svn/).",
        help_heading = "Selection"
    )]
    pub no_builtin_ignore: bool,

    #[arg(
        long,
        value_name = "ORDER",
        value_parser = parse_sort_order,
        help = "Sibling order: dirs-first, files-first or name [default: dirs-first].",
        help_heading = "Selection"
    )]
    pub sort: Option<SortOrder>,

    #[arg(
        long,
        help = "List archives as plain files instead of reading their members.",
        help_heading = "Selection"
    )]
    pub no_archives: bool,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Flatten a directory tree into one text document for language models.",
    long_about = "dir2txt walks DIRNAME, draws its tree, and appends the content of every \nselected file (including the members of zip and tar archives) to a single \ntext document suitable for pasting into a language model prompt.",
    help_template = "{about-section}\nUsage: {usage}\n\n{all-args}{after-help}",
    after_help = "EXAMPLES:\n  dir2txt . context.txt -i '/.venv/,.pyc'\n  dir2txt ~/src/app - --max-lines 200 --over-limit skip\n  dir2txt project out.txt -d 'Explain the build setup.'",
    arg_required_else_help = true
)]
pub struct Cli {
    #[arg(value_name = "DIRNAME", help = "Directory to flatten.")]
    pub dirname: PathBuf,

    #[arg(
        value_name = "FILE",
        required_unless_present = "print_config",
        help = "Output file, or '-' for standard output."
    )]
    pub file: Option<PathBuf>,

    #[arg(
        short = 'd',
        long,
        value_name = "TEXT",
        help = "Description appended at the end of the document."
    )]
    pub description: Option<String>,

    #[arg(
        long,
        help = "Print a per-file table of render outcomes after writing."
    )]
    pub stats: bool,

    #[clap(flatten)]
    pub tree: TreeOpts,
    #[clap(flatten)]
    pub render: RenderOpts,
    #[clap(flatten)]
    pub config_file: ConfigFileOpts,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase message verbosity (-v, -vv).")]
    pub verbose: u8,

    #[arg(
        short,
        long,
        help = "Silence log messages and the run summary."
    )]
    pub quiet: bool,
}

impl Cli {
    /// `None` means standard output.
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.file.as_ref().filter(|p| p.as_os_str() != "-")
    }
}

fn parse_over_limit(s: &str) -> Result<OverLimit, String> {
    s.parse::<OverLimit>().map_err(|e| e.to_string())
}

fn parse_sort_order(s: &str) -> Result<SortOrder, String> {
    s.parse::<SortOrder>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_and_flags_parse() {
        let cli = Cli::try_parse_from([
            "dir2txt",
            "proj",
            "out.txt",
            "-i",
            "/.venv/,.pyc",
            "-i",
            "build/",
            "--max-lines",
            "100",
            "--over-limit",
            "skip",
            "--sort",
            "files-first",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.dirname, PathBuf::from("proj"));
        assert_eq!(cli.output_path(), Some(&PathBuf::from("out.txt")));
        assert_eq!(cli.tree.ignore, vec!["/.venv/,.pyc", "build/"]);
        assert_eq!(cli.render.max_lines, Some(100));
        assert_eq!(cli.render.over_limit, Some(OverLimit::Skip));
        assert_eq!(cli.tree.sort, Some(SortOrder::FilesFirst));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn dash_means_stdout() {
        let cli = Cli::try_parse_from(["dir2txt", "proj", "-"]).unwrap();
        assert_eq!(cli.output_path(), None);
    }

    #[test]
    fn output_file_is_required_unless_printing_config() {
        assert!(Cli::try_parse_from(["dir2txt", "proj"]).is_err());
        let cli = Cli::try_parse_from(["dir2txt", "proj", "--print-config"]).unwrap();
        assert!(cli.config_file.print_config);
        assert!(cli.file.is_none());
    }

    #[test]
    fn rejects_unknown_policy_and_conflicting_config_flags() {
        assert!(Cli::try_parse_from(["dir2txt", "p", "o", "--over-limit", "drop"]).is_err());
        assert!(Cli::try_parse_from(["dir2txt", "p", "o", "--config", "x.toml", "--no-config"]).is_err());
    }
}
