mod cli_args;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use log;
use std::path::{Path, PathBuf};
use std::process;

use cli_args::Cli;
use dir2txt_core::{AppError, Config, generate_document};

fn main() {
    let cli_args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 5 } else { 0 };
            // Help and version output also come through here.
            let _ = e.print();
            process::exit(code);
        }
    };

    setup_logging(cli_args.quiet, cli_args.verbose);
    log::debug!("CLI args parsed: {:?}", cli_args);

    let exit_code = match run_app(cli_args) {
        Ok(_) => {
            log::info!("Application finished successfully.");
            0
        }
        Err(e) => {
            // Reported even under --quiet, which only silences logs and the summary.
            eprintln!("{}", error_line(&e));
            exit_code_for(&e)
        }
    };
    log::debug!("Exiting with code {}", exit_code);
    process::exit(exit_code);
}

fn error_line(err: &anyhow::Error) -> String {
    format!("{} {:#}", "Error:".red().bold(), err)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AppError>() {
        Some(AppError::Config(_)) => 1,
        Some(AppError::TomlParse(_)) => 1,
        Some(AppError::TomlSerialize(_)) => 1,
        Some(AppError::RootNotFound(_)) => 2,
        Some(AppError::RootNotDirectory(_)) => 2,
        Some(AppError::Io(_)) => 2,
        Some(AppError::FileRead { .. }) => 2,
        Some(AppError::FileWrite { .. }) => 2,
        Some(AppError::WalkDir(_)) => 2,
        Some(AppError::Invariant(_)) => 3,
        Some(AppError::InvalidArgument(_)) => 5,
        Some(_) => 1,
        None => 1,
    }
}

fn setup_logging(quiet: bool, verbose: u8) {
    let log_level = if quiet {
        log::LevelFilter::Off
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();
    log::trace!("Logger initialized with level: {:?}", log_level);
}

fn run_app(cli: Cli) -> Result<()> {
    let root = Config::determine_root(&cli.dirname).context("Failed to determine root directory")?;
    log::info!("Root directory: {}", root.display());

    let config = load_config(&root, &cli)?;

    if cli.config_file.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let output_path = cli.output_path().map(|p| expand_path(p));
    let excluded: Vec<PathBuf> = output_path
        .as_deref()
        .and_then(absolute_output_path)
        .into_iter()
        .collect();

    let doc = generate_document(&root, &config, &excluded)
        .with_context(|| format!("Failed to flatten {}", root.display()))?;

    output::write_document(&doc.text, output_path.as_deref())?;

    if !cli.quiet {
        output::print_summary(&doc, output_path.as_deref())?;
        if cli.stats {
            output::print_stats_table(&doc.blocks);
        }
    }
    Ok(())
}

fn load_config(root: &Path, cli: &Cli) -> Result<Config> {
    let config_path = Config::resolve_config_path(
        root,
        cli.config_file.config.as_deref(),
        cli.config_file.no_config,
    )
    .context("Failed to resolve configuration path")?;

    let config = match &config_path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    Ok(merge_config_with_cli_overrides(config, cli))
}

fn merge_config_with_cli_overrides(mut config: Config, cli: &Cli) -> Config {
    log::trace!("Applying CLI overrides to config...");

    // Ignore patterns accumulate; everything else replaces.
    config.filters.ignore.extend(
        cli.tree
            .ignore
            .iter()
            .flat_map(|list| list.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from),
    );
    if cli.tree.no_builtin_ignore {
        config.filters.use_builtin = false;
    }
    if let Some(sort) = cli.tree.sort {
        config.general.sort = sort;
    }
    if cli.tree.no_archives {
        config.archives.enabled = false;
    }

    if let Some(max_lines) = cli.render.max_lines {
        config.render.max_lines = max_lines;
    }
    if let Some(size) = &cli.render.max_file_size {
        config.render.max_file_size = Some(size.clone());
    }
    if let Some(over_limit) = cli.render.over_limit {
        config.render.over_limit = over_limit;
    }
    if cli.render.sequential {
        config.general.parallel = false;
    }

    if let Some(description) = &cli.description {
        config.output.description = Some(description.clone());
    }

    log::trace!("Config after CLI overrides: {:?}", config);
    config
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Where the output file will live once written, so the walk can skip it.
/// The file may not exist yet, so only its parent is canonicalized.
fn absolute_output_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match parent.canonicalize() {
        Ok(dir) => Some(dir.join(name)),
        Err(e) => {
            log::debug!("Output directory {} not resolvable yet: {}", parent.display(), e);
            None
        }
    }
}
