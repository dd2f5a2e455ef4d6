use crate::assemble::assemble;
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{AppError, Result};
use crate::render::{ContentRenderer, RenderOutcome, RenderedBlock};
use crate::tree::{BuiltTree, TreeSummary, build_tree};
use log;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStats {
    pub path: String,
    pub outcome: RenderOutcome,
    pub lines_shown: usize,
    pub total_lines: Option<usize>,
    pub size: Option<u64>,
}

impl From<&RenderedBlock> for BlockStats {
    fn from(block: &RenderedBlock) -> Self {
        BlockStats {
            path: block.path.clone(),
            outcome: block.outcome,
            lines_shown: block.lines_shown,
            total_lines: block.total_lines,
            size: block.size,
        }
    }
}

/// The finished text plus what went into it.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub tree_text: String,
    pub summary: TreeSummary,
    pub blocks: Vec<BlockStats>,
}

/// Runs the whole pipeline over `root`.
///
/// Only root-level problems are errors; unreadable files, binaries and broken
/// archives end up as notices inside the document.
pub fn generate_document(
    root: &Path,
    config: &Config,
    excluded_paths: &[PathBuf],
) -> Result<Document> {
    log::info!("Generating document for {}", root.display());
    let rules = config.ignore_rules();
    let renderer = ContentRenderer::new(config.render_policy()?);
    log::debug!(
        "Using {} ignore patterns and policy {:?}",
        rules.len(),
        renderer.policy()
    );

    let tree = build_tree(root, &rules, &config.tree_options(excluded_paths.to_vec())?)?;
    let files: Vec<&Entry> = tree.files().collect();
    log::info!("Rendering {} files...", files.len());
    let blocks = render_all(&renderer, &files, config.general.parallel);

    check_counts(&tree, &blocks)?;

    let text = assemble(
        &tree.text,
        &tree.summary,
        &blocks,
        config.output.description.as_deref(),
    );
    log::info!("Document assembled ({} bytes).", text.len());

    Ok(Document {
        text,
        tree_text: tree.text,
        summary: tree.summary,
        blocks: blocks.iter().map(BlockStats::from).collect(),
    })
}

#[cfg(feature = "parallel")]
fn render_all(renderer: &ContentRenderer, files: &[&Entry], parallel: bool) -> Vec<RenderedBlock> {
    if parallel {
        // Indexed collect keeps tree order regardless of completion order.
        files.par_iter().map(|entry| renderer.render(entry)).collect()
    } else {
        files.iter().map(|entry| renderer.render(entry)).collect()
    }
}

#[cfg(not(feature = "parallel"))]
fn render_all(renderer: &ContentRenderer, files: &[&Entry], parallel: bool) -> Vec<RenderedBlock> {
    if parallel {
        log::debug!("Built without the parallel feature; rendering sequentially.");
    }
    files.iter().map(|entry| renderer.render(entry)).collect()
}

fn check_counts(tree: &BuiltTree, blocks: &[RenderedBlock]) -> Result<()> {
    let summary = tree.summary;
    let listed = tree.text.lines().count();
    let expected = summary.directories + summary.files;
    if listed != expected || tree.entries.len() != expected {
        return Err(AppError::Invariant(format!(
            "tree lists {} lines and {} entries but the summary says {}",
            listed,
            tree.entries.len(),
            summary
        )));
    }
    if blocks.len() != summary.files {
        return Err(AppError::Invariant(format!(
            "{} content blocks for {} files",
            blocks.len(),
            summary.files
        )));
    }
    if let Some((block, entry)) = blocks
        .iter()
        .zip(tree.files())
        .find(|(block, entry)| block.path != entry.display_path())
    {
        return Err(AppError::Invariant(format!(
            "block '{}' rendered where '{}' was expected",
            block.path,
            entry.display_path()
        )));
    }
    Ok(())
}
