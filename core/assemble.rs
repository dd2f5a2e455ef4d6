use crate::render::RenderedBlock;
use crate::tree::TreeSummary;

pub const HEADER: &str = "Project structure";
pub const TREE_INTRO: &str = ". Files that were selected:";
pub const SEPARATOR: &str = "---";
pub const DESCRIPTION_LABEL: &str = "Description";

/// Joins the tree, the content blocks (already in tree order) and the
/// optional description into the final document.
pub fn assemble(
    tree_text: &str,
    summary: &TreeSummary,
    blocks: &[RenderedBlock],
    description: Option<&str>,
) -> String {
    let body_len: usize = blocks.iter().map(|b| b.path.len() + b.body.len() + 10).sum();
    let mut out = String::with_capacity(tree_text.len() + body_len + 128);

    out.push_str(HEADER);
    out.push_str("\n\n");
    out.push_str(TREE_INTRO);
    out.push_str("\n|\n");
    out.push_str(tree_text);
    if !tree_text.is_empty() && !tree_text.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&summary.to_string());
    out.push_str("\n\n");
    out.push_str(SEPARATOR);
    out.push_str("\n\n");

    for block in blocks {
        out.push_str(&block.path);
        out.push_str("\n\n");
        out.push_str(&block.body);
        out.push_str("\n\n");
        out.push_str(SEPARATOR);
        out.push_str("\n\n");
    }

    // Written verbatim; only an all-blank description is left out.
    if let Some(text) = description.filter(|t| !t.trim().is_empty()) {
        out.push_str(DESCRIPTION_LABEL);
        out.push_str("\n\n");
        out.push_str(text);
        out.push('\n');
    }
    out
}
