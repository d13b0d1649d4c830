//! Markdown document generation for a finalized extraction result.
//!
//! Invoked once per terminal session. The document carries a header block,
//! one section per post in collection order, and, for degraded sessions,
//! an appendix listing every skipped page with its reason.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::GarimpoError;
use crate::partial::PartialResult;

/// Render the result as a Markdown document.
pub fn render_markdown(result: &PartialResult, target: &str, handle: &str) -> String {
    let mut doc = String::new();

    doc.push_str(&format!("# Posts - {handle}\n\n"));
    doc.push_str(&format!(
        "**Extraction Date**: {}\n",
        Utc::now().format("%Y-%m-%d %H:%M UTC")
    ));
    doc.push_str(&format!("**Profile**: {target}\n"));
    doc.push_str(&format!("**Total Posts**: {}\n", result.items.len()));
    if result.is_degraded() {
        doc.push_str(&format!(
            "**Skipped Pages**: {}\n",
            result.skipped_pages.len()
        ));
    }
    doc.push_str("\n---\n\n");

    for (i, post) in result.items.iter().enumerate() {
        doc.push_str(&format!("## Post {}\n", i + 1));
        doc.push_str(&format!("**Author**: {}\n", post.author));
        if let Some(date) = &post.published_at {
            doc.push_str(&format!("**Date**: {date}\n"));
        }
        doc.push_str(&format!("\n{}\n\n---\n\n", post.text.trim_end()));
    }

    if result.is_degraded() {
        doc.push_str("## Skipped Pages\n\n");
        for page in &result.skipped_pages {
            doc.push_str(&format!("- {}: {}\n", page.marker, page.reason));
        }
    }

    doc
}

/// Write the document to `destination` and return the final path.
///
/// A directory destination gets a `{handle}-posts-{date}.md` file inside it;
/// anything else is treated as the output file path.
pub fn write_document(
    result: &PartialResult,
    target: &str,
    handle: &str,
    destination: &Path,
) -> Result<PathBuf, GarimpoError> {
    let path = resolve_destination(handle, destination);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    fs::write(&path, render_markdown(result, target, handle))?;
    info!(path = %path.display(), posts = result.items.len(), "document written");
    Ok(path)
}

fn resolve_destination(handle: &str, destination: &Path) -> PathBuf {
    if destination.is_dir() {
        let date = Utc::now().format("%Y-%m-%d");
        destination.join(format!("{handle}-posts-{date}.md"))
    } else {
        destination.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Post;
    use crate::partial::SkippedPage;
    use tempfile::TempDir;

    fn result_with(skipped: bool) -> PartialResult {
        PartialResult {
            items: vec![
                Post {
                    id: "1".into(),
                    author: "Maria Silva".into(),
                    published_at: Some("2026-07-01".into()),
                    text: "first post".into(),
                },
                Post {
                    id: "2".into(),
                    author: "Maria Silva".into(),
                    published_at: None,
                    text: "second post".into(),
                },
            ],
            skipped_pages: if skipped {
                vec![SkippedPage {
                    marker: "offset 30".into(),
                    reason: "retries exhausted".into(),
                }]
            } else {
                Vec::new()
            },
        }
    }

    #[test]
    fn renders_header_and_one_section_per_post() {
        let doc = render_markdown(
            &result_with(false),
            "https://feed.garimpo.dev/in/maria-silva",
            "maria-silva",
        );
        assert!(doc.starts_with("# Posts - maria-silva\n"));
        assert!(doc.contains("**Total Posts**: 2"));
        assert!(doc.contains("## Post 1"));
        assert!(doc.contains("## Post 2"));
        assert!(doc.contains("**Date**: 2026-07-01"));
        assert!(doc.contains("first post"));
        assert!(!doc.contains("## Skipped Pages"));
    }

    #[test]
    fn degraded_result_gets_an_appendix() {
        let doc = render_markdown(&result_with(true), "t", "maria-silva");
        assert!(doc.contains("**Skipped Pages**: 1"));
        assert!(doc.contains("## Skipped Pages"));
        assert!(doc.contains("- offset 30: retries exhausted"));
    }

    #[test]
    fn posts_appear_in_collection_order() {
        let doc = render_markdown(&result_with(false), "t", "h");
        let first = doc.find("first post").unwrap();
        let second = doc.find("second post").unwrap();
        assert!(first < second);
    }

    #[test]
    fn directory_destination_derives_a_dated_filename() {
        let tmp = TempDir::new().unwrap();
        let path = write_document(&result_with(false), "t", "maria-silva", tmp.path()).unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("maria-silva-posts-"));
        assert!(name.ends_with(".md"));
        assert!(fs::read_to_string(&path).unwrap().contains("## Post 1"));
    }

    #[test]
    fn file_destination_is_used_as_is() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested/dir/out.md");
        let path = write_document(&result_with(true), "t", "h", &dest).unwrap();
        assert_eq!(path, dest);
        assert!(path.exists());
    }
}
