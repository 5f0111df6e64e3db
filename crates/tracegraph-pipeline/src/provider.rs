//! Extraction-provider boundary.
//!
//! Providers turn source artifacts into candidate records; the core performs
//! no parsing of its own. One built-in provider ships here: a filesystem
//! inventory walker used by the CLI demo pipeline and the integration tests.
//! Document/AST/git providers live with their callers.

use std::path::PathBuf;
use tracegraph_model::{Attributes, ExtractedEntity, ExtractedRelationship, Result};

/// Inputs shared by every provider invocation.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub project_id: String,
    /// Root of the source tree being extracted.
    pub repo_root: PathBuf,
}

/// Raw extraction output, pre-validation.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

/// One source of candidate records (document scanner, AST walker, git log
/// reader, ...). Implementations must be deterministic for a fixed source
/// tree: replay equality across epochs depends on it.
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, ctx: &ExtractionContext) -> Result<Extraction>;
}

/// Walks the source tree and emits `DIRECTORY`/`SOURCE_FILE` entities plus
/// `CONTAINS` edges from each directory to its children.
pub struct FilesystemInventoryProvider {
    /// File extensions to inventory; empty means all files.
    pub extensions: Vec<String>,
}

impl FilesystemInventoryProvider {
    pub fn new(extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            extensions: extensions.into_iter().collect(),
        }
    }

    /// Source-code defaults.
    pub fn source_files() -> Self {
        Self::new(["rs", "py", "ts", "js", "go", "java", "c", "h", "cpp"].map(String::from))
    }

    fn wants(&self, path: &std::path::Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| self.extensions.iter().any(|x| x == e))
    }
}

impl ExtractionProvider for FilesystemInventoryProvider {
    fn name(&self) -> &str {
        "filesystem-inventory"
    }

    fn extract(&self, ctx: &ExtractionContext) -> Result<Extraction> {
        let mut out = Extraction::default();
        let root = &ctx.repo_root;

        // Depth 0 is the root itself; a relative root such as `.` reports its
        // full path as the file name and must never be pruned as hidden.
        for entry in walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            let path = entry.path();
            if path == root {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let (entity_type, name) = if entry.file_type().is_dir() {
                ("DIRECTORY", rel.clone())
            } else if self.wants(path) {
                ("SOURCE_FILE", rel.clone())
            } else {
                continue;
            };

            out.entities.push(ExtractedEntity {
                entity_type: entity_type.to_string(),
                instance_id: rel.clone(),
                name,
                attributes: Attributes::new(),
                source_file: rel.clone(),
                line_start: 1,
                line_end: 1,
            });

            // Containment edge from the parent directory, when there is one.
            if let Some(parent) = std::path::Path::new(&rel).parent() {
                let parent = parent.to_string_lossy().replace('\\', "/");
                if !parent.is_empty() {
                    out.relationships.push(ExtractedRelationship {
                        relationship_type: "CONTAINS".to_string(),
                        instance_id: format!("CONTAINS:{parent}:{rel}"),
                        name: None,
                        from_instance_id: parent,
                        to_instance_id: rel.clone(),
                        confidence: None,
                        source_file: rel,
                        line_start: 1,
                        line_end: 1,
                    });
                }
            }
        }

        tracing::debug!(
            provider = self.name(),
            entities = out.entities.len(),
            relationships = out.relationships.len(),
            "inventory extracted"
        );
        Ok(out)
    }
}
