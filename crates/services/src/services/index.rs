use std::collections::BTreeMap;

use db::models::project_file::{ProjectFile, ProjectFileError};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::ConnectionTrait;
use serde::Serialize;
use ts_rs::TS;
use uuid::Uuid;

const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    ".DS_Store",
    "dist",
    "build",
    ".env",
    ".vscode",
    ".idea",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

static TS_JS_SYMBOLS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s+([A-Za-z_$][\w$]*)").unwrap(),
        Regex::new(r"(?m)^\s*(?:export\s+)?class\s+([A-Za-z_$][\w$]*)").unwrap(),
        Regex::new(r"(?m)^\s*(?:export\s+)?const\s+([A-Za-z_$][\w$]*)\s*=").unwrap(),
    ]
});

static PYTHON_SYMBOLS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*def\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap(),
    ]
});

static RUST_SYMBOLS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?fn\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)").unwrap(),
    ]
});

fn symbol_patterns(extension: &str) -> Option<&'static [Regex]> {
    match extension {
        "ts" | "tsx" | "js" | "jsx" => Some(&TS_JS_SYMBOLS),
        "py" => Some(&PYTHON_SYMBOLS),
        "rs" => Some(&RUST_SYMBOLS),
        _ => None,
    }
}

fn is_ignored(path: &str) -> bool {
    path.split('/')
        .any(|segment| IGNORED_NAMES.contains(&segment))
}

/// Lightweight view over a project's file store: the tree the explorer
/// renders and the symbol names the intent prompt includes.
#[derive(Clone, Default)]
pub struct ProjectIndexService;

impl ProjectIndexService {
    pub fn new() -> Self {
        Self
    }

    pub async fn file_tree<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<FileNode>, ProjectFileError> {
        let files = ProjectFile::list(db, project_id).await?;

        #[derive(Default)]
        struct DirNode {
            dirs: BTreeMap<String, DirNode>,
            files: Vec<(String, usize)>,
        }

        let mut root = DirNode::default();
        for file in files {
            if is_ignored(&file.path) {
                continue;
            }
            let mut segments: Vec<&str> = file.path.split('/').collect();
            let file_name = segments.pop().unwrap_or_default().to_string();
            let mut cursor = &mut root;
            for segment in segments {
                cursor = cursor.dirs.entry(segment.to_string()).or_default();
            }
            cursor.files.push((file_name, file.size));
        }

        fn collect(node: DirNode, prefix: &str) -> Vec<FileNode> {
            let mut out = Vec::new();
            for (name, child) in node.dirs {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let children = collect(child, &path);
                out.push(FileNode {
                    name,
                    path,
                    kind: NodeKind::Directory,
                    extension: None,
                    size: None,
                    children: (!children.is_empty()).then_some(children),
                });
            }
            let mut files = node.files;
            files.sort();
            for (name, size) in files {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_string());
                out.push(FileNode {
                    name,
                    path,
                    kind: NodeKind::File,
                    extension,
                    size: Some(size),
                    children: None,
                });
            }
            out
        }

        Ok(collect(root, ""))
    }

    /// Flat list of symbol names across the project's code files, capped at
    /// `limit`, in path order.
    pub async fn symbol_names<C: ConnectionTrait>(
        &self,
        db: &C,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<String>, ProjectFileError> {
        let files = ProjectFile::list(db, project_id).await?;
        let mut symbols = Vec::new();

        for file in files {
            if symbols.len() >= limit {
                break;
            }
            if is_ignored(&file.path) {
                continue;
            }
            let Some(extension) = file.path.rsplit_once('.').map(|(_, ext)| ext) else {
                continue;
            };
            let Some(patterns) = symbol_patterns(extension) else {
                continue;
            };
            let Some(content) = ProjectFile::get(db, project_id, &file.path).await? else {
                continue;
            };

            for pattern in patterns {
                for capture in pattern.captures_iter(&content) {
                    if let Some(name) = capture.get(1) {
                        let name = name.as_str().to_string();
                        if !symbols.contains(&name) {
                            symbols.push(name);
                        }
                        if symbols.len() >= limit {
                            return Ok(symbols);
                        }
                    }
                }
            }
        }

        Ok(symbols)
    }
}
