//! Changed-file domain classification for fallback dispatch.
//!
//! When automated repair gives up, the dispatcher labels the change request
//! for one or more specialist agents based on what kinds of files the diff
//! touches. Classification is pattern-based, matching filenames only; the
//! specialists do their own deeper analysis.

use std::sync::LazyLock;

use regex::Regex;
use scm::ChangedFile;

/// Specialist agent domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentDomain {
    /// Rust sources, Cargo manifests
    Rust,
    /// JS/TS, styles, frontend package manifests
    Frontend,
    /// Python sources and packaging
    Python,
    /// Dockerfiles, Kubernetes/Helm manifests, CI workflows
    Infra,
    /// Markdown and documentation trees
    Docs,
    /// Catch-all when nothing else matches
    General,
}

impl AgentDomain {
    /// The `agent:<domain>` label for this domain.
    #[must_use]
    pub fn label(self) -> String {
        format!("agent:{}", self.name())
    }

    /// Short domain name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Frontend => "frontend",
            Self::Python => "python",
            Self::Infra => "infra",
            Self::Docs => "docs",
            Self::General => "general",
        }
    }
}

static RUST_FILES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\.rs$").unwrap(),
        Regex::new(r"(^|/)Cargo\.(toml|lock)$").unwrap(),
    ]
});

static FRONTEND_FILES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\.(ts|tsx|js|jsx|css|scss)$").unwrap(),
        Regex::new(r"(^|/)package\.json$").unwrap(),
        Regex::new(r"(^|/)(pnpm-lock\.yaml|package-lock\.json|yarn\.lock)$").unwrap(),
    ]
});

static PYTHON_FILES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\.py$").unwrap(),
        Regex::new(r"(^|/)(pyproject\.toml|requirements[^/]*\.txt|setup\.py)$").unwrap(),
    ]
});

static INFRA_FILES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(^|/)Dockerfile(\.[^/]+)?$").unwrap(),
        Regex::new(r"^\.github/").unwrap(),
        Regex::new(r"^(infra|deploy|charts|manifests)/").unwrap(),
        Regex::new(r"(^|/)Chart\.yaml$").unwrap(),
        Regex::new(r"\.(yaml|yml|tf)$").unwrap(),
    ]
});

static DOCS_FILES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\.(md|mdx|rst)$").unwrap(),
        Regex::new(r"^docs?/").unwrap(),
    ]
});

fn matches_any(patterns: &[Regex], filename: &str) -> bool {
    patterns.iter().any(|p| p.is_match(filename))
}

fn classify_file(filename: &str) -> Option<AgentDomain> {
    // Order matters: docs and infra patterns are broad, so the
    // language-specific tables are consulted first.
    if matches_any(&RUST_FILES, filename) {
        Some(AgentDomain::Rust)
    } else if matches_any(&FRONTEND_FILES, filename) {
        Some(AgentDomain::Frontend)
    } else if matches_any(&PYTHON_FILES, filename) {
        Some(AgentDomain::Python)
    } else if matches_any(&INFRA_FILES, filename) {
        Some(AgentDomain::Infra)
    } else if matches_any(&DOCS_FILES, filename) {
        Some(AgentDomain::Docs)
    } else {
        None
    }
}

/// Classify a diff into specialist domains.
///
/// Returns one domain per kind of file the diff touches, or `General` alone
/// when nothing matched so the change request is never left undirected.
#[must_use]
pub fn classify(files: &[ChangedFile]) -> Vec<AgentDomain> {
    let mut domains: Vec<AgentDomain> = Vec::new();

    for file in files {
        if let Some(domain) = classify_file(&file.filename) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
    }

    if domains.is_empty() {
        return vec![AgentDomain::General];
    }
    domains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> ChangedFile {
        ChangedFile {
            filename: name.to_string(),
            status: "modified".to_string(),
            additions: 1,
            deletions: 0,
        }
    }

    #[test]
    fn all_python_diff_gets_python_only() {
        let files = vec![file("app/main.py"), file("tests/test_main.py")];
        assert_eq!(classify(&files), vec![AgentDomain::Python]);
    }

    #[test]
    fn mixed_diff_gets_one_domain_per_kind() {
        let files = vec![
            file("src/lib.rs"),
            file("web/App.tsx"),
            file("charts/app/Chart.yaml"),
        ];
        let domains = classify(&files);
        assert!(domains.contains(&AgentDomain::Rust));
        assert!(domains.contains(&AgentDomain::Frontend));
        assert!(domains.contains(&AgentDomain::Infra));
        assert_eq!(domains.len(), 3);
    }

    #[test]
    fn unknown_files_fall_back_to_general() {
        let files = vec![file("data/blob.bin")];
        assert_eq!(classify(&files), vec![AgentDomain::General]);
        assert_eq!(classify(&[]), vec![AgentDomain::General]);
    }

    #[test]
    fn cargo_manifest_is_rust_not_infra() {
        assert_eq!(classify(&[file("Cargo.toml")]), vec![AgentDomain::Rust]);
    }

    #[test]
    fn labels_are_prefixed() {
        assert_eq!(AgentDomain::Python.label(), "agent:python");
        assert_eq!(AgentDomain::General.label(), "agent:general");
    }
}
