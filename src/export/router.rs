// src/export/router.rs
use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;

use super::target::Target;

/// One output file with its match rules and static labels
#[derive(Debug, Clone)]
pub struct FileRoute {
    pub path: PathBuf,
    pub labels: BTreeMap<String, String>,
    /// Label name (without namespace) to anchored pattern
    pub match_re: BTreeMap<String, Regex>,
}

impl FileRoute {
    /// Build a route, anchoring every pattern so it must match the whole label value
    pub fn new(
        path: impl Into<PathBuf>,
        labels: BTreeMap<String, String>,
        patterns: &BTreeMap<String, String>,
    ) -> Result<Self, regex::Error> {
        let match_re = patterns
            .iter()
            .map(|(name, pattern)| compile_anchored(pattern).map(|re| (name.clone(), re)))
            .collect::<Result<_, regex::Error>>()?;

        Ok(Self {
            path: path.into(),
            labels,
            match_re,
        })
    }
}

/// Compile `pattern` so it only matches complete values
pub fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

/// Partition targets across output files.
///
/// Every route gets an entry even if nothing matches. A target matching
/// several routes is copied and labeled independently for each. Routes
/// sharing a path write into the same list.
pub fn route(targets: &[Target], routes: &[FileRoute]) -> BTreeMap<PathBuf, Vec<Target>> {
    let mut files: BTreeMap<PathBuf, Vec<Target>> = routes
        .iter()
        .map(|route| (route.path.clone(), Vec::new()))
        .collect();

    for target in targets {
        for route in routes {
            if !target.matches(&route.match_re) {
                continue;
            }
            let mut labeled = target.clone();
            labeled.add_labels(&route.labels);
            files.entry(route.path.clone()).or_default().push(labeled);
        }
    }

    files
}
