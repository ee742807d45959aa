#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a loaded module path is compared against the configured module name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// The whole path must equal the name.
    Exact,
    /// The final path component must equal the name.
    #[default]
    Basename,
    /// The path must end with the name.
    Suffix,
    /// The name may appear anywhere in the path. Loose: `libfoo.so` also
    /// matches `/lib/libfoo.so.bak` and `/lib/xlibfoo.so`.
    Substring,
}

impl MatchStrategy {
    /// Check whether `path` names the module `name`.
    ///
    /// ```
    /// # use config::MatchStrategy;
    /// let path = "/data/app/lib/target.so";
    /// assert!(MatchStrategy::Basename.matches(path, "target.so"));
    /// assert!(MatchStrategy::Suffix.matches(path, "lib/target.so"));
    /// assert!(!MatchStrategy::Exact.matches(path, "target.so"));
    /// assert!(MatchStrategy::Substring.matches(path, "arget"));
    /// ```
    pub fn matches(self, path: &str, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        match self {
            Self::Exact => path == name,
            Self::Basename => Path::new(path)
                .file_name()
                .and_then(|file| file.to_str())
                .is_some_and(|file| file == name),
            Self::Suffix => path.ends_with(name),
            Self::Substring => path.contains(name),
        }
    }
}
