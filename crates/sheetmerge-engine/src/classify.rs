//! Assign sub files to sheet groups by keywords in their file names.

use crate::config::MergeConfig;
use crate::events::{Reporter, StatusEvent};
use std::path::{Path, PathBuf};

/// Unrecognized files named individually in the warning.
pub const UNRECOGNIZED_PREVIEW: usize = 5;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// `(sheet, files)` in configuration order; groups without files are
    /// included with an empty list.
    pub groups: Vec<(String, Vec<PathBuf>)>,
    pub unrecognized: Vec<PathBuf>,
}

impl Classification {
    pub fn files_for(&self, sheet: &str) -> &[PathBuf] {
        self.groups
            .iter()
            .find(|(s, _)| s == sheet)
            .map(|(_, files)| files.as_slice())
            .unwrap_or(&[])
    }

    pub fn recognized_count(&self) -> usize {
        self.groups.iter().map(|(_, f)| f.len()).sum()
    }

    /// Emit the warning for unrecognized files and the per-group summary.
    pub fn report(&self, reporter: &Reporter) {
        if !self.unrecognized.is_empty() {
            let count = self.unrecognized.len();
            let names: Vec<String> = self
                .unrecognized
                .iter()
                .take(UNRECOGNIZED_PREVIEW)
                .map(|p| display_name(p))
                .collect();
            let mut message = format!("{count} file(s) not recognized: {}", names.join(", "));
            if count > UNRECOGNIZED_PREVIEW {
                message.push_str(&format!(" ... and {} more", count - UNRECOGNIZED_PREVIEW));
            }
            reporter.emit(StatusEvent::warning(message));
        }
        let summary: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(sheet, files)| format!("{sheet}: {}", files.len()))
            .collect();
        if summary.is_empty() {
            reporter.emit(StatusEvent::warning(
                "no file matched any group keyword; check the file names",
            ));
        } else {
            reporter.emit(StatusEvent::info(format!(
                "recognized {} file(s): {}",
                self.recognized_count(),
                summary.join(", ")
            )));
        }
    }
}

/// File name for messages; falls back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Each file goes to the first group (in configuration order) whose keyword
/// occurs in its file name. Groups without a keyword never match.
pub fn classify_sources<P: AsRef<Path>>(paths: &[P], config: &MergeConfig) -> Classification {
    let mut out = Classification {
        groups: config
            .groups
            .iter()
            .map(|g| (g.sheet.clone(), Vec::new()))
            .collect(),
        unrecognized: Vec::new(),
    };
    for path in paths {
        let path = path.as_ref();
        let name = display_name(path);
        let slot = config.groups.iter().position(|g| {
            g.file_keyword
                .as_deref()
                .is_some_and(|k| name.contains(k))
        });
        match slot {
            Some(i) => out.groups[i].1.push(path.to_path_buf()),
            None => out.unrecognized.push(path.to_path_buf()),
        }
    }
    out
}
