//! Static offline-import guard.
//!
//! Scans a processor's source for references to modules that could open
//! network I/O. The scan is line-based: a line whose first token (after
//! leading whitespace) is `import M` or `from M import ...` is a
//! violation when `M`, or any dotted prefix of `M`, is in the forbidden
//! set. The scan runs once per stage immediately before execution;
//! stages skipped for idempotency never reach it.

use camino::Utf8Path;
use std::fs;
use thiserror::Error;

/// Modules whose import disqualifies a processor from offline execution.
pub const FORBIDDEN_MODULES: &[&str] = &[
    "requests",
    "socket",
    "http",
    "http.client",
    "urllib",
    "urllib.request",
    "urllib.parse",
    "urllib.error",
    "urllib3",
    "aiohttp",
    "asyncio",
    "paramiko",
    "ftplib",
    "smtplib",
    "poplib",
    "imaplib",
    "telnetlib",
    "xmlrpc",
    "xmlrpc.client",
];

/// A processor source references a forbidden module.
#[derive(Error, Debug, Clone)]
#[error("Processor '{path}' references forbidden module '{module}'")]
pub struct OfflineViolation {
    pub path: String,
    pub module: String,
}

/// Succeeds iff the source at `path` contains no forbidden import.
///
/// An unreadable source is not a violation: the executor surfaces the
/// missing processor as its own terminal failure.
pub fn scan_processor(path: &Utf8Path) -> Result<(), OfflineViolation> {
    let Ok(source) = fs::read_to_string(path.as_std_path()) else {
        return Ok(());
    };

    for line in source.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("import ") {
            // `import a.b as x, c` names several modules on one line
            for part in rest.split(',') {
                if let Some(module) = part.split_whitespace().next() {
                    if let Some(hit) = forbidden_match(module) {
                        return Err(OfflineViolation {
                            path: path.to_string(),
                            module: hit.to_string(),
                        });
                    }
                }
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            if let Some(module) = rest.split_whitespace().next() {
                if let Some(hit) = forbidden_match(module) {
                    return Err(OfflineViolation {
                        path: path.to_string(),
                        module: hit.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Returns the forbidden entry matched by `module`, if any. A module
/// matches when it equals a forbidden entry or the entry is a dotted
/// prefix of it.
fn forbidden_match(module: &str) -> Option<&'static str> {
    FORBIDDEN_MODULES
        .iter()
        .find(|f| {
            module == **f
                || (module.len() > f.len()
                    && module.starts_with(*f)
                    && module.as_bytes()[f.len()] == b'.')
        })
        .copied()
}
