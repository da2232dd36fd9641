//! Fixtures shared by unit tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::domain::CapabilitySummary;

/// Write an executable `/bin/sh` script.
///
/// The file is written by a child process so this process never holds a
/// writable descriptor to it; a concurrently forked test child could
/// otherwise inherit one and make exec fail with ETXTBSY.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg("cat > \"$1\" && chmod +x \"$1\"")
        .arg("sh")
        .arg(&path)
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(format!("#!/bin/sh\n{}", body).as_bytes()).unwrap();
    drop(stdin);
    assert!(child.wait().unwrap().success());
    path
}

/// A capability pointing at `entrypoint`
pub fn capability(id: &str, entrypoint: &Path) -> CapabilitySummary {
    CapabilitySummary {
        id: id.to_string(),
        summary: format!("{} capability", id),
        description: None,
        entrypoint: entrypoint.display().to_string(),
        absolute_entrypoint: entrypoint.to_path_buf(),
        supports_check: false,
        tags: Vec::new(),
        docs_link: None,
        origin: entrypoint.display().to_string(),
        surfaces: Vec::new(),
        manifest_path: PathBuf::from("capabilities/manifest.json"),
    }
}
