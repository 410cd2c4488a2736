//! Editor launcher (C4): runs the configured editor command as a blocking
//! child process.
//!
//! # Examples
//!
//! ```
//! use std::fs;
//! use rmate_launcher::editor::run_blocking;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("notes.txt");
//! fs::write(&path, b"hello").unwrap();
//!
//! // A real caller passes the user's configured shell command (e.g.
//! // "code --wait"); `true` stands in for an editor that exits
//! // immediately without touching the file.
//! run_blocking("true", &path).unwrap();
//! ```

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

/// Heuristic threshold below which a successful exit is suspicious (the
/// user likely forgot a `--wait`-style flag on their editor command).
const SUSPICIOUSLY_FAST: Duration = Duration::from_millis(500);

/// Shell out to `/bin/sh -c "<editor_command> \"<file_path>\""`, inheriting
/// stdio, and block until the child exits.
///
/// # Errors
///
/// Returns `Err` only if the shell itself could not be spawned (missing
/// `/bin/sh`, exhausted process table, and similar). A non-zero exit or a
/// suspiciously fast successful exit from the editor is logged, not
/// propagated as an error — the caller still owes the client a `close`
/// frame either way.
///
/// # Examples
///
/// ```
/// use std::fs;
/// use rmate_launcher::editor::run_blocking;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("scratch.txt");
/// fs::write(&path, b"original").unwrap();
///
/// run_blocking("true", &path).unwrap();
/// assert_eq!(fs::read(&path).unwrap(), b"original");
/// ```
pub fn run_blocking(editor_command: &str, file_path: &Path) -> std::io::Result<()> {
    let shell_line = format!("{editor_command} \"{}\"", file_path.display());

    let started = Instant::now();
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(&shell_line)
        .status()?;
    let elapsed = started.elapsed();

    if !status.success() {
        tracing::warn!(
            path = %file_path.display(),
            status = %status,
            "editor exited non-zero"
        );
    } else if elapsed < SUSPICIOUSLY_FAST {
        tracing::warn!(
            path = %file_path.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            "editor returned suspiciously fast; does the editor command need a --wait flag?"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn runs_command_against_file_path() {
        let file = NamedTempFile::new().expect("tempfile");
        run_blocking("true", file.path()).expect("run");
    }

    #[test]
    fn non_zero_exit_does_not_error() {
        let file = NamedTempFile::new().expect("tempfile");
        run_blocking("false", file.path()).expect("run");
    }

    #[test]
    fn file_path_is_appended_as_the_editor_commands_argument() {
        // run_blocking runs "<editor_command> \"<file_path>\"", so a
        // command ending in `cp source --` receives the target file path
        // as its destination argument.
        let source = NamedTempFile::new().expect("tempfile");
        std::fs::write(source.path(), b"x").unwrap();
        let dest_dir = tempfile::tempdir().expect("tempdir");
        let dest = dest_dir.path().join("copied.txt");

        run_blocking(&format!("cp {} --", source.path().display()), &dest).expect("run");

        assert!(dest.exists());
    }
}
