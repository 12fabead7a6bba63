//! Appends tagged payloads to their configured destination files.
//!
//! Destination files are opened, appended to and closed for every line, so
//! external rotation or deletion of an output file needs no coordination.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::config::Route;
use crate::error::{Error, Result};
use crate::line::ParsedLine;

/// Mode of created destination directories.
pub const DIR_MODE: u32 = 0o750;
/// Mode of created destination files.
pub const FILE_MODE: u32 = 0o644;

/// Outcome of routing a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No route has a name equal to the line's tag.
    Unrouted,
    /// The payload was appended to `path`.
    Written { path: PathBuf },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// First route whose name equals `tag`.
    pub fn find<'r>(tag: &str, routes: &'r [Route]) -> Option<&'r Route> {
        routes.iter().find(|r| r.name == tag)
    }

    pub fn dispatch(&self, line: &ParsedLine, routes: &[Route]) -> Result<Dispatch> {
        let Some(route) = Self::find(&line.tag, routes) else {
            trace!(tag = %line.tag, "no route for tag, dropping line");
            return Ok(Dispatch::Unrouted);
        };

        ensure_dir(&route.directory)?;
        let path = route.destination();
        append(&path, &line.payload)?;
        trace!(tag = %line.tag, path = %path.display(), "line routed");

        Ok(Dispatch::Written { path })
    }
}

/// Creates `dir` with [`DIR_MODE`] if missing. An existing directory is
/// left untouched.
fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(Error::RouteTargetInvalid {
                path: dir.to_path_buf(),
            });
        }
        Err(_) => {}
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir).map_err(|source| Error::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    // DirBuilder's mode is filtered by the umask.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE)) {
            warn!(
                path = %dir.display(),
                error = %e,
                "cannot set mode {:o} on log directory",
                DIR_MODE
            );
        }
    }

    debug!(path = %dir.display(), "created log directory");
    Ok(())
}

fn append(path: &Path, payload: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    let mut file = options.open(path).map_err(|source| Error::OpenDestination {
        path: path.to_path_buf(),
        source,
    })?;

    let mut record = String::with_capacity(payload.len() + 1);
    record.push_str(payload);
    record.push('\n');
    file.write_all(record.as_bytes())
        .map_err(|source| Error::WriteDestination {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> ParsedLine {
        ParsedLine::parse(raw).unwrap()
    }

    #[test]
    fn test_routes_payload_to_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let routes = vec![Route::new("svc1", &out).with_filename("")];

        let result = Router::new().dispatch(&parsed("svc1: hello"), &routes).unwrap();

        assert_eq!(
            result,
            Dispatch::Written {
                path: out.join("svc1")
            }
        );
        assert_eq!(fs::read_to_string(out.join("svc1")).unwrap(), "hello\n");
    }

    #[test]
    fn test_explicit_filename() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![Route::new("svc1", dir.path()).with_filename("access.log")];

        Router::new().dispatch(&parsed("svc1: a"), &routes).unwrap();
        Router::new().dispatch(&parsed("svc1: b"), &routes).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("access.log")).unwrap(),
            "a\nb\n"
        );
    }

    #[test]
    fn test_first_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let routes = vec![Route::new("svc1", &first), Route::new("svc1", &second)];

        for _ in 0..3 {
            Router::new().dispatch(&parsed("svc1: x"), &routes).unwrap();
        }

        assert_eq!(fs::read_to_string(first.join("svc1")).unwrap(), "x\nx\nx\n");
        assert!(!second.exists());
    }

    #[test]
    fn test_unmatched_tag_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let routes = vec![Route::new("svc1", dir.path().join("out"))];

        let result = Router::new().dispatch(&parsed("other: hi"), &routes).unwrap();

        assert_eq!(result, Dispatch::Unrouted);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_missing_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a").join("b");
        let routes = vec![Route::new("svc1", &out)];
        let router = Router::new();

        router.dispatch(&parsed("svc1: 1"), &routes).unwrap();
        router.dispatch(&parsed("svc1: 2"), &routes).unwrap();

        assert!(out.is_dir());
        assert_eq!(fs::read_to_string(out.join("svc1")).unwrap(), "1\n2\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_directory_is_left_alone() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let routes = vec![Route::new("svc1", &out)];
        let router = Router::new();

        router.dispatch(&parsed("svc1: 1"), &routes).unwrap();
        fs::set_permissions(&out, fs::Permissions::from_mode(0o700)).unwrap();
        router.dispatch(&parsed("svc1: 2"), &routes).unwrap();

        let mode = fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_created_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let routes = vec![Route::new("svc1", dir.path())];
        Router::new().dispatch(&parsed("svc1: 1"), &routes).unwrap();

        let mode = fs::metadata(dir.path().join("svc1")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & !FILE_MODE, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_created_directory_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let routes = vec![Route::new("svc1", &out)];
        Router::new().dispatch(&parsed("svc1: 1"), &routes).unwrap();

        let mode = fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, DIR_MODE);
    }

    #[test]
    fn test_target_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("plain");
        fs::write(&not_a_dir, "").unwrap();
        let routes = vec![Route::new("svc1", &not_a_dir)];

        let err = Router::new().dispatch(&parsed("svc1: x"), &routes).unwrap_err();
        assert!(matches!(err, Error::RouteTargetInvalid { .. }));
    }
}
