use std::fmt::{Debug, Display};
use std::fs;
use std::io::{self, Write};
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;

use crate::error::ResetError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// 32 bytes length content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Delete the entire output directory if it exists, then recreate it empty.
pub fn reset(dir: &Utf8Path) -> Result<(), ResetError> {
    let s = Instant::now();

    if fs::metadata(dir).is_ok() {
        fs::remove_dir_all(dir) //
            .map_err(ResetError::Remove)?;
    }

    fs::create_dir_all(dir) //
        .map_err(ResetError::Create)?;

    tracing::info!("cleaned {dir} {}", as_overhead(s));

    Ok(())
}

/// Write `data` to `path` through a uniquely named sibling temporary file and
/// a rename, so that readers never observe a truncated file and concurrent
/// writers never share a temporary. Returns `false` without touching the file
/// system when the file already holds exactly `data`.
pub fn write_atomic(path: &Utf8Path, data: impl AsRef<[u8]>) -> io::Result<bool> {
    let data = data.as_ref();

    if path.is_file() && Hash32::hash_file(path)? == Hash32::hash(data) {
        return Ok(false);
    }

    let dir = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = temp_file_in(dir, "")?;
    temp.write_all(data)?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(true)
}

/// Uniquely named hidden file in `dir`, readable like a plain `fs::write`
/// would leave it once persisted.
pub(crate) fn temp_file_in(dir: &Utf8Path, suffix: &str) -> io::Result<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".").suffix(suffix);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o644));
    }

    builder.tempfile_in(dir)
}

/// Expand `pattern` under `base`, returning matching files in sorted order.
///
/// The base directory is escaped, so only `pattern` is interpreted as a glob.
pub fn glob_files(base: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, glob::GlobError> {
    let full = format!("{}/{}", glob::Pattern::escape(base.as_str()), pattern);

    // Invalid patterns are only ever produced by programmer error, since every
    // pattern used by the pipeline is a literal.
    let paths = match glob::glob(&full) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::error!("invalid glob pattern {full}: {e}");
            return Ok(Vec::new());
        }
    };

    let mut files = Vec::new();
    for path in paths {
        let path = path?;
        if !path.is_file() {
            continue;
        }
        match Utf8PathBuf::try_from(path) {
            Ok(path) => files.push(path),
            Err(e) => tracing::warn!("skipping non UTF-8 path {:?}", e.as_path()),
        }
    }

    files.sort();
    Ok(files)
}

/// Digest of every file below `dir`: relative paths and contents, in sorted
/// order. Two trees with the same digest are byte-identical.
pub fn tree_digest(dir: &Utf8Path) -> io::Result<Hash32> {
    let files = glob_files(dir, "**/*").map_err(|e| e.into_error())?;

    let mut hasher = blake3::Hasher::new();
    for file in files {
        let relative = file.strip_prefix(dir).unwrap_or(&file);
        hasher.update(relative.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(&Hash32::hash_file(&file)?.0);
    }

    Ok(hasher.finalize().into())
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_reset_removes_contents() {
        let (_guard, root) = scratch();
        let out = root.join("public");
        fs::create_dir_all(out.join("css")).unwrap();
        fs::write(out.join("css/style.css"), "a{}").unwrap();

        reset(&out).unwrap();

        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_reset_creates_missing() {
        let (_guard, root) = scratch();
        let out = root.join("nested/public");

        reset(&out).unwrap();

        assert!(out.is_dir());
    }

    #[test]
    fn test_write_atomic_skips_identical() {
        let (_guard, root) = scratch();
        let path = root.join("a/b.txt");

        assert!(write_atomic(&path, "hello").unwrap());
        assert!(!write_atomic(&path, "hello").unwrap());
        assert!(write_atomic(&path, "world").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "world");
        assert_eq!(fs::read_dir(root.join("a")).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_concurrent_writers() {
        use std::sync::{Arc, Barrier};

        let (_guard, root) = scratch();
        let path = root.join("css/style.css");
        let barrier = Arc::new(Barrier::new(2));

        let writers: Vec<_> = [b"a{color:red}".as_slice(), b"a{color:blue}".as_slice()]
            .into_iter()
            .map(|data| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        barrier.wait();
                        write_atomic(&path, data).unwrap();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        let text = fs::read_to_string(&path).unwrap();
        assert!(text == "a{color:red}" || text == "a{color:blue}");
        assert_eq!(fs::read_dir(root.join("css")).unwrap().count(), 1);
    }

    #[test]
    fn test_glob_files_sorted_and_escaped() {
        let (_guard, root) = scratch();
        let base = root.join("we[ird]");
        fs::create_dir_all(base.join("z")).unwrap();
        fs::write(base.join("z/b.png"), "").unwrap();
        fs::write(base.join("a.png"), "").unwrap();
        fs::write(base.join("noext"), "").unwrap();

        let files = glob_files(&base, "**/*.*").unwrap();

        assert_eq!(files, vec![base.join("a.png"), base.join("z/b.png")]);
    }

    #[test]
    fn test_tree_digest_detects_changes() {
        let (_guard, root) = scratch();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("b/c.txt"), "c").unwrap();

        let first = tree_digest(&root).unwrap();
        assert_eq!(first, tree_digest(&root).unwrap());

        fs::write(root.join("b/c.txt"), "changed").unwrap();
        assert_ne!(first, tree_digest(&root).unwrap());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Utf8Path::new("src/partials/../head.html")),
            Utf8Path::new("src/head.html")
        );
        assert_eq!(
            normalize_path(Utf8Path::new("./src/./a.html")),
            Utf8Path::new("src/a.html")
        );
    }
}
