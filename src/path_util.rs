use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Checks that `path` exists and is a directory.
///
/// # Errors
/// Returns an error naming the path if it is missing or not a directory.
pub fn check_dir(path: &Path) -> Result<()> {
    let metadata =
        fs::metadata(path).with_context(|| format!("The directory '{}' is invalid", path.display()))?;
    if !metadata.is_dir() {
        bail!("'{}' is not a directory", path.display());
    }
    Ok(())
}

/// Expands a user supplied path, replacing a leading `~` or `$HOME` with the home directory.
pub fn expand_path(input: &str) -> PathBuf {
    PathBuf::from(expand_home(input))
}

/// Returns `path` as an absolute path, joined onto the current directory when relative.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

fn expand_home(input: &str) -> String {
    let Some(home) = dirs::home_dir() else {
        return input.into();
    };
    if let Some(rest) = input.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            return format!("{}{rest}", home.to_string_lossy());
        }
    } else if let Some(rest) = input.strip_prefix("$HOME") {
        return format!("{}{rest}", home.to_string_lossy());
    }
    input.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path("~/backups"), home.join("backups"));
        assert_eq!(expand_path("$HOME/data"), home.join("data"));
        assert_eq!(expand_path("~"), home);
        assert_eq!(expand_path("~other/x"), PathBuf::from("~other/x"));
        assert_eq!(expand_path("/srv/data"), PathBuf::from("/srv/data"));
    }

    #[test]
    fn test_absolutize() {
        let cwd = env::current_dir().unwrap();
        assert_eq!(absolutize(Path::new("rel/dir")), cwd.join("rel/dir"));
        let abs = cwd.join("x");
        assert_eq!(absolutize(&abs), abs);
    }

    #[test]
    fn test_check_dir() {
        let dir = tempdir().unwrap();
        assert!(check_dir(dir.path()).is_ok());

        let file = NamedTempFile::new().unwrap();
        let err = check_dir(file.path()).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));

        let missing = dir.path().join("missing");
        let err = check_dir(&missing).unwrap_err();
        assert!(err.to_string().contains("is invalid"));
    }
}
