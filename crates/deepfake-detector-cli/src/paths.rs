use std::io;
use std::path::{Component, Path, PathBuf};

/// File name of the bundled model weights.
pub const MODEL_FILE_NAME: &str = "deepfake_detector.pth";

/// Directory holding the running executable.
pub fn executable_dir() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} has no parent directory", exe.display()),
        )
    })
}

/// `<exe_dir>/../models/deepfake_detector.pth`, normalised.
pub fn default_model_path(exe_dir: &Path) -> PathBuf {
    normalize(&exe_dir.join("..").join("models").join(MODEL_FILE_NAME))
}

/// Make `path` absolute against the current directory and normalise it.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    Ok(normalize(&std::path::absolute(path)?))
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_parent_dirs() {
        assert_eq!(
            normalize(Path::new("/opt/app/bin/../models/deepfake_detector.pth")),
            PathBuf::from("/opt/app/models/deepfake_detector.pth")
        );
        assert_eq!(normalize(Path::new("/bin/../../models")), PathBuf::from("/models"));
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize(Path::new("a/../../x")), PathBuf::from("../x"));
    }

    #[test]
    fn default_model_next_to_bin() {
        assert_eq!(
            default_model_path(Path::new("/opt/deepfake/bin")),
            PathBuf::from("/opt/deepfake/models/deepfake_detector.pth")
        );
    }

    #[test]
    fn absolute_is_absolute() -> io::Result<()> {
        let path = absolute(Path::new("models/../video.mp4"))?;
        assert!(path.is_absolute());
        assert!(path.ends_with("video.mp4"));
        assert!(!path.components().any(|c| c == Component::ParentDir));
        Ok(())
    }

    #[test]
    fn executable_dir_exists() -> io::Result<()> {
        assert!(executable_dir()?.is_dir());
        Ok(())
    }
}
