//! Owner-only JPEG files for snapshots and time-lapse captures.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const FILE_STAMP: &str = "%Y%m%d_%H%M%S";
const MAX_SUFFIX: u32 = 1000;

/// `<prefix>_<YYYYMMDD_HHMMSS>.jpg`, without any collision suffix.
pub fn stamped_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{}_{}.jpg", prefix, at.format(FILE_STAMP))
}

/// Write `jpeg` into `dir` under a timestamped name. Never overwrites: when
/// two captures land in the same second the later one gets `_1`, `_2`, ...
pub fn write_private_jpeg(
    dir: &Path,
    prefix: &str,
    at: NaiveDateTime,
    jpeg: &[u8],
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|e| anyhow!("failed to create capture directory {}: {}", dir.display(), e))?;

    let stem = format!("{}_{}", prefix, at.format(FILE_STAMP));
    for n in 0..MAX_SUFFIX {
        let name = if n == 0 {
            format!("{}.jpg", stem)
        } else {
            format!("{}_{}.jpg", stem, n)
        };
        let path = dir.join(name);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(anyhow!("failed to create {}: {}", path.display(), err));
            }
        };
        file.write_all(jpeg)
            .and_then(|_| file.sync_all())
            .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
        return Ok(path);
    }
    Err(anyhow!("no free file name for {} in {}", stem, dir.display()))
}
