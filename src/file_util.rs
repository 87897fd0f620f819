use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::ZipArchive;

/// Read size used when hashing.
pub const HASH_BLOCK_SIZE: usize = 1024 * 1024;

/// Parses a split threshold such as `500k`, `100m` or `1G` into bytes.
///
/// Returns `None` for anything else, including a zero size or a value that
/// overflows.
pub fn parse_split_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let unit = raw.chars().last()?;
    let digits = &raw[..raw.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let multiplier: u64 = match unit.to_ascii_lowercase() {
        'k' => 1024,
        'm' => 1024 * 1024,
        'g' => 1024 * 1024 * 1024,
        _ => return None,
    };
    let bytes = digits.parse::<u64>().ok()?.checked_mul(multiplier)?;
    (bytes > 0).then_some(bytes)
}

/// Path of chunk `index` of `primary`: `<primary>.part.NNN`.
pub fn part_path(primary: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(primary.as_os_str());
    name.push(format!(".part.{index:03}"));
    PathBuf::from(name)
}

/// Splits `path` into chunks of at most `chunk_size` bytes, streaming.
///
/// The source file is left in place. Returns the chunk paths in order.
pub fn split_file(path: &Path, chunk_size: u64) -> io::Result<Vec<PathBuf>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut parts = vec![];
    loop {
        if reader.fill_buf()?.is_empty() {
            break;
        }
        let part = part_path(path, parts.len());
        let mut writer = BufWriter::new(File::create(&part)?);
        io::copy(&mut reader.by_ref().take(chunk_size), &mut writer)?;
        writer.flush()?;
        parts.push(part);
    }
    Ok(parts)
}

/// Hex encoded SHA-256 of the file content.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(HASH_BLOCK_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes `<dir>/<name>.sha256` containing `<hex>  <name>\n` and returns its path.
pub fn write_checksum(artifact: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = artifact
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact has no file name"))?
        .to_string_lossy()
        .into_owned();
    let digest = sha256_file(artifact)?;
    let sidecar = dir.join(format!("{name}.sha256"));
    fs::write(&sidecar, format!("{digest}  {name}\n"))?;
    Ok(sidecar)
}

/// Human readable size with base 1024 and one decimal, e.g. `2.5 MB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Sum of the sizes of `files`; unreadable entries count as zero.
pub fn total_size(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|f| fs::metadata(f).ok())
        .map(|m| m.len())
        .sum()
}

/// Bytes used by a file, or by every file below a directory.
pub fn disk_usage(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Checks that a zip archive is readable.
///
/// Every entry is decompressed and CRC checked, unless the archive is
/// encrypted, in which case only the central directory is read.
pub fn verify_zip(path: &Path, encrypted: bool) -> io::Result<usize> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?)).map_err(io::Error::other)?;
    if !encrypted {
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(io::Error::other)?;
            io::copy(&mut entry, &mut io::sink())?;
        }
    }
    Ok(archive.len())
}

/// Checks that a gzip stream decodes to the end. Returns the decoded size.
pub fn verify_gzip(path: &Path) -> io::Result<u64> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(path)?));
    io::copy(&mut decoder, &mut io::sink())
}

/// Checks that every entry of a tar archive can be read. Returns the entry count.
pub fn verify_tar(path: &Path) -> io::Result<usize> {
    let mut archive = tar::Archive::new(BufReader::new(File::open(path)?));
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        io::copy(&mut entry, &mut io::sink())?;
        count += 1;
    }
    Ok(count)
}
