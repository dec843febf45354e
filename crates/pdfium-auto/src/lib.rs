//! # pdfium-auto
//!
//! Find the PDFium shared library for `pdfium-render`, downloading it on
//! first use so that `invoice2json` works without a manual
//! `LD_LIBRARY_PATH` / `DYLD_LIBRARY_PATH` setup.
//!
//! ## Lookup order
//!
//! 1. `PDFIUM_LIB_PATH`, when it names an existing file.
//! 2. The per-version cache, `{cache}/edgequake-invoice/pdfium-{VERSION}/`.
//! 3. Download of the platform archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries),
//!    extracting only the library into the cache.
//!
//! Steps 1 and 2 never touch the network; [`cached_pdfium_path`] stops there.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pdfium_auto::{bind_pdfium_from_path, ensure_pdfium_library};
//!
//! let path = ensure_pdfium_library(Some(&|downloaded, total| {
//!     if let Some(t) = total {
//!         eprint!("\rDownloading PDFium: {}/{} bytes", downloaded, t);
//!     }
//! })).expect("download failed");
//! let pdfium = bind_pdfium_from_path(&path).expect("bind failed");
//! ```
//!
//! ## Environment variable overrides
//!
//! - `PDFIUM_LIB_PATH`: path to an existing pdfium library; skips download.
//! - `PDFIUM_AUTO_CACHE_DIR`: override the default cache directory.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

/// The pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

/// Cache sub-directory owned by this tool.
const CACHE_NAMESPACE: &str = "edgequake-invoice";

const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// Callback receiving `(bytes_downloaded, total_bytes)`.
pub type DownloadProgress<'a> = &'a dyn Fn(u64, Option<u64>);

/// Errors returned by pdfium-auto operations.
#[derive(Error, Debug)]
pub enum PdfiumAutoError {
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Archive extraction failed: {0}")]
    Extract(String),

    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

/// Release asset for one OS/arch pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    /// Asset filename in the release, e.g. `pdfium-linux-x64.tgz`.
    pub archive: &'static str,
    /// Path of the library inside the archive.
    pub member: &'static str,
    /// Filename written to the cache.
    pub lib_name: &'static str,
}

const PLATFORMS: &[Platform] = &[
    Platform { os: "macos", arch: "aarch64", archive: "pdfium-mac-arm64.tgz", member: "lib/libpdfium.dylib", lib_name: "libpdfium.dylib" },
    Platform { os: "macos", arch: "x86_64", archive: "pdfium-mac-x64.tgz", member: "lib/libpdfium.dylib", lib_name: "libpdfium.dylib" },
    Platform { os: "linux", arch: "x86_64", archive: "pdfium-linux-x64.tgz", member: "lib/libpdfium.so", lib_name: "libpdfium.so" },
    Platform { os: "linux", arch: "aarch64", archive: "pdfium-linux-arm64.tgz", member: "lib/libpdfium.so", lib_name: "libpdfium.so" },
    Platform { os: "windows", arch: "x86_64", archive: "pdfium-win-x64.tgz", member: "bin/pdfium.dll", lib_name: "pdfium.dll" },
    Platform { os: "windows", arch: "aarch64", archive: "pdfium-win-arm64.tgz", member: "bin/pdfium.dll", lib_name: "pdfium.dll" },
    Platform { os: "windows", arch: "x86", archive: "pdfium-win-x86.tgz", member: "bin/pdfium.dll", lib_name: "pdfium.dll" },
];

/// Release asset for `os`/`arch` (values of `std::env::consts`).
pub fn platform_for(os: &str, arch: &str) -> Result<Platform, PdfiumAutoError> {
    PLATFORMS
        .iter()
        .find(|p| p.os == os && p.arch == arch)
        .copied()
        .ok_or_else(|| PdfiumAutoError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
}

fn current_platform() -> Result<Platform, PdfiumAutoError> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

/// Per-version cache directory.
///
/// - **macOS**: `~/Library/Caches/edgequake-invoice/pdfium-{VERSION}/`
/// - **Linux**: `~/.cache/edgequake-invoice/pdfium-{VERSION}/`
/// - **Windows**: `%LOCALAPPDATA%\edgequake-invoice\pdfium-{VERSION}\`
///
/// `PDFIUM_AUTO_CACHE_DIR` replaces the base directory.
pub fn pdfium_cache_dir() -> PathBuf {
    let versioned = format!("pdfium-{PDFIUM_VERSION}");
    if let Ok(dir) = std::env::var("PDFIUM_AUTO_CACHE_DIR") {
        return PathBuf::from(dir).join(versioned);
    }
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_NAMESPACE)
        .join(versioned)
}

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Path of a usable library without any network access, if one exists.
pub fn cached_pdfium_path() -> Option<PathBuf> {
    if let Some(p) = RESOLVED_PATH.get() {
        return Some(p.clone());
    }
    if let Some(p) = env_override() {
        return Some(p);
    }
    let platform = current_platform().ok()?;
    Some(pdfium_cache_dir().join(platform.lib_name)).filter(|p| p.exists())
}

/// `true` when [`ensure_pdfium_library`] would not need the network.
pub fn is_pdfium_cached() -> bool {
    cached_pdfium_path().is_some()
}

/// Return the library path, downloading into the cache if necessary.
///
/// Safe to call from several threads; the resolved path is memoised for the
/// process lifetime.
pub fn ensure_pdfium_library(on_progress: Option<DownloadProgress<'_>>) -> Result<PathBuf, PdfiumAutoError> {
    if let Some(path) = cached_pdfium_path() {
        let _ = RESOLVED_PATH.set(path.clone());
        return Ok(path);
    }

    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        eprintln!("pdfium-auto: PDFIUM_LIB_PATH '{p}' not found; downloading …");
    }

    let platform = current_platform()?;
    let cache_dir = pdfium_cache_dir();
    std::fs::create_dir_all(&cache_dir).map_err(PdfiumAutoError::CacheDir)?;

    let url = format!("{BASE_URL}/chromium%2F{PDFIUM_VERSION}/{}", platform.archive);
    let archive = download_bytes(&url, on_progress)?;
    let lib_path = cache_dir.join(platform.lib_name);
    extract_library(&archive, platform.member, &lib_path)?;

    let _ = RESOLVED_PATH.set(lib_path.clone());
    Ok(lib_path)
}

/// Bind to the PDFium library at `path`.
pub fn bind_pdfium_from_path(path: &Path) -> Result<Pdfium, PdfiumAutoError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumAutoError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn env_override() -> Option<PathBuf> {
    std::env::var_os("PDFIUM_LIB_PATH")
        .map(PathBuf::from)
        .filter(|p| p.exists())
}

fn download_bytes(url: &str, on_progress: Option<DownloadProgress<'_>>) -> Result<Vec<u8>, PdfiumAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PdfiumAutoError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| PdfiumAutoError::Download(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(PdfiumAutoError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(32 * 1024 * 1024) as usize);
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some(cb) = on_progress {
                    cb(buf.len() as u64, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PdfiumAutoError::Download(format!("Read error: {e}"))),
        }
    }
    Ok(buf)
}

/// Unpack `member` from a `.tgz` to `dest`.
///
/// The file is written next to `dest` and renamed into place, so a concurrent
/// reader never binds a half-written library.
fn extract_library(archive: &[u8], member: &str, dest: &Path) -> Result<(), PdfiumAutoError> {
    let extract_err = |e: std::io::Error| PdfiumAutoError::Extract(e.to_string());
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(archive));

    for entry in tar.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let matches = entry.path().map_err(extract_err)?.to_string_lossy() == member;
        if !matches {
            continue;
        }
        let partial = dest.with_extension("partial");
        entry
            .unpack(&partial)
            .map_err(|e| PdfiumAutoError::Extract(format!("Unpack failed: {e}")))?;
        std::fs::rename(&partial, dest).map_err(PdfiumAutoError::CacheDir)?;
        return Ok(());
    }

    Err(PdfiumAutoError::Extract(format!(
        "Library '{member}' not found in archive"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn known_platforms_resolve() {
        let linux = platform_for("linux", "x86_64").unwrap();
        assert_eq!(linux.archive, "pdfium-linux-x64.tgz");
        assert_eq!(linux.lib_name, "libpdfium.so");
        assert_eq!(platform_for("windows", "x86").unwrap().member, "bin/pdfium.dll");
    }

    #[test]
    fn unknown_platform_is_an_error() {
        let err = platform_for("freebsd", "riscv64").unwrap_err();
        assert!(err.to_string().contains("freebsd/riscv64"));
    }

    #[test]
    fn cache_dir_is_versioned_and_namespaced() {
        let d = pdfium_cache_dir();
        let s = d.to_string_lossy();
        assert!(s.contains(PDFIUM_VERSION));
        if std::env::var_os("PDFIUM_AUTO_CACHE_DIR").is_none() {
            assert!(s.contains(CACHE_NAMESPACE));
        }
    }

    #[test]
    fn extract_picks_only_the_library() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("libpdfium.so");
        let archive = tgz(&[
            ("LICENSE", &b"license text"[..]),
            ("lib/libpdfium.so", &b"\x7fELF fake library"[..]),
        ]);
        extract_library(&archive, "lib/libpdfium.so", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"\x7fELF fake library");
        assert!(!dest.with_extension("partial").exists());
    }

    #[test]
    fn extract_reports_missing_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tgz(&[("include/fpdfview.h", &b"/* header */"[..])]);
        let err = extract_library(&archive, "lib/libpdfium.so", &dir.path().join("x")).unwrap_err();
        assert!(matches!(err, PdfiumAutoError::Extract(_)));
    }
}
