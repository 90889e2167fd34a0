// src/kitchen/fetch.rs

//! Source fetching with a checksum-keyed cache
//!
//! Downloads land in a temporary file inside the cache directory, are
//! verified, and are renamed into place. A cached file is reused only while
//! its checksum still matches.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (5 minutes, sources can be large)
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Retrieves a URL into a local, verified file
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and verify it against `checksum`
    ///
    /// Returns the path of the verified local copy.
    fn fetch(&self, url: &str, checksum: &Checksum) -> Result<PathBuf>;
}

/// Fetcher for `http(s)://` and `file://` URLs with retries
pub struct NetworkFetcher {
    client: Client,
    cache_dir: PathBuf,
    max_retries: u32,
    retry_delay: Duration,
}

impl NetworkFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("formulary/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::IoError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
            max_retries: max_retries.max(1),
            retry_delay,
        })
    }

    /// Cache location for a checksum
    pub fn cached_path(&self, checksum: &Checksum) -> PathBuf {
        self.cache_dir.join(checksum.cache_key())
    }

    /// Whether a verified copy is already cached
    pub fn is_cached(&self, checksum: &Checksum) -> bool {
        let path = self.cached_path(checksum);
        path.is_file() && checksum.matches_file(&path).unwrap_or(false)
    }

    fn download_once(&self, url: &str, dest: &Path) -> Result<()> {
        let fetch_err = |reason: String| Error::Fetch {
            url: url.to_string(),
            reason,
        };

        if let Some(path) = local_path(url) {
            fs::copy(&path, dest).map_err(|e| fetch_err(e.to_string()))?;
            return Ok(());
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }

        let mut file = File::create(dest)?;
        io::copy(&mut response, &mut file).map_err(|e| fetch_err(e.to_string()))?;
        file.sync_all()?;
        Ok(())
    }

    fn download_verified(&self, url: &str, checksum: &Checksum, dest: &Path) -> Result<()> {
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.cache_dir)?;

        self.download_once(url, temp.path())?;

        if !checksum.matches_file(temp.path())? {
            let actual = crate::hash::hash_file(checksum.algorithm, temp.path())?;
            return Err(Error::ChecksumMismatch {
                url: url.to_string(),
                expected: checksum.to_string(),
                actual: format!("{}:{}", checksum.algorithm, actual),
            });
        }

        temp.persist(dest)
            .map_err(|e| Error::IoError(format!("Failed to store {}: {}", dest.display(), e)))?;
        Ok(())
    }
}

impl Fetcher for NetworkFetcher {
    fn fetch(&self, url: &str, checksum: &Checksum) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)?;
        let cached = self.cached_path(checksum);

        if cached.exists() {
            if checksum.matches_file(&cached)? {
                debug!("Using cached source: {}", cached.display());
                return Ok(cached);
            }
            warn!("Cached file {} no longer matches, re-downloading", cached.display());
            fs::remove_file(&cached)?;
        }

        info!("Downloading: {}", url);
        with_retries(self.max_retries, self.retry_delay, url, |_| {
            self.download_verified(url, checksum, &cached)
        })?;
        Ok(cached)
    }
}

/// Run `attempt` until it succeeds, fails for good, or `max_attempts` are used
///
/// Only retryable errors are retried; the n-th failure waits `delay * n`.
fn with_retries<T>(
    max_attempts: u32,
    delay: Duration,
    url: &str,
    mut attempt: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let mut n = 0;
    loop {
        n += 1;
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && n < max_attempts => {
                warn!("Download attempt {} of {} failed: {}, retrying...", n, url, e);
                std::thread::sleep(delay * n);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Filesystem path of a `file://` URL or a bare absolute path
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.starts_with('/') {
        return Some(PathBuf::from(url));
    }
    None
}

/// Fetch the first URL that succeeds, in order
///
/// The error of the last URL tried is returned when all fail.
pub fn fetch_any(fetcher: &dyn Fetcher, urls: &[String], checksum: &Checksum) -> Result<PathBuf> {
    let mut last = None;
    for url in urls {
        match fetcher.fetch(url, checksum) {
            Ok(path) => return Ok(path),
            Err(e) => {
                warn!("{}", e);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::Fetch {
        url: String::new(),
        reason: "no URL to fetch".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use tempfile::TempDir;

    fn checksum_of(data: &[u8]) -> Checksum {
        Checksum::new(HashAlgorithm::Sha256, hash_bytes(HashAlgorithm::Sha256, data)).unwrap()
    }

    fn fetcher(dir: &TempDir) -> NetworkFetcher {
        NetworkFetcher::new(dir.path().join("cache"), 2, Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_fetch_file_url_and_cache() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("pkg-1.0.tar.gz");
        fs::write(&src, b"archive bytes").unwrap();
        let checksum = checksum_of(b"archive bytes");
        let fetcher = fetcher(&dir);

        let url = format!("file://{}", src.display());
        let path = fetcher.fetch(&url, &checksum).unwrap();
        assert_eq!(path, fetcher.cached_path(&checksum));
        assert!(fetcher.is_cached(&checksum));

        // Served from cache even after the origin disappears
        fs::remove_file(&src).unwrap();
        assert_eq!(fetcher.fetch(&url, &checksum).unwrap(), path);
    }

    #[test]
    fn test_checksum_mismatch_leaves_no_cache_entry() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("pkg.tar.gz");
        fs::write(&src, b"tampered").unwrap();
        let checksum = checksum_of(b"original");
        let fetcher = fetcher(&dir);

        let err = fetcher.fetch(src.to_str().unwrap(), &checksum).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!fetcher.cached_path(&checksum).exists());
    }

    #[test]
    fn test_stale_cache_is_replaced() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("pkg.tar.gz");
        fs::write(&src, b"good").unwrap();
        let checksum = checksum_of(b"good");
        let fetcher = fetcher(&dir);

        fs::create_dir_all(dir.path().join("cache")).unwrap();
        fs::write(fetcher.cached_path(&checksum), b"corrupt").unwrap();

        let path = fetcher.fetch(src.to_str().unwrap(), &checksum).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"good");
    }

    #[test]
    fn test_retries_stop_after_max_attempts() {
        let mut attempts = Vec::new();
        let result: Result<()> = with_retries(3, Duration::ZERO, "https://x/a.tgz", |n| {
            attempts.push(n);
            Err(Error::Fetch {
                url: "https://x/a.tgz".into(),
                reason: "connection reset".into(),
            })
        });
        assert!(matches!(result, Err(Error::Fetch { ref reason, .. }) if reason == "connection reset"));
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[test]
    fn test_retries_succeed_on_later_attempt() {
        let mut calls = 0;
        let result = with_retries(3, Duration::ZERO, "https://x/a.tgz", |n| {
            calls += 1;
            if n < 2 {
                Err(Error::ChecksumMismatch {
                    url: "https://x/a.tgz".into(),
                    expected: "sha256:aa".into(),
                    actual: "sha256:bb".into(),
                })
            } else {
                Ok(n)
            }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_non_retryable_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<()> = with_retries(5, Duration::ZERO, "https://x/a.tgz", |_| {
            calls += 1;
            Err(Error::IoError("disk full".into()))
        });
        assert!(matches!(result, Err(Error::IoError(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_source_appearing_between_attempts_is_fetched() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("late.tar.gz");
        let checksum = checksum_of(b"late bytes");
        let fetcher =
            NetworkFetcher::new(dir.path().join("cache"), 3, Duration::from_millis(800)).unwrap();

        let writer = {
            let src = src.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                fs::write(&src, b"late bytes").unwrap();
            })
        };
        let started = std::time::Instant::now();
        let path = fetcher
            .fetch(&format!("file://{}", src.display()), &checksum)
            .unwrap();
        writer.join().unwrap();

        // The first attempt failed and the retry waited out one delay
        assert!(started.elapsed() >= Duration::from_millis(800));
        assert_eq!(fs::read(path).unwrap(), b"late bytes");
    }

    #[test]
    fn test_fetch_any_falls_back_to_mirror() {
        let dir = TempDir::new().unwrap();
        let mirror = dir.path().join("mirror.tar.gz");
        fs::write(&mirror, b"data").unwrap();
        let checksum = checksum_of(b"data");
        let fetcher = fetcher(&dir);

        let urls = vec![
            format!("file://{}", dir.path().join("missing.tar.gz").display()),
            format!("file://{}", mirror.display()),
        ];
        assert!(fetch_any(&fetcher, &urls, &checksum).is_ok());
        assert!(matches!(
            fetch_any(&fetcher, &urls[..1], &checksum),
            Err(Error::Fetch { .. })
        ));
    }
}
