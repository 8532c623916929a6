//! C4 — cache store.
//!
//! Grounded on `examples/original_source/proxyprovider/types.go`'s
//! `subscriptionRawData.encode`/`decode`: a self-describing binary encoding of the raw
//! subscription bytes plus the last-known subscribe info, armored as hex text so the
//! cache file stays diff-friendly and trivially inspectable. The original uses
//! `encoding/gob`; this crate uses `bincode` for the same "whole struct, one shot"
//! binary encoding, since `gob` has no direct Rust equivalent and `bincode` is the
//! pack's closest analogue for a plain, non-self-describing struct format.

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::fetch::SubscribeInfo;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
	#[error("cache file is not configured")]
	NotConfigured,
	#[error("cache file is empty")]
	EmptyCache,
	#[error("failed to read cache file {0}: {1}")]
	Read(String, std::io::Error),
	#[error("failed to write cache file {0}: {1}")]
	Write(String, std::io::Error),
	#[error("cache file is not valid hex: {0}")]
	Hex(#[from] hex::FromHexError),
	#[error("failed to decode cached subscription: {0}")]
	Decode(#[from] bincode::Error),
}

/// The hex-armored, bincode-encoded payload written to `cache_file`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedSubscription {
	pub peer_info: Vec<u8>,
	pub upload: u64,
	pub download: u64,
	pub total: u64,
	pub expire_unix: Option<u64>,
}

impl CachedSubscription {
	pub fn new(peer_info: Vec<u8>, info: SubscribeInfo) -> Self {
		Self {
			peer_info,
			upload: info.upload,
			download: info.download,
			total: info.total,
			expire_unix: info.expire,
		}
	}

	pub fn subscribe_info(&self) -> SubscribeInfo {
		SubscribeInfo {
			upload: self.upload,
			download: self.download,
			total: self.total,
			expire: self.expire_unix,
		}
	}
}

fn encode(entry: &CachedSubscription) -> Result<Vec<u8>, CacheError> {
	let raw = bincode::serialize(entry)?;
	Ok(hex::encode(raw).into_bytes())
}

fn decode(data: &[u8]) -> Result<CachedSubscription, CacheError> {
	let trimmed = data.trim_ascii();
	let raw = hex::decode(trimmed)?;
	Ok(bincode::deserialize(&raw)?)
}

/// Reads and decodes the cache file, returning the entry and its last-modified time.
/// `cache_file` empty means caching is disabled entirely: reads fail with
/// `NotConfigured`, writes are no-ops.
pub async fn read(cache_file: &str) -> Result<(CachedSubscription, SystemTime), CacheError> {
	if cache_file.is_empty() {
		return Err(CacheError::NotConfigured);
	}
	let data = fs_err::tokio::read(cache_file)
		.await
		.map_err(|e| CacheError::Read(cache_file.to_string(), e))?;
	if data.is_empty() {
		return Err(CacheError::EmptyCache);
	}
	let mtime = fs_err::tokio::metadata(cache_file)
		.await
		.map_err(|e| CacheError::Read(cache_file.to_string(), e))?
		.modified()
		.unwrap_or(SystemTime::UNIX_EPOCH);
	Ok((decode(&data)?, mtime))
}

/// Writes the cache file via a temp-file-then-rename so a reader never observes a
/// partially-written file; not required by the external contract, but cheap to do
/// properly with `tokio::fs`/`fs-err` already in hand.
pub async fn write(cache_file: &str, entry: &CachedSubscription) -> Result<(), CacheError> {
	if cache_file.is_empty() {
		return Ok(());
	}
	let encoded = encode(entry)?;

	let path = Path::new(cache_file);
	let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
	let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CacheError::Write(cache_file.to_string(), e))?;
	fs_err::tokio::write(tmp.path(), &encoded)
		.await
		.map_err(|e| CacheError::Write(cache_file.to_string(), e))?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		let perms = std::fs::Permissions::from_mode(0o644);
		fs_err::tokio::set_permissions(tmp.path(), perms)
			.await
			.map_err(|e| CacheError::Write(cache_file.to_string(), e))?;
	}

	tmp.persist(cache_file).map_err(|e| CacheError::Write(cache_file.to_string(), e.error))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> CachedSubscription {
		CachedSubscription::new(
			b"proxies: []".to_vec(),
			SubscribeInfo { upload: 1, download: 2, total: 3, expire: Some(42) },
		)
	}

	#[test]
	fn encode_decode_round_trips() {
		let entry = sample();
		let encoded = encode(&entry).unwrap();
		let decoded = decode(&encoded).unwrap();
		assert_eq!(entry, decoded);
	}

	#[test]
	fn decode_rejects_non_hex() {
		let err = decode(b"not hex!!").unwrap_err();
		assert!(matches!(err, CacheError::Hex(_)));
	}

	#[tokio::test]
	async fn read_empty_path_is_not_configured() {
		let err = read("").await.unwrap_err();
		assert!(matches!(err, CacheError::NotConfigured));
	}

	#[tokio::test]
	async fn write_then_read_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cache.bin");
		let path_str = path.to_str().unwrap();

		let entry = sample();
		write(path_str, &entry).await.unwrap();
		let (read_back, _mtime) = read(path_str).await.unwrap();
		assert_eq!(read_back, entry);
	}

	#[tokio::test]
	async fn read_empty_file_is_empty_cache() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("empty.bin");
		fs_err::tokio::write(&path, b"").await.unwrap();
		let err = read(path.to_str().unwrap()).await.unwrap_err();
		assert!(matches!(err, CacheError::EmptyCache));
	}

	#[tokio::test]
	async fn write_is_noop_when_not_configured() {
		write("", &sample()).await.unwrap();
	}
}
