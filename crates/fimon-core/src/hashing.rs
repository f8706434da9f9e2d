//! Filtered file fingerprints.

use blake2::{Blake2b512, Blake2s256};
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{MonitorError, Result};
use crate::filters::FilterSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Sha3_256,
    Sha3_512,
    Blake2s256,
    Blake2b512,
}

impl HashAlgorithm {
    /// Maps the `monitor.algorithm` / `monitor.key_length` pair.
    pub fn from_config(name: &str, key_length: u32) -> Result<Self> {
        if key_length != 256 && key_length != 512 {
            return Err(MonitorError::config(format!(
                "invalid key length {key_length}; only 256 and 512 are supported"
            )));
        }
        match (name, key_length) {
            ("sha", 256) => Ok(Self::Sha256),
            ("sha", _) => Ok(Self::Sha512),
            ("sha3", 256) => Ok(Self::Sha3_256),
            ("sha3", _) => Ok(Self::Sha3_512),
            ("blake2s", 256) => Ok(Self::Blake2s256),
            ("blake2s", _) => Ok(Self::Blake2b512),
            _ => Err(MonitorError::config(format!(
                "unsupported hash algorithm: {name}"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
            Self::Sha3_256 => "SHA3-256",
            Self::Sha3_512 => "SHA3-512",
            Self::Blake2s256 => "BLAKE2s-256",
            Self::Blake2b512 => "BLAKE2b-512",
        }
    }

    /// Digest size in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Sha3_256 | Self::Blake2s256 => 32,
            Self::Sha512 | Self::Sha3_512 | Self::Blake2b512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hashes `path` line by line, skipping lines the filter set excludes for it.
/// Every included line is fed with a trailing `\n`, whether or not the file
/// ends with one.
pub fn compute_hash(path: &str, algorithm: HashAlgorithm, filters: &FilterSet) -> Result<String> {
    match algorithm {
        HashAlgorithm::Sha256 => digest_file::<Sha256>(path, filters),
        HashAlgorithm::Sha512 => digest_file::<Sha512>(path, filters),
        HashAlgorithm::Sha3_256 => digest_file::<Sha3_256>(path, filters),
        HashAlgorithm::Sha3_512 => digest_file::<Sha3_512>(path, filters),
        HashAlgorithm::Blake2s256 => digest_file::<Blake2s256>(path, filters),
        HashAlgorithm::Blake2b512 => digest_file::<Blake2b512>(path, filters),
    }
}

fn digest_file<D: Digest>(path: &str, filters: &FilterSet) -> Result<String> {
    let unavailable = |source| MonitorError::FileUnavailable {
        path: Path::new(path).to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unavailable)?;
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();
    let mut line = Vec::new();
    let mut number: u64 = 0;
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).map_err(unavailable)?;
        if read == 0 {
            break;
        }
        number += 1;
        if filters.excludes(path, number) {
            continue;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        hasher.update(&line);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Stable 16-hex-char identifier for a monitored path, used as the baseline
/// and incident key.
pub fn file_code(path: &str) -> String {
    let digest = blake3::hash(path.as_bytes());
    hex::encode(&digest.as_bytes()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Filter, LineFilter};
    use std::fs;
    use tempfile::tempdir;

    const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sha3_256,
        HashAlgorithm::Sha3_512,
        HashAlgorithm::Blake2s256,
        HashAlgorithm::Blake2b512,
    ];

    #[test]
    fn algorithm_table() {
        assert_eq!(HashAlgorithm::from_config("sha", 256).unwrap(), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_config("sha3", 512).unwrap(), HashAlgorithm::Sha3_512);
        assert_eq!(
            HashAlgorithm::from_config("blake2s", 512).unwrap(),
            HashAlgorithm::Blake2b512
        );
        assert!(HashAlgorithm::from_config("sha", 384).is_err());
        assert!(HashAlgorithm::from_config("md5", 256).is_err());
    }

    #[test]
    fn known_sha256_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, "abc").unwrap();
        // "abc\n"
        assert_eq!(
            compute_hash(path.to_str().unwrap(), HashAlgorithm::Sha256, &FilterSet::new()).unwrap(),
            "edeaaff3f1774ad2888673770c6d64097e391bc362d7d6fb34982ddf0efd18cb"
        );
    }

    #[test]
    fn output_lengths_match_variant() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "one\ntwo\n").unwrap();
        let p = path.to_str().unwrap();
        let mut seen = std::collections::HashSet::new();
        for algo in ALL {
            let hash = compute_hash(p, algo, &FilterSet::new()).unwrap();
            assert_eq!(hash.len(), algo.output_len() * 2, "{algo}");
            assert!(hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
            seen.insert(hash);
        }
        assert_eq!(seen.len(), ALL.len());
    }

    #[test]
    fn trailing_newline_is_normalised() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "x\ny").unwrap();
        fs::write(&b, "x\ny\n").unwrap();
        let none = FilterSet::new();
        assert_eq!(
            compute_hash(a.to_str().unwrap(), HashAlgorithm::Sha256, &none).unwrap(),
            compute_hash(b.to_str().unwrap(), HashAlgorithm::Sha256, &none).unwrap()
        );
    }

    #[test]
    fn excluded_lines_do_not_affect_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status");
        let p = path.to_str().unwrap().to_string();
        let mut filters = FilterSet::new();
        filters.add(p.clone(), Filter::Lines(LineFilter::parse("2").unwrap()));

        fs::write(&path, "stable\nuptime=1\nstable too\n").unwrap();
        let first = compute_hash(&p, HashAlgorithm::Sha3_256, &filters).unwrap();
        fs::write(&path, "stable\nuptime=99999\nstable too\n").unwrap();
        let second = compute_hash(&p, HashAlgorithm::Sha3_256, &filters).unwrap();
        assert_eq!(first, second);

        fs::write(&path, "stable\nuptime=1\nchanged\n").unwrap();
        let third = compute_hash(&p, HashAlgorithm::Sha3_256, &filters).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn excluded_line_equals_file_without_it() {
        let dir = tempdir().unwrap();
        let full = dir.path().join("full");
        let short = dir.path().join("short");
        fs::write(&full, "a\nb\nc\n").unwrap();
        fs::write(&short, "a\nc\n").unwrap();
        let full = full.to_str().unwrap();

        let mut filters = FilterSet::new();
        filters.add(full, Filter::Lines(LineFilter::parse("2").unwrap()));
        for algo in ALL {
            assert_eq!(
                compute_hash(full, algo, &filters).unwrap(),
                compute_hash(short.to_str().unwrap(), algo, &FilterSet::new()).unwrap(),
                "{algo}"
            );
        }
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = compute_hash("/definitely/not/here", HashAlgorithm::Sha256, &FilterSet::new())
            .unwrap_err();
        assert!(matches!(err, MonitorError::FileUnavailable { .. }));
    }

    #[test]
    fn file_code_is_stable_and_short() {
        let code = file_code("/etc/passwd");
        assert_eq!(code.len(), 16);
        assert_eq!(code, file_code("/etc/passwd"));
        assert_ne!(code, file_code("/etc/shadow"));
    }
}
