use sha1::{Digest, Sha1};
use sha2::Sha256;
use tracing::debug;

/// The checksum algorithms for which repository sidecar files are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Md5,
}

pub const ALGORITHMS: [Algorithm; 3] = [Algorithm::Sha1, Algorithm::Sha256, Algorithm::Md5];

impl Algorithm {
    /// The file name suffix of this algorithm's sidecar, e.g. `a.jar.sha1`.
    pub fn suffix(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Md5 => "md5",
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Algorithm::Sha1 => Sha1::digest(data).to_vec(),
            Algorithm::Sha256 => Sha256::digest(data).to_vec(),
            Algorithm::Md5 => md5::compute(data).0.to_vec(),
        }
    }
}

/// All supported digests of one artifact, computed in a single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
    pub md5: [u8; 16],
}

impl Digests {
    pub fn of(data: &[u8]) -> Digests {
        Digests {
            sha1: Sha1::digest(data).into(),
            sha256: Sha256::digest(data).into(),
            md5: md5::compute(data).0,
        }
    }

    pub fn get(&self, algorithm: Algorithm) -> &[u8] {
        match algorithm {
            Algorithm::Sha1 => &self.sha1,
            Algorithm::Sha256 => &self.sha256,
            Algorithm::Md5 => &self.md5,
        }
    }

    /// The content of the sidecar file for `algorithm`, lower case hex.
    pub fn sidecar(&self, algorithm: Algorithm) -> String {
        hex::encode(self.get(algorithm))
    }
}

/// Extracts the digest from a sidecar document. Some repositories append the
/// file name behind the hex digest, only the first whitespace separated token
/// counts.
pub fn parse_sidecar(document: &str) -> Option<Vec<u8>> {
    let token = document.split_whitespace().next()?;
    hex::decode(token).ok()
}

/// Byte-exact comparison for merge deduplication. Not constant time, this
/// is not a security boundary.
pub fn content_equals(a: &[u8], b: &[u8]) -> bool {
    a == b
}

/// Checks `data` against the sidecar document published next to it. A
/// mismatch means the artifact must be treated as absent from the repository
/// it came from.
pub fn verify(data: &[u8], algorithm: Algorithm, sidecar: &str) -> bool {
    match parse_sidecar(sidecar) {
        Some(expected) => {
            let actual = algorithm.digest(data);
            if actual != expected {
                debug!(
                    "{} mismatch: expected {}, actual {}",
                    algorithm.suffix(),
                    hex::encode(&expected),
                    hex::encode(&actual)
                );
                false
            } else {
                true
            }
        }
        None => {
            debug!("unparseable {} sidecar", algorithm.suffix());
            false
        }
    }
}
