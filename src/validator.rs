//! Pre-flight validation collaborators.
//!
//! WPK signature verification and SHA1 precomputation are out of scope for the dispatcher core
//! (§1) — the real upgrade API supplies a validator that checks a cryptographic signature over the
//! whole package. What ships here is the seam (`WpkValidator`/`CustomValidator`) plus a minimal
//! standalone implementation that checks file existence and the SHA1 the request already carries,
//! so the binary is runnable without the external signing service wired in.

use sha1::{Digest, Sha1};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::ValidationError;
use crate::protocol::wpk;

/// Verifies a Standard WPK before any connection is opened.
pub trait WpkValidator: Send + Sync {
    fn validate(
        &self,
        repository_path: &str,
        wpk_file: &str,
        expected_sha1: &str,
    ) -> Result<(), ValidationError>;
}

/// Verifies a Custom upgrade's file exists.
pub trait CustomValidator: Send + Sync {
    fn validate(&self, file_path: &str) -> Result<(), ValidationError>;
}

/// Checks the WPK exists in the repository and its SHA1 matches the request's `wpk_sha1`.
///
/// Real signature verification is an external concern; this stands in for it so the pipeline is
/// exercisable end to end.
pub struct Sha1WpkValidator;

impl WpkValidator for Sha1WpkValidator {
    fn validate(
        &self,
        repository_path: &str,
        wpk_file: &str,
        expected_sha1: &str,
    ) -> Result<(), ValidationError> {
        let path = wpk::local_path(repository_path, wpk_file);
        if !path.exists() {
            return Err(ValidationError::WpkFileDoesNotExist(
                path.display().to_string(),
            ));
        }

        let actual = sha1_hex(&path)?;
        if actual.eq_ignore_ascii_case(expected_sha1) {
            Ok(())
        } else {
            Err(ValidationError::WpkSha1DoesNotMatch)
        }
    }
}

/// Checks the custom upgrade's file exists at `file_path`.
pub struct FileExistsCustomValidator;

impl CustomValidator for FileExistsCustomValidator {
    fn validate(&self, file_path: &str) -> Result<(), ValidationError> {
        if Path::new(file_path).is_file() {
            Ok(())
        } else {
            Err(ValidationError::WpkFileDoesNotExist(file_path.to_string()))
        }
    }
}

/// Computes the lowercase hex SHA1 of a file on disk, used both by [`Sha1WpkValidator`] and to
/// derive the expected digest for a Custom upgrade (§4.5).
pub fn sha1_hex(path: &Path) -> Result<String, ValidationError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
