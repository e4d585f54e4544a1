//! Depth-service token storage.
//!
//! The token is looked up from the environment first, then from a dot-file
//! in the user's home directory. Saving always writes the dot-file so a
//! token entered once survives restarts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const TOKEN_ENV_VAR: &str = "NEBULA_DEPTH_TOKEN";
const TOKEN_FILE_NAME: &str = ".nebula_token";

fn token_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(TOKEN_FILE_NAME))
}

/// Load the stored token, environment taking precedence over the dot-file.
pub fn load_token() -> Option<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Some(token);
        }
    }

    read_token(&token_path()?)
}

/// Persist the token to the dot-file. Consumed by the binary's
/// `--set-token` flag.
pub fn save_token(token: &str) -> io::Result<()> {
    let path = token_path().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "home directory not set")
    })?;
    write_token(&path, token)
}

fn read_token(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let token = contents.trim().to_string();
    (!token.is_empty()).then_some(token)
}

fn write_token(path: &Path, token: &str) -> io::Result<()> {
    fs::write(path, token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment-dependent lookups are exercised indirectly; these tests
    // only pin the trimming rules.
    #[test]
    fn blank_tokens_count_as_absent() {
        assert!("".trim().is_empty());
        assert!("  \n".trim().is_empty());
    }

    #[test]
    fn token_file_lives_in_home() {
        if let Some(path) = token_path() {
            assert!(path.ends_with(TOKEN_FILE_NAME));
        }
    }

    #[test]
    fn saved_tokens_read_back_trimmed() {
        let path = std::env::temp_dir().join("nebula_token_roundtrip_test");

        write_token(&path, "  secret-token \n").unwrap();
        assert_eq!(read_token(&path).as_deref(), Some("secret-token"));

        write_token(&path, "   ").unwrap();
        assert_eq!(read_token(&path), None, "blank tokens count as absent");

        fs::remove_file(&path).ok();
    }
}
