use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::EnvSnapshot;

const TOKEN_USERNAME: &str = "__token__";

/// Means of authenticating the upload.
///
/// Secrets are never rendered through `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token { source: String, token: String },
    Password {
        source: String,
        username: String,
        password: String,
    },
    ConfigFile { path: PathBuf },
}

impl Credential {
    /// Resolves the credential with the configured token variable first, then
    /// `TWINE_API_TOKEN`, then `TWINE_PASSWORD`, then a `.pypirc` holding a
    /// password.
    #[must_use]
    pub fn resolve(env: &EnvSnapshot, token_env: &str, pypirc: Option<&Path>) -> Option<Self> {
        for key in [token_env, "TWINE_API_TOKEN"] {
            if let Some(token) = env.non_empty(key) {
                return Some(Self::Token {
                    source: key.to_string(),
                    token: token.to_string(),
                });
            }
        }
        if let Some(password) = env.non_empty("TWINE_PASSWORD") {
            return Some(Self::Password {
                source: "TWINE_PASSWORD".to_string(),
                username: env
                    .non_empty("TWINE_USERNAME")
                    .unwrap_or(TOKEN_USERNAME)
                    .to_string(),
                password: password.to_string(),
            });
        }
        pypirc
            .filter(|path| pypirc_has_password(path))
            .map(|path| Self::ConfigFile {
                path: path.to_path_buf(),
            })
    }

    /// Where the credential came from, safe to log.
    #[must_use]
    pub fn source(&self) -> String {
        match self {
            Self::Token { source, .. } | Self::Password { source, .. } => source.clone(),
            Self::ConfigFile { path } => path.display().to_string(),
        }
    }

    /// Environment handed to the upload tool.
    ///
    /// A config-file credential clears any stray `TWINE_*` values so the file
    /// is authoritative.
    #[must_use]
    pub fn upload_env(&self) -> Vec<(String, String)> {
        let (username, password) = match self {
            Self::Token { token, .. } => (TOKEN_USERNAME.to_string(), token.clone()),
            Self::Password {
                username, password, ..
            } => (username.clone(), password.clone()),
            Self::ConfigFile { .. } => (String::new(), String::new()),
        };
        vec![
            ("TWINE_USERNAME".to_string(), username),
            ("TWINE_PASSWORD".to_string(), password),
        ]
    }

    #[must_use]
    pub fn upload_args(&self) -> Vec<String> {
        match self {
            Self::ConfigFile { path } => {
                vec!["--config-file".to_string(), path.display().to_string()]
            }
            Self::Token { .. } | Self::Password { .. } => Vec::new(),
        }
    }

    /// Masks the secret wherever it appears in tool output.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let secret = match self {
            Self::Token { token, .. } => token.as_str(),
            Self::Password { password, .. } => password.as_str(),
            Self::ConfigFile { .. } => "",
        };
        if secret.is_empty() {
            text.to_string()
        } else {
            text.replace(secret, "***")
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token { source, .. } => f
                .debug_struct("Token")
                .field("source", source)
                .finish_non_exhaustive(),
            Self::Password {
                source, username, ..
            } => f
                .debug_struct("Password")
                .field("source", source)
                .field("username", username)
                .finish_non_exhaustive(),
            Self::ConfigFile { path } => f.debug_struct("ConfigFile").field("path", path).finish(),
        }
    }
}

fn pypirc_has_password(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };
    let mut in_section = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_section = line != "[distutils]";
            continue;
        }
        if !in_section || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some((key, value)) = line.split_once(['=', ':']) {
            if key.trim().eq_ignore_ascii_case("password") && !value.trim().is_empty() {
                return true;
            }
        }
    }
    false
}
