//! Sender allow-list.
//!
//! One Telegram username per line, `#` starts a comment line, blank lines
//! are ignored. Matching is case-insensitive and a leading `@` is optional.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

pub const ALLOWLIST_FILE: &str = "allowed_users.txt";

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: HashSet<String>,
}

impl AllowList {
    pub fn parse(contents: &str) -> Self {
        let users = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(normalize)
            .collect();
        Self { users }
    }

    /// Load from `path`. A missing file yields an empty list (everyone is
    /// refused) and a warning.
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let list = Self::parse(&contents);
                if list.is_empty() {
                    tracing::warn!(path = %path.display(), "allow-list is empty, all senders will be refused");
                } else {
                    tracing::info!(path = %path.display(), users = list.len(), "allow-list loaded");
                }
                Ok(list)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "allow-list not found, all senders will be refused");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_allowed(&self, username: Option<&str>) -> bool {
        username.is_some_and(|u| self.users.contains(&normalize(u)))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn normalize(username: &str) -> String {
    username.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse() {
        let list = AllowList::parse("# friends\njweber\n\n  @Lena_K  \n#nobody\n");
        assert_eq!(list.len(), 2);
        assert!(list.is_allowed(Some("jweber")));
        assert!(list.is_allowed(Some("JWeber")));
        assert!(list.is_allowed(Some("lena_k")));
        assert!(!list.is_allowed(Some("nobody")));
        assert!(!list.is_allowed(None));
    }

    #[test]
    fn test_missing_file_refuses_everyone() {
        let dir = TempDir::new().unwrap();
        let list = AllowList::load(&dir.path().join(ALLOWLIST_FILE)).unwrap();
        assert!(list.is_empty());
        assert!(!list.is_allowed(Some("jweber")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(ALLOWLIST_FILE);
        std::fs::write(&path, "jweber\n").unwrap();
        assert!(AllowList::load(&path).unwrap().is_allowed(Some("jweber")));
    }
}
