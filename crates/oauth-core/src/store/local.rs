//! Tier 2: filesystem-backed token storage under a per-user secrets
//! directory (spec §4.2). Directories are created `0700`, files `0600`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::call::CallContext;
use crate::error::OAuthResult;
use crate::types::{StorageTier, TokenData, TokenKey};

use super::Tier;

/// Filesystem tier. One JSON file per `(server, user)` under `root`.
pub struct LocalSecretsDir {
    root: PathBuf,
}

impl LocalSecretsDir {
    /// Use `root` as the secrets directory, creating it with `0700` on
    /// first write if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, server_name: &str, user_id: &str) -> PathBuf {
        let key = TokenKey::new(server_name, user_id);
        self.root.join(key.file_name())
    }

    async fn ensure_root(&self) -> OAuthResult<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).await?;
            #[cfg(unix)]
            set_mode(&self.root, 0o700).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> OAuthResult<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> OAuthResult<()> {
    Ok(())
}

#[async_trait]
impl Tier for LocalSecretsDir {
    fn tier(&self) -> StorageTier {
        StorageTier::LocalSecretsDir
    }

    async fn store(&self, token: &TokenData, ctx: &CallContext) -> OAuthResult<()> {
        ctx.check_cancelled()?;
        self.ensure_root().await?;
        let path = self.path_for(&token.server_name, &token.user_id);
        let bytes = serde_json::to_vec_pretty(token)?;
        fs::write(&path, bytes).await?;
        set_mode(&path, 0o600).await?;
        Ok(())
    }

    async fn get(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<Option<TokenData>> {
        ctx.check_cancelled()?;
        let path = self.path_for(server_name, user_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, server_name: &str, user_id: &str, ctx: &CallContext) -> OAuthResult<bool> {
        ctx.check_cancelled()?;
        let path = self.path_for(server_name, user_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, user_id: &str, ctx: &CallContext) -> OAuthResult<Vec<TokenData>> {
        ctx.check_cancelled()?;
        let mut out = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return Ok(out);
        };
        let suffix = format!("-{user_id}.json");
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(&suffix) {
                continue;
            }
            if let Ok(bytes) = fs::read(entry.path()).await {
                if let Ok(token) = serde_json::from_slice::<TokenData>(&bytes) {
                    out.push(token);
                }
            }
        }
        Ok(out)
    }

    async fn health(&self, _ctx: &CallContext) -> bool {
        self.ensure_root().await.is_ok()
    }

    async fn sweep_expired(&self, now: chrono::DateTime<chrono::Utc>, ctx: &CallContext) -> OAuthResult<u64> {
        ctx.check_cancelled()?;
        let mut removed = 0u64;
        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return Ok(0);
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(bytes) = fs::read(&path).await else { continue };
            let Ok(token) = serde_json::from_slice::<TokenData>(&bytes) else { continue };
            if token.expires_at < now {
                if fs::remove_file(&path).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
