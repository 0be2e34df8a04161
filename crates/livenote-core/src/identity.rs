//! Installation identity
//!
//! Every installation gets one opaque user id, generated on first run and
//! persisted in the data directory. The id is only used to tag note owners
//! and lock holders; it carries no authentication.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::models::UserId;

/// Source of the local user's identity
pub trait IdentityProvider {
    /// Stable identifier of the local user
    fn user_id(&self) -> UserId;
}

/// A fixed identity, e.g. one issued by an embedding application
impl IdentityProvider for UserId {
    fn user_id(&self) -> UserId {
        self.clone()
    }
}

/// File-backed installation identity
#[derive(Debug, Clone)]
pub struct Identity {
    user_id: UserId,
    is_new: bool,
}

impl Identity {
    /// Load the persisted user id, creating and saving one on first run
    pub fn load_or_create(config: &Config) -> Result<Self> {
        let path = config.user_id_path();

        if let Some(user_id) = read_user_id(&path)? {
            return Ok(Self {
                user_id,
                is_new: false,
            });
        }

        let user_id = UserId::new(Uuid::new_v4().to_string());
        atomic_write(&path, user_id.as_str().as_bytes())
            .with_context(|| format!("Failed to save user id to {:?}", path))?;
        info!("Created new installation identity {}", user_id);

        Ok(Self {
            user_id,
            is_new: true,
        })
    }

    /// Whether this run generated the identity
    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

impl IdentityProvider for Identity {
    fn user_id(&self) -> UserId {
        self.user_id.clone()
    }
}

/// Read the stored id; a missing or blank file means "not created yet"
fn read_user_id(path: &Path) -> Result<Option<UserId>> {
    if !path.exists() {
        return Ok(None);
    }

    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read user id from {:?}", path))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(UserId::new(trimmed)))
}

/// Write to a temp file and rename it into place
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(data)
        .with_context(|| format!("Failed to write to temp file {:?}", temp_path))?;

    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {:?}", temp_path))?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}
