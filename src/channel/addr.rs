//! Channel identities
//!
//! A channel is named either by a short name carrying the reserved `/`
//! marker, or by an existing filesystem path plus a positive project id.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Reserved first character of a named channel
pub const NAME_MARKER: char = '/';

/// Longest accepted channel name, marker included
pub const MAX_NAME_LEN: usize = 32;

/// Identity of a message channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddr {
    /// `/name` style identity
    Named(String),
    /// Filesystem path plus discriminator
    Keyed { path: PathBuf, project_id: i32 },
}

impl ChannelAddr {
    /// Build a named identity, validating the name
    pub fn named(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(ChannelAddr::Named(name))
    }

    /// Build a keyed identity; the project id must be positive
    pub fn keyed(path: impl Into<PathBuf>, project_id: i32) -> Result<Self> {
        if project_id <= 0 {
            return Err(Error::InvalidArgument(format!(
                "Incorrect project id {}. It should be > 0",
                project_id
            )));
        }
        Ok(ChannelAddr::Keyed {
            path: path.into(),
            project_id,
        })
    }

    /// Interpret the positional command-line arguments
    ///
    /// One argument is a channel name; two are a path and a project id.
    pub fn from_args(target: &str, project_id: Option<&str>) -> Result<Self> {
        match project_id {
            Some(raw) => {
                let id: i32 = raw.trim().parse().map_err(|_| {
                    Error::InvalidArgument(format!(
                        "Project id must be a positive integer, got '{}'",
                        raw
                    ))
                })?;
                Self::keyed(target, id)
            }
            None => Self::named(target),
        }
    }

    /// Default reply channel for a worker process
    pub fn for_worker(pid: u32) -> Self {
        ChannelAddr::Named(format!("{}worker{}", NAME_MARKER, pid))
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddr::Named(name) => f.write_str(name),
            ChannelAddr::Keyed { path, project_id } => {
                write!(f, "{}#{}", path.display(), project_id)
            }
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if !name.starts_with(NAME_MARKER) {
        return Err(Error::InvalidArgument(format!(
            "Channel name '{}' must start with {}",
            name, NAME_MARKER
        )));
    }
    if name.len() < 2 || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "Channel name must be longer than 1 and at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if name[1..].contains(NAME_MARKER) {
        return Err(Error::InvalidArgument(format!(
            "Channel name must not contain {} except as the first character",
            NAME_MARKER
        )));
    }
    Ok(())
}
