//! Session keys and mount targets.
//!
//! A session key identifies one logical shell session. It is derived from a
//! project and an optional session identifier, and remembers its project so
//! that every session of a project can be purged at once.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A project whose directory hosts the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub name: String,
    /// Project directory.
    pub path: String,
    /// Absolute project directory, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
}

impl Project {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            full_path: None,
        }
    }

    /// The directory the remote shell should start in.
    pub fn working_dir(&self) -> &str {
        self.full_path.as_deref().unwrap_or(&self.path)
    }
}

/// What a controller is mounted on: a project and an optional session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTarget {
    pub project: Project,
    pub session: Option<String>,
}

impl MountTarget {
    pub fn new(project: Project, session: Option<String>) -> Self {
        // An empty session identifier means "no session".
        let session = session.filter(|s| !s.is_empty());
        Self { project, session }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.project.name, self.session.as_deref())
    }
}

/// Registry key for one logical session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    project: String,
    session: Option<String>,
}

impl SessionKey {
    pub fn new(project: &str, session: Option<&str>) -> Self {
        Self {
            project: project.to_string(),
            session: session.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// The project this key belongs to.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The session identifier, if one was supplied.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Whether this key is associated with `project`.
    pub fn belongs_to(&self, project: &str) -> bool {
        self.project == project
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => write!(f, "{}:{}", self.project, session),
            None => write!(f, "project:{}", self.project),
        }
    }
}
