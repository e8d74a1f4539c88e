//! Teacher roster: which subject each teacher login takes attendance for.
//!
//! Loaded from a TOML file at startup:
//!
//! ```toml
//! [[subject]]
//! code = "DSA"
//! name = "Data Structures"
//!
//! [[teacher]]
//! username = "dsa"
//! subject_code = "DSA"
//! ```

use crate::config::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// A subject to create (or rename) in the catalogue at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubjectSeed {
    pub code: String,
    pub name: String,
}

/// A teacher login bound to one subject.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TeacherAssignment {
    pub username: String,
    pub subject_code: String,
}

#[derive(Debug, Default, Deserialize)]
struct RosterFile {
    #[serde(default, rename = "subject")]
    subjects: Vec<SubjectSeed>,
    #[serde(default, rename = "teacher")]
    teachers: Vec<TeacherAssignment>,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub subjects: Vec<SubjectSeed>,
    teachers: HashMap<String, String>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RosterRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::RosterParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        let file: RosterFile = toml::from_str(raw)?;
        let mut teachers = HashMap::new();
        for t in file.teachers {
            let username = t.username.trim().to_ascii_lowercase();
            if let Some(prev) = teachers.insert(username.clone(), t.subject_code.trim().to_string()) {
                tracing::warn!(username = %username, previous = %prev, "duplicate teacher in roster; last entry wins");
            }
        }
        Ok(Self {
            subjects: file.subjects,
            teachers,
        })
    }

    /// Subject code for a teacher login. Usernames are case-insensitive.
    pub fn subject_for(&self, username: &str) -> Option<&str> {
        self.teachers
            .get(&username.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn teacher_count(&self) -> usize {
        self.teachers.len()
    }

    /// Every (username, subject code) pair, sorted by username.
    pub fn assignments(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self
            .teachers
            .iter()
            .map(|(u, s)| (u.as_str(), s.as_str()))
            .collect();
        pairs.sort();
        pairs
    }
}
