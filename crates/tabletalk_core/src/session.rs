use crate::error::Result;
use crate::util::default_sessions_root;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use uuid::Uuid;

/// One question/snippet/answer/explanation unit. Immutable once appended;
/// a failed stage leaves its field `None` and fills `error` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub question: String,
    pub snippet: Option<String>,
    pub answer_text: Option<String>,
    pub explanation: Option<String>,
    pub error: Option<String>,
    pub ts_utc: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            snippet: None,
            answer_text: None,
            explanation: None,
            error: None,
            ts_utc: Utc::now(),
        }
    }

    /// What the history shows for this turn: the explanation when the turn
    /// completed, the error message otherwise.
    pub fn message(&self) -> &str {
        self.error
            .as_deref()
            .or(self.explanation.as_deref())
            .unwrap_or("(no output)")
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub dir: PathBuf,
}

/// Append-only ordered turn history, most-recent-last. When persistent, each
/// appended turn is also written as a JSON record under the session dir.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    dir: Option<PathBuf>,
    turns: Vec<Turn>,
}

impl Session {
    pub fn in_memory() -> Self {
        Self { id: Uuid::new_v4().to_string(), dir: None, turns: Vec::new() }
    }

    pub fn create(base: Option<&Path>) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let root = match base {
            Some(b) => b.to_path_buf(),
            None => default_sessions_root()?,
        };
        let dir = root.join(&id);
        fs::create_dir_all(&dir)?;
        Ok(Self { id, dir: Some(dir), turns: Vec::new() })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if let Some(dir) = &self.dir {
            let seq = self.turns.len() + 1;
            let file = dir.join(format!("{seq:04}-{}.json", &turn.id[..8]));
            fs::write(file, serde_json::to_vec_pretty(&turn)?)?;
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Empties the visible history. Persisted records are a log and stay.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Persisted sessions, newest first.
pub fn list_sessions(limit: usize) -> Result<Vec<SessionInfo>> {
    let root = default_sessions_root()?;
    let mut sessions = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            sessions.push(SessionInfo {
                id: entry.file_name().to_string_lossy().to_string(),
                dir: entry.path(),
            });
        }
    }
    sessions.sort_by(|a, b| {
        let ma = fs::metadata(&a.dir).and_then(|m| m.modified()).ok();
        let mb = fs::metadata(&b.dir).and_then(|m| m.modified()).ok();
        mb.cmp(&ma)
    });
    if sessions.len() > limit {
        sessions.truncate(limit);
    }
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_clear() {
        let mut s = Session::in_memory();
        for i in 0..5 {
            s.append(Turn::new(format!("q{i}"))).unwrap();
        }
        assert_eq!(s.len(), 5);
        assert_eq!(s.last().unwrap().question, "q4");
        s.clear();
        assert!(s.is_empty());
        assert!(s.last().is_none());
    }

    #[test]
    fn clear_on_empty_history_is_fine() {
        let mut s = Session::in_memory();
        s.clear();
        assert!(s.is_empty());
    }

    #[test]
    fn persistent_session_writes_turn_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::create(Some(dir.path())).unwrap();
        let mut t = Turn::new("how many rows?");
        t.answer_text = Some("4".into());
        s.append(t).unwrap();
        let session_dir = s.dir().unwrap();
        let files: Vec<_> = fs::read_dir(session_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let content = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        let back: Turn = serde_json::from_str(&content).unwrap();
        assert_eq!(back.question, "how many rows?");
    }

    #[test]
    fn turn_message_prefers_error() {
        let mut t = Turn::new("q");
        t.explanation = Some("fine".into());
        assert_eq!(t.message(), "fine");
        t.error = Some("boom".into());
        assert_eq!(t.message(), "boom");
    }
}
