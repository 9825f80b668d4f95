use crate::error::{Error, Result};
use directories::ProjectDirs;
use std::{env, fs, path::PathBuf};

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "Tabletalk", "Tabletalk")
        .ok_or_else(|| Error::Config("platform project directories unavailable".into()))
}

pub fn default_sessions_root() -> Result<PathBuf> {
    // Environment override first, mainly for tests and portable installs.
    if let Ok(custom) = env::var("TABLETALK_SESSIONS_DIR") {
        let root = PathBuf::from(custom);
        fs::create_dir_all(&root)?;
        return Ok(root);
    }
    let pd = app_dirs()?;
    let root = pd.data_dir().join("sessions");
    fs::create_dir_all(&root)?;
    Ok(root)
}
