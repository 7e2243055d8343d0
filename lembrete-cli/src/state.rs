use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

/// `$LEMBRETE_HOME`, falling back to `~/.lembrete`.
pub fn lembrete_home() -> Result<PathBuf> {
    home_from(std::env::var_os("LEMBRETE_HOME"), std::env::var_os("HOME"))
}

fn home_from(override_dir: Option<OsString>, home: Option<OsString>) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    match home.filter(|h| !h.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(".lembrete")),
        None => bail!("HOME is not set (or set LEMBRETE_HOME)"),
    }
}

pub fn ensure_lembrete_home() -> Result<PathBuf> {
    let dir = lembrete_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn default_tasks_path() -> Result<PathBuf> {
    Ok(ensure_lembrete_home()?.join("tasks.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_home() {
        let p = home_from(Some("/tmp/lem".into()), Some("/home/ana".into())).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/lem"));
    }

    #[test]
    fn falls_back_to_dot_dir() {
        let p = home_from(Some("".into()), Some("/home/ana".into())).unwrap();
        assert_eq!(p, PathBuf::from("/home/ana/.lembrete"));
        assert!(home_from(None, None).is_err());
    }
}
