use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use lembrete_core::EngineConfig;

use crate::state::{default_tasks_path, ensure_lembrete_home};
use crate::store_file::write_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub notifications: NotificationsSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Overdue sweep period.
    pub sweep_interval_secs: u64,
    /// How often the daemon checks the task file for other writers.
    pub file_poll_secs: u64,
    /// How long an armed due timer may lag before the sweep takes over.
    pub overdue_grace_secs: u64,
    /// Timer resource limit; arming beyond it is logged and skipped.
    pub max_armed_timers: usize,
    pub default_snooze_minutes: i64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            file_poll_secs: 2,
            overdue_grace_secs: 60,
            max_armed_timers: 4096,
            default_snooze_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub system_toast: bool,
    pub console_popup: bool,
    pub due_timeout_secs: u64,
    pub lead_timeout_secs: u64,
    pub app_name: String,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            system_toast: true,
            console_popup: true,
            due_timeout_secs: 15,
            lead_timeout_secs: 10,
            app_name: "Lembrete".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Defaults to `<home>/tasks.json`.
    pub tasks_file: Option<PathBuf>,
}

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        let grace = i64::try_from(self.engine.overdue_grace_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        EngineConfig::default().with_overdue_grace(grace)
    }

    pub fn default_snooze(&self) -> Result<chrono::Duration> {
        let minutes = self.engine.default_snooze_minutes;
        chrono::Duration::try_minutes(minutes)
            .ok_or_else(|| anyhow!("[engine].default_snooze_minutes = {minutes} is out of range"))
    }

    pub fn tasks_path(&self) -> Result<PathBuf> {
        match &self.storage.tasks_file {
            Some(p) => Ok(p.clone()),
            None => default_tasks_path(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_lembrete_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    parse_config(&s).with_context(|| format!("parse {}", p.display()))
}

fn parse_config(s: &str) -> Result<Config> {
    Ok(toml::from_str(s)?)
}

pub fn save_config(cfg: &Config) -> Result<()> {
    write_config(&config_path()?, cfg)
}

fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    write_atomic(path, s.as_bytes())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}

pub fn show_config() -> Result<()> {
    let cfg = load_config()?;
    println!("# {}", config_path()?.display());
    println!("# tasks file: {}\n", cfg.tasks_path()?.display());
    print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
    Ok(())
}
