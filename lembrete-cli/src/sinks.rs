//! Notification sink variants and startup composition.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, info, warn};

use lembrete_core::{NotificationIntent, NotificationSink, NullSink};

use crate::config::NotificationsSection;

#[derive(Debug, Clone)]
enum ToastBackend {
    /// freedesktop `notify-send`
    NotifySend(PathBuf),
    /// macOS `osascript -e 'display notification ...'`
    Osascript(PathBuf),
}

/// OS toast via an external helper. The helper is spawned and reaped on a
/// side thread; emit never waits for it.
#[derive(Debug, Clone)]
pub struct SystemToastSink {
    backend: ToastBackend,
    app_name: String,
    due_timeout_secs: u64,
    lead_timeout_secs: u64,
}

impl SystemToastSink {
    /// `None` when no supported helper is on PATH.
    pub fn detect(cfg: &NotificationsSection) -> Option<Self> {
        let backend = if cfg!(target_os = "macos") {
            which::which("osascript").ok().map(ToastBackend::Osascript)
        } else {
            which::which("notify-send").ok().map(ToastBackend::NotifySend)
        }?;

        Some(Self {
            backend,
            app_name: cfg.app_name.clone(),
            due_timeout_secs: cfg.due_timeout_secs,
            lead_timeout_secs: cfg.lead_timeout_secs,
        })
    }

    fn command(&self, intent: &NotificationIntent) -> Command {
        let timeout = if intent.is_due() {
            self.due_timeout_secs
        } else {
            self.lead_timeout_secs
        };

        match &self.backend {
            ToastBackend::NotifySend(bin) => {
                let mut cmd = Command::new(bin);
                cmd.arg("-a")
                    .arg(&self.app_name)
                    .arg("-t")
                    .arg(timeout.saturating_mul(1000).to_string());
                if intent.is_due() {
                    cmd.args(["-u", "critical"]);
                }
                cmd.arg(intent.title()).arg(intent.body());
                cmd
            }
            ToastBackend::Osascript(bin) => {
                let script = format!(
                    r#"display notification "{}" with title "{}" subtitle "{}""#,
                    escape_applescript(&intent.body()),
                    escape_applescript(&self.app_name),
                    escape_applescript(&intent.title()),
                );
                let mut cmd = Command::new(bin);
                cmd.arg("-e").arg(script);
                cmd
            }
        }
    }
}

impl NotificationSink for SystemToastSink {
    fn emit(&self, intent: &NotificationIntent) {
        let mut cmd = self.command(intent);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

        match cmd.spawn() {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => warn!(task_id = %intent.task.id, error = %e, "toast helper failed to start"),
        }
    }
}

fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// In-process pop-up: a framed block on stdout, next to the daemon's prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePopupSink;

impl ConsolePopupSink {
    pub fn render(intent: &NotificationIntent) -> String {
        let title = intent.title();
        let body = intent.body();
        let width = std::iter::once(title.chars().count())
            .chain(body.lines().map(|l| l.chars().count()))
            .max()
            .unwrap_or(0)
            + 2;

        let rule = "=".repeat(width);
        let mut out = format!("\n+{rule}+\n| {title:<w$} |\n+{rule}+\n", w = width - 2);
        for line in body.lines() {
            out.push_str(&format!("| {line:<w$} |\n", w = width - 2));
        }
        out.push_str(&format!("+{rule}+\n"));
        if intent.is_due() {
            out.push_str(&format!(
                "  (done {id} | snooze {id} [--minutes N])\n",
                id = intent.task.id
            ));
        }
        out
    }
}

impl NotificationSink for ConsolePopupSink {
    fn emit(&self, intent: &NotificationIntent) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout
            .write_all(Self::render(intent).as_bytes())
            .and_then(|_| stdout.flush())
        {
            debug!(error = %e, "console popup write failed");
        }
    }
}

/// Emits every intent to each inner sink, in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn emit(&self, intent: &NotificationIntent) {
        for sink in &self.sinks {
            sink.emit(intent);
        }
    }
}

/// Pick sink variants from config and what the host provides.
pub fn build_sink(cfg: &NotificationsSection) -> Arc<dyn NotificationSink> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();

    if cfg.system_toast {
        match SystemToastSink::detect(cfg) {
            Some(toast) => {
                info!(backend = ?toast.backend, "system toasts enabled");
                sinks.push(Arc::new(toast));
            }
            None => warn!("no notify-send/osascript on PATH; system toasts disabled"),
        }
    }
    if cfg.console_popup {
        sinks.push(Arc::new(ConsolePopupSink));
    }

    match sinks.len() {
        0 => Arc::new(NullSink),
        1 => sinks.remove(0),
        _ => Arc::new(FanoutSink::new(sinks)),
    }
}
