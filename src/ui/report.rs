use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::orchestrator::health::HealthStatus;
use crate::orchestrator::supervisor::{StopOutcome, StopState};

/// Final per-service status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Timeout,
    Failed,
    Blocked,
    Cancelled,
    /// Pid-file present but the process is gone.
    Stopped,
    NotRunning,
}

impl ServiceStatus {
    pub fn label(self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Timeout => "timeout",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Blocked => "blocked",
            ServiceStatus::Cancelled => "cancelled",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::NotRunning => "not running",
        }
    }

    fn colored(self) -> String {
        let dot = "\u{25cf}";
        let label = self.label();
        match self {
            ServiceStatus::Healthy => format!("{} {}", dot.green(), label.green()),
            ServiceStatus::Unhealthy => {
                format!("{} {}", dot.yellow(), label.yellow())
            }
            ServiceStatus::Timeout | ServiceStatus::Failed => {
                format!("{} {}", dot.red(), label.red())
            }
            _ => format!("{} {}", dot.dimmed(), label.dimmed()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub status: ServiceStatus,
    /// Last health state recorded for the service in this invocation.
    pub health: HealthStatus,
    pub optional: bool,
    /// Left running from an earlier invocation rather than spawned now.
    pub already_running: bool,
    pub pid: Option<u32>,
    pub resolved_port: Option<u16>,
    pub log_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ServiceReport {
    pub fn new(name: impl Into<String>, status: ServiceStatus, optional: bool) -> Self {
        Self {
            name: name.into(),
            status,
            health: HealthStatus::Unknown,
            optional,
            already_running: false,
            pid: None,
            resolved_port: None,
            log_path: None,
            started_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Ok,
    Degraded,
    Failed,
}

impl Overall {
    /// 0 when every required service is healthy, 2 when a required service
    /// is not, 3 when only optional services are not.
    pub fn exit_code(self) -> i32 {
        match self {
            Overall::Ok => 0,
            Overall::Failed => 2,
            Overall::Degraded => 3,
        }
    }

    fn from_services(services: &[ServiceReport]) -> Self {
        let unhealthy = |s: &&ServiceReport| s.status != ServiceStatus::Healthy;
        if services.iter().filter(unhealthy).any(|s| !s.optional) {
            Overall::Failed
        } else if services.iter().any(|s| unhealthy(&s)) {
            Overall::Degraded
        } else {
            Overall::Ok
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub project: String,
    pub overall: Overall,
    pub services: Vec<ServiceReport>,
}

impl Report {
    pub fn new(project: impl Into<String>, services: Vec<ServiceReport>) -> Self {
        let overall = Overall::from_services(&services);
        Self {
            project: project.into(),
            overall,
            services,
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn exit_code(&self) -> i32 {
        self.overall.exit_code()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_table(&self, use_color: bool) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("Service").set_alignment(CellAlignment::Left),
            Cell::new("Status").set_alignment(CellAlignment::Left),
            Cell::new("PID").set_alignment(CellAlignment::Right),
            Cell::new("URL").set_alignment(CellAlignment::Left),
            Cell::new("Details").set_alignment(CellAlignment::Left),
        ]);

        for svc in &self.services {
            let name = if svc.optional {
                format!("{} (optional)", svc.name)
            } else {
                svc.name.clone()
            };
            let status = if use_color {
                svc.status.colored()
            } else {
                format!("\u{25cf} {}", svc.status.label())
            };
            let pid = svc
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let url = svc
                .resolved_port
                .map(|p| format!("http://127.0.0.1:{}", p))
                .unwrap_or_else(|| "-".to_string());
            let details = match (&svc.error, svc.already_running) {
                (Some(err), _) => err.clone(),
                (None, true) => "already running".to_string(),
                (None, false) => svc
                    .log_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            };

            table.add_row(vec![
                Cell::new(name),
                Cell::new(status),
                Cell::new(pid).set_alignment(CellAlignment::Right),
                Cell::new(url),
                Cell::new(details),
            ]);
        }

        table.to_string()
    }

    /// Print the report to stdout as JSON or as an indented table.
    pub fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", self.to_json()?);
            return Ok(());
        }

        let use_color = std::io::stdout().is_terminal();
        println!();
        if use_color {
            println!("  {} {}", "orchestrate".bold(), self.project.cyan());
        } else {
            println!("  orchestrate {}", self.project);
        }
        println!();

        if self.services.is_empty() {
            println!("  No services selected.");
        } else {
            for line in self.render_table(use_color).lines() {
                println!("  {}", line);
            }
        }

        println!();
        let verdict = match self.overall {
            Overall::Ok => "all required services healthy",
            Overall::Degraded => "degraded: optional services unhealthy",
            Overall::Failed => "failed: required services unhealthy",
        };
        if use_color {
            let colored = match self.overall {
                Overall::Ok => verdict.green().to_string(),
                Overall::Degraded => verdict.yellow().to_string(),
                Overall::Failed => verdict.red().to_string(),
            };
            println!("  {}", colored);
        } else {
            println!("  {}", verdict);
        }
        println!();
        Ok(())
    }
}

/// Print what `stop` did, one line per service.
pub fn print_stop_summary(outcomes: &[StopOutcome]) {
    let use_color = std::io::stdout().is_terminal();
    if outcomes.is_empty() {
        println!("Nothing to stop.");
        return;
    }
    for outcome in outcomes {
        let label = match outcome.state {
            StopState::Stopped => "stopped",
            StopState::Killed => "killed",
            StopState::NotRunning => "not running",
            StopState::Stale => "stale pid-file removed",
            StopState::Failed => "failed",
        };
        let pid = outcome
            .pid
            .map(|p| format!(" (pid {})", p))
            .unwrap_or_default();
        if use_color {
            let label = match outcome.state {
                StopState::Stopped | StopState::Stale => label.green().to_string(),
                StopState::Killed => label.yellow().to_string(),
                StopState::NotRunning => label.dimmed().to_string(),
                StopState::Failed => label.red().to_string(),
            };
            println!("  {} {}{}", outcome.service.bold(), label, pid);
        } else {
            println!("  {} {}{}", outcome.service, label, pid);
        }
        for warning in &outcome.warnings {
            println!("    warning: {}", warning);
        }
    }
}
