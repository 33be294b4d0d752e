//! spingrid.toml configuration parser.
//!
//! Every field is optional; the `resolved_*` accessors fill in defaults and
//! turn duration strings into `Duration`s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpinConfig {
    pub scheduler: Option<SchedulerSection>,
    pub membership: Option<MembershipSection>,
    pub telemetry: Option<TelemetrySection>,
    pub launcher: Option<LauncherSection>,
    pub coordinator: Option<CoordinatorSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub queue_multiplier: Option<usize>,
    pub poll_interval: Option<String>,
    pub task_timeout: Option<String>,
    pub ready_timeout: Option<String>,
    pub run_deadline: Option<String>,
    pub report_interval: Option<String>,
    pub seed_base: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MembershipSection {
    pub admission_timeout: Option<String>,
    pub shutdown_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySection {
    pub interval: Option<String>,
    pub sample_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherSection {
    pub program: Option<PathBuf>,
    pub ssh: Option<String>,
    pub capture_timeout: Option<String>,
    pub cluster_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorSection {
    pub listen: Option<String>,
    pub advertise: Option<String>,
}

/// Scheduler tunables with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub queue_multiplier: usize,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub ready_timeout: Duration,
    pub run_deadline: Option<Duration>,
    pub report_interval: Duration,
    pub seed_base: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queue_multiplier: 5,
            poll_interval: Duration::from_millis(100),
            task_timeout: Duration::from_secs(300),
            ready_timeout: Duration::from_secs(300),
            run_deadline: None,
            report_interval: Duration::from_secs(1),
            seed_base: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipSettings {
    pub admission_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for MembershipSettings {
    fn default() -> Self {
        Self {
            admission_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySettings {
    pub interval: Duration,
    pub sample_timeout: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            sample_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LauncherSettings {
    /// Worker executable; `None` means the running executable.
    pub program: Option<PathBuf>,
    pub ssh: String,
    pub capture_timeout: Duration,
    pub cluster_command: Option<Vec<String>>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            program: None,
            ssh: "ssh".to_string(),
            capture_timeout: Duration::from_secs(60),
            cluster_command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub listen: String,
    pub advertise: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7878".to_string(),
            advertise: "0.0.0.0:7878".to_string(),
        }
    }
}

impl SpinConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn resolved_scheduler(&self) -> CoreResult<SchedulerSettings> {
        let mut out = SchedulerSettings::default();
        let Some(s) = &self.scheduler else {
            return Ok(out);
        };
        if let Some(m) = s.queue_multiplier {
            if m == 0 {
                return Err(CoreError::Config("queue_multiplier must be at least 1".into()));
            }
            out.queue_multiplier = m;
        }
        override_duration(&mut out.poll_interval, &s.poll_interval)?;
        override_duration(&mut out.task_timeout, &s.task_timeout)?;
        override_duration(&mut out.ready_timeout, &s.ready_timeout)?;
        override_duration(&mut out.report_interval, &s.report_interval)?;
        if let Some(d) = &s.run_deadline {
            out.run_deadline = Some(parse_duration(d)?);
        }
        if let Some(seed) = s.seed_base {
            out.seed_base = seed;
        }
        Ok(out)
    }

    pub fn resolved_membership(&self) -> CoreResult<MembershipSettings> {
        let mut out = MembershipSettings::default();
        if let Some(s) = &self.membership {
            override_duration(&mut out.admission_timeout, &s.admission_timeout)?;
            override_duration(&mut out.shutdown_timeout, &s.shutdown_timeout)?;
        }
        Ok(out)
    }

    pub fn resolved_telemetry(&self) -> CoreResult<TelemetrySettings> {
        let mut out = TelemetrySettings::default();
        if let Some(s) = &self.telemetry {
            override_duration(&mut out.interval, &s.interval)?;
            override_duration(&mut out.sample_timeout, &s.sample_timeout)?;
        }
        Ok(out)
    }

    pub fn resolved_launcher(&self) -> CoreResult<LauncherSettings> {
        let mut out = LauncherSettings::default();
        if let Some(s) = &self.launcher {
            out.program = s.program.clone();
            if let Some(ssh) = &s.ssh {
                out.ssh = ssh.clone();
            }
            override_duration(&mut out.capture_timeout, &s.capture_timeout)?;
            out.cluster_command = s.cluster_command.clone();
        }
        Ok(out)
    }

    pub fn resolved_coordinator(&self) -> CoordinatorSettings {
        let mut out = CoordinatorSettings::default();
        if let Some(s) = &self.coordinator {
            if let Some(listen) = &s.listen {
                out.listen = listen.clone();
            }
            out.advertise = s.advertise.clone().unwrap_or_else(|| out.listen.clone());
        }
        out
    }
}

fn override_duration(slot: &mut Duration, value: &Option<String>) -> CoreResult<()> {
    if let Some(v) = value {
        *slot = parse_duration(v)?;
    }
    Ok(())
}

/// Parse a duration string like "250ms", "30s", "5m". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::Config(format!("invalid duration '{s}'"));

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(invalid)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60)).map_err(|_| invalid())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = SpinConfig::from_toml_str("").unwrap();
        assert_eq!(config.resolved_scheduler().unwrap(), SchedulerSettings::default());
        assert_eq!(config.resolved_telemetry().unwrap(), TelemetrySettings::default());
        assert_eq!(config.resolved_coordinator(), CoordinatorSettings::default());
    }

    #[test]
    fn parses_sections() {
        let toml_str = r#"
[scheduler]
queue_multiplier = 3
poll_interval = "50ms"
task_timeout = "2m"
run_deadline = "1.5s"
seed_base = 1000

[telemetry]
interval = "2s"

[launcher]
ssh = "plink"
cluster_command = ["srun", "-N", "{count}", "{worker}"]

[coordinator]
listen = "0.0.0.0:9000"
advertise = "head-node:9000"
"#;
        let config = SpinConfig::from_toml_str(toml_str).unwrap();
        let sched = config.resolved_scheduler().unwrap();
        assert_eq!(sched.queue_multiplier, 3);
        assert_eq!(sched.poll_interval, Duration::from_millis(50));
        assert_eq!(sched.task_timeout, Duration::from_secs(120));
        assert_eq!(sched.run_deadline, Some(Duration::from_millis(1500)));
        assert_eq!(sched.seed_base, 1000);
        // Unset fields keep their defaults.
        assert_eq!(sched.report_interval, Duration::from_secs(1));

        assert_eq!(config.resolved_telemetry().unwrap().interval, Duration::from_secs(2));

        let launcher = config.resolved_launcher().unwrap();
        assert_eq!(launcher.ssh, "plink");
        assert_eq!(launcher.cluster_command.unwrap().len(), 4);

        let coord = config.resolved_coordinator();
        assert_eq!(coord.listen, "0.0.0.0:9000");
        assert_eq!(coord.advertise, "head-node:9000");
    }

    #[test]
    fn advertise_defaults_to_listen() {
        let config = SpinConfig::from_toml_str("[coordinator]\nlisten = \"10.0.0.1:7000\"\n").unwrap();
        assert_eq!(config.resolved_coordinator().advertise, "10.0.0.1:7000");
    }

    #[test]
    fn zero_queue_multiplier_is_rejected() {
        let config = SpinConfig::from_toml_str("[scheduler]\nqueue_multiplier = 0\n").unwrap();
        assert!(config.resolved_scheduler().is_err());
    }

    #[test]
    fn bad_duration_is_config_error() {
        let config = SpinConfig::from_toml_str("[telemetry]\ninterval = \"soon\"\n").unwrap();
        assert!(matches!(config.resolved_telemetry(), Err(CoreError::Config(_))));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = SpinConfig::default();
        config.scheduler = Some(SchedulerSection {
            queue_multiplier: Some(4),
            ..Default::default()
        });
        let text = config.to_toml_string().unwrap();
        let back = SpinConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.resolved_scheduler().unwrap().queue_multiplier, 4);
    }
}
