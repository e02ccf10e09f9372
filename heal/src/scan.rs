//! Category checks that together make up `scan`. Each
//! check is independent and pure over its inputs except for the I/O it
//! performs to observe the outside world; `scan` just concatenates their
//! results in a fixed, documented order.

use std::path::Path;
use std::path::PathBuf;

use masterclaw_core::resilience::BreakerState;
use masterclaw_core::resilience::CircuitBreaker;
use masterclaw_exec::ProcessDescriptor;
use masterclaw_exec::SecureProcess;
use masterclaw_net::ServiceFacade;
use sysinfo::Disks;
use sysinfo::System;

use crate::issue::Category;
use crate::issue::Issue;
use crate::issue::Severity;

const DISK_CRITICAL_BYTES: u64 = 1024 * 1024 * 1024;
const DISK_WARNING_BYTES: u64 = 5 * 1024 * 1024 * 1024;
const MEMORY_CRITICAL_BYTES: u64 = 512 * 1024 * 1024;
const MEMORY_WARNING_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub struct ConfigFileExpectation {
    pub path: PathBuf,
    pub expected_mode: u32,
}

pub struct ScanContext<'a> {
    pub services: Vec<(String, String)>,
    pub config_files: Vec<ConfigFileExpectation>,
    pub circuits: Vec<(String, &'a CircuitBreaker)>,
    pub protected_prefixes: &'static [&'static str],
}

pub async fn scan(ctx: &ScanContext<'_>) -> Vec<Issue> {
    let mut issues = Vec::new();
    issues.extend(check_docker_daemon().await);
    issues.extend(check_service_health(&ctx.services).await);
    issues.extend(check_disk_and_memory());
    issues.extend(check_config_permissions(&ctx.config_files));
    issues.extend(check_open_circuits(&ctx.circuits));
    issues.extend(check_docker_artifacts(ctx.protected_prefixes).await);
    issues
}

async fn check_docker_daemon() -> Vec<Issue> {
    let descriptor = docker_descriptor(vec!["info".to_string()]);
    match SecureProcess::run(descriptor).await {
        Ok(result) if result.exit_code == 0 => Vec::new(),
        _ => vec![Issue::new(
            Category::DockerDaemon,
            Severity::Critical,
            "docker",
            "docker daemon is unreachable",
        )],
    }
}

async fn check_service_health(services: &[(String, String)]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (name, base_url) in services {
        let facade = ServiceFacade::new(base_url.clone());
        if facade.health("heal-scan").await.is_err() {
            issues.push(Issue::new(
                Category::ServiceHealth,
                Severity::Critical,
                name.clone(),
                format!("service {name} failed its health check"),
            ).fixable());
        }
    }
    issues
}

fn check_disk_and_memory() -> Vec<Issue> {
    let mut issues = Vec::new();

    let disks = Disks::new_with_refreshed_list();
    if let Some(root) = disks.iter().min_by_key(|d| d.available_space()) {
        let free = root.available_space();
        if free <= DISK_CRITICAL_BYTES {
            issues.push(Issue::new(Category::DiskSpace, Severity::Critical, "disk", format!("only {free} bytes free")));
        } else if free <= DISK_WARNING_BYTES {
            issues.push(Issue::new(Category::DiskSpace, Severity::Warning, "disk", format!("only {free} bytes free")));
        }
    }

    let mut system = System::new();
    system.refresh_memory();
    let free = system.available_memory();
    if free <= MEMORY_CRITICAL_BYTES {
        issues.push(Issue::new(Category::MemoryPressure, Severity::Critical, "memory", format!("only {free} bytes available")));
    } else if free <= MEMORY_WARNING_BYTES {
        issues.push(Issue::new(Category::MemoryPressure, Severity::Warning, "memory", format!("only {free} bytes available")));
    }

    issues
}

fn check_config_permissions(config_files: &[ConfigFileExpectation]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for expectation in config_files {
        if let Some(mode) = current_mode(&expectation.path) {
            if mode != expectation.expected_mode {
                issues.push(
                    Issue::new(
                        Category::ConfigPermissions,
                        Severity::Warning,
                        expectation.path.display().to_string(),
                        format!("mode is {mode:o}, expected {:o}", expectation.expected_mode),
                    )
                    .fixable(),
                );
            }
        }
    }
    issues
}

#[cfg(unix)]
fn current_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn current_mode(_path: &Path) -> Option<u32> {
    None
}

fn check_open_circuits(circuits: &[(String, &CircuitBreaker)]) -> Vec<Issue> {
    circuits
        .iter()
        .filter(|(_, breaker)| breaker.state() != BreakerState::Closed)
        .map(|(name, _)| {
            Issue::new(Category::OpenCircuit, Severity::Warning, name.clone(), format!("circuit {name} is not closed")).fixable()
        })
        .collect()
}

async fn check_docker_artifacts(protected_prefixes: &'static [&'static str]) -> Vec<Issue> {
    let mut issues = Vec::new();
    issues.extend(list_artifacts("image", vec!["images".to_string(), "-f".to_string(), "dangling=true".to_string(), "-q".to_string()], protected_prefixes).await);
    issues.extend(list_artifacts("container", vec!["ps".to_string(), "-a".to_string(), "-f".to_string(), "status=exited".to_string(), "-q".to_string()], protected_prefixes).await);
    issues.extend(list_artifacts("volume", vec!["volume".to_string(), "ls".to_string(), "-f".to_string(), "dangling=true".to_string(), "-q".to_string()], protected_prefixes).await);
    issues.extend(list_artifacts("network", vec!["network".to_string(), "ls".to_string(), "-f".to_string(), "dangling=true".to_string(), "-q".to_string()], protected_prefixes).await);
    issues
}

async fn list_artifacts(kind: &str, args: Vec<String>, protected_prefixes: &'static [&'static str]) -> Vec<Issue> {
    let descriptor = docker_descriptor(args);
    let Ok(result) = SecureProcess::run(descriptor).await else {
        return Vec::new();
    };
    if result.exit_code != 0 {
        return Vec::new();
    }
    String::from_utf8_lossy(&result.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|name| {
            let protected = protected_prefixes.iter().any(|p| name.starts_with(p));
            let mut issue = Issue::new(
                Category::DockerArtifact,
                Severity::Warning,
                name.to_string(),
                format!("unused docker {kind}: {name}"),
            )
            .with_resource_kind(kind);
            if !protected {
                issue = issue.fixable();
            }
            if protected {
                issue = issue.protected();
            }
            issue
        })
        .collect()
}

fn docker_descriptor(args: Vec<String>) -> ProcessDescriptor {
    let mut descriptor = ProcessDescriptor::new("docker", args);
    descriptor.allowlist = &["docker"];
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_circuits_are_reported_only_when_not_closed() {
        let open = CircuitBreaker::new(masterclaw_core::resilience::BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        open.record_failure();
        let closed = CircuitBreaker::new(Default::default());

        let circuits: Vec<(String, &CircuitBreaker)> =
            vec![("open-one".to_string(), &open), ("closed-one".to_string(), &closed)];
        let issues = check_open_circuits(&circuits);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].subject, "open-one");
    }
}
