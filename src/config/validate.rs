// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::{BTreeMap, HashMap, HashSet};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::OrchestrateConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic: one validation finding, pointing into the TOML source
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("service name `{name}` is declared {count} times")]
    #[diagnostic(
        code(orchestrate::duplicate_name),
        help("service names are unique keys; rename one of them")
    )]
    DuplicateName {
        #[source_code]
        src: NamedSource<String>,
        #[label("declared again here")]
        span: SourceSpan,
        name: String,
        count: usize,
    },

    #[error("invalid service name `{name}`")]
    #[diagnostic(
        code(orchestrate::invalid_name),
        help("names may only contain letters, digits, `-`, `_` and `.`")
    )]
    InvalidName {
        #[source_code]
        src: NamedSource<String>,
        #[label("not a valid name")]
        span: SourceSpan,
        name: String,
    },

    #[error("unknown dependency `{dependency}`")]
    #[diagnostic(code(orchestrate::missing_dependency))]
    MissingDependency {
        #[source_code]
        src: NamedSource<String>,
        #[label("service `{service}` depends on `{dependency}`, which does not exist")]
        span: SourceSpan,
        #[help]
        advice: String,
        service: String,
        dependency: String,
    },

    #[error("dependency cycle detected involving `{node}`")]
    #[diagnostic(code(orchestrate::dependency_cycle))]
    DependencyCycle {
        #[source_code]
        src: NamedSource<String>,
        #[label("cycle involves this service")]
        span: SourceSpan,
        node: String,
    },

    #[error("service `{service}` has an empty command")]
    #[diagnostic(code(orchestrate::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("port {port} is the default port of multiple services: {services:?}")]
    #[diagnostic(code(orchestrate::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        services: Vec<String>,
    },

    #[error("service `{service}` has a health check but no port to probe")]
    #[diagnostic(
        code(orchestrate::probe_without_port),
        help("set `port` on the service or remove its [services.health] table")
    )]
    ProbeWithoutPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("health check declared here")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` has an invalid health check: {reason}")]
    #[diagnostic(code(orchestrate::invalid_health_check))]
    InvalidHealthCheck {
        #[source_code]
        src: NamedSource<String>,
        #[label("{reason}")]
        span: SourceSpan,
        service: String,
        reason: String,
    },

    #[error("service `{service}` declares fallback ports without a default port")]
    #[diagnostic(code(orchestrate::fallback_without_port))]
    FallbackWithoutPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("fallback_ports needs `port`")]
        span: SourceSpan,
        service: String,
    },

    #[error("settings.max_parallel must be at least 1")]
    #[diagnostic(code(orchestrate::invalid_max_parallel))]
    InvalidMaxParallel {
        #[source_code]
        src: NamedSource<String>,
        #[label("must be >= 1")]
        span: SourceSpan,
    },
}

// ---------------------------------------------------------------------------
// ConfigError: fatal, surfaced before any side effect
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration has {} error(s)", .0.len())]
    Invalid(Vec<ConfigDiagnostic>),

    #[error("unknown service '{name}' (available: {available:?})")]
    UnknownService {
        name: String,
        available: Vec<String>,
    },

    #[error("dependency cycle detected among {0:?}")]
    Cycle(Vec<String>),
}

impl ConfigError {
    /// Print every diagnostic as a rendered miette report on stderr.
    pub fn report(&self) {
        match self {
            ConfigError::Invalid(diagnostics) => {
                for diag in diagnostics {
                    // Diagnostics are not Clone; render through a borrowed
                    // report handler instead of converting into a Report.
                    let mut out = String::new();
                    let handler = miette::GraphicalReportHandler::new();
                    if handler.render_report(&mut out, diag).is_ok() {
                        eprintln!("{}", out);
                    } else {
                        eprintln!("  - {}", diag);
                    }
                }
            }
            other => eprintln!("Error: {}", other),
        }
    }
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Byte ranges of each `[[services]]` block, in declaration order. A block
/// runs until the next `[[services]]` header or a non-service table.
fn service_blocks(source: &str) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut offset = 0;
    let mut in_block = false;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed == "[[services]]" {
            if in_block {
                ends.push(offset);
            }
            starts.push(offset);
            in_block = true;
        } else if in_block && trimmed.starts_with('[') && !trimmed.starts_with("[services.") {
            ends.push(offset);
            in_block = false;
        }
        offset += line.len();
    }
    if in_block {
        ends.push(source.len());
    }
    starts.into_iter().zip(ends).collect()
}

/// Find the `nth` block whose `name = "..."` equals `name`.
fn find_block(source: &str, name: &str, nth: usize) -> Option<(usize, usize)> {
    let quoted = format!("\"{}\"", name);
    service_blocks(source)
        .into_iter()
        .filter(|(start, end)| {
            source[*start..*end].lines().any(|line| {
                let line = line.trim_start();
                line.starts_with("name") && line.contains('=') && line.contains(&quoted)
            })
        })
        .nth(nth)
}

/// Span of the `name` value of the `nth` service called `name`.
fn find_service_span(source: &str, name: &str, nth: usize) -> SourceSpan {
    let quoted = format!("\"{}\"", name);
    if let Some((start, end)) = find_block(source, name, nth) {
        if let Some(rel) = source[start..end].find(&quoted) {
            return (start + rel + 1, name.len()).into();
        }
    }
    match source.find(&quoted) {
        Some(pos) => (pos + 1, name.len()).into(),
        None => (0, 0).into(),
    }
}

/// Span of a `field = value` line (value part) inside a service block.
fn find_field_span(source: &str, name: &str, field: &str) -> SourceSpan {
    let Some((start, end)) = find_block(source, name, 0) else {
        return find_service_span(source, name, 0);
    };
    let mut offset = start;
    for line in source[start..end].split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(field) {
            if rest.trim_start().starts_with('=') {
                let eq = line.find('=').unwrap_or(0);
                let value = line[eq + 1..].trim();
                let value_start = offset + eq + 1 + (line[eq + 1..].len() - line[eq + 1..].trim_start().len());
                return (value_start, value.len()).into();
            }
        }
        offset += line.len();
    }
    find_service_span(source, name, 0)
}

/// Span of a dependency entry in the service's `depends_on` array.
fn find_depends_on_value(source: &str, service: &str, dep: &str) -> SourceSpan {
    let quoted = format!("\"{}\"", dep);
    if let Some((start, end)) = find_block(source, service, 0) {
        let block = &source[start..end];
        if let Some(line_pos) = block.find("depends_on") {
            if let Some(rel) = block[line_pos..].find(&quoted) {
                return (start + line_pos + rel + 1, dep.len()).into();
            }
        }
    }
    find_service_span(source, service, 0)
}

/// Span of the `[services.health]` header of a service.
fn find_health_span(source: &str, name: &str) -> SourceSpan {
    const HEADER: &str = "[services.health]";
    if let Some((start, end)) = find_block(source, name, 0) {
        if let Some(rel) = source[start..end].find(HEADER) {
            return (start + rel, HEADER.len()).into();
        }
    }
    find_service_span(source, name, 0)
}

// ---------------------------------------------------------------------------
// Similarity suggestions
// ---------------------------------------------------------------------------

fn find_closest_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

pub fn validate(
    config: &OrchestrateConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());
    let available = config.service_names();

    if config.settings.max_parallel == 0 {
        let span = match source.find("max_parallel") {
            Some(pos) => (pos, "max_parallel".len()).into(),
            None => (0, 0).into(),
        };
        errors.push(ConfigDiagnostic::InvalidMaxParallel {
            src: src.clone(),
            span,
        });
    }

    // Names: well-formed and unique
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for svc in &config.services {
        if !is_valid_name(&svc.name) {
            errors.push(ConfigDiagnostic::InvalidName {
                src: src.clone(),
                span: find_service_span(source, &svc.name, 0),
                name: svc.name.clone(),
            });
        }
        let count = seen.entry(svc.name.as_str()).or_insert(0);
        *count += 1;
        if *count > 1 {
            let total = config
                .services
                .iter()
                .filter(|s| s.name == svc.name)
                .count();
            errors.push(ConfigDiagnostic::DuplicateName {
                src: src.clone(),
                span: find_service_span(source, &svc.name, *count - 1),
                name: svc.name.clone(),
                count: total,
            });
        }
    }

    // Every dependency must resolve
    for svc in &config.services {
        for dep in &svc.depends_on {
            if !available.contains(dep) {
                let advice = match find_closest_match(dep, &available) {
                    Some(s) => format!("did you mean `{}`?", s),
                    None => format!("available services: {:?}", available),
                };
                errors.push(ConfigDiagnostic::MissingDependency {
                    src: src.clone(),
                    span: find_depends_on_value(source, &svc.name, dep),
                    advice,
                    service: svc.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // No two services share a default port
    let mut port_map: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for svc in &config.services {
        if let Some(p) = svc.port {
            port_map.entry(p).or_default().push(svc.name.clone());
        }
    }
    for (port, services) in port_map {
        if services.len() > 1 {
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_field_span(source, &services[1], "port"),
                port,
                services,
            });
        }
    }

    // Dependency cycles: iterative DFS with visited / in_stack sets
    let mut deps_map: BTreeMap<&str, &Vec<String>> = BTreeMap::new();
    for svc in &config.services {
        deps_map.entry(svc.name.as_str()).or_insert(&svc.depends_on);
    }
    {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_stack: HashSet<&str> = HashSet::new();
        let mut reported: HashSet<&str> = HashSet::new();

        for svc in &config.services {
            let start = svc.name.as_str();
            if visited.contains(start) {
                continue;
            }

            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            in_stack.insert(start);

            while let Some((node, idx)) = stack.last_mut() {
                let deps = deps_map[*node];
                if *idx < deps.len() {
                    let dep = deps[*idx].as_str();
                    *idx += 1;

                    if !deps_map.contains_key(dep) {
                        continue;
                    }

                    if in_stack.contains(dep) {
                        if reported.insert(dep) {
                            errors.push(ConfigDiagnostic::DependencyCycle {
                                src: src.clone(),
                                span: find_service_span(source, dep, 0),
                                node: dep.to_string(),
                            });
                        }
                    } else if !visited.contains(dep) {
                        in_stack.insert(dep);
                        stack.push((dep, 0));
                    }
                } else {
                    let finished = *node;
                    visited.insert(finished);
                    in_stack.remove(finished);
                    stack.pop();
                }
            }
        }
    }

    for svc in &config.services {
        if svc.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_field_span(source, &svc.name, "command"),
                service: svc.name.clone(),
            });
        }

        if !svc.fallback_ports.is_empty() && svc.port.is_none() {
            errors.push(ConfigDiagnostic::FallbackWithoutPort {
                src: src.clone(),
                span: find_field_span(source, &svc.name, "fallback_ports"),
                service: svc.name.clone(),
            });
        }

        let Some(health) = &svc.health else {
            continue;
        };
        if svc.port.is_none() {
            errors.push(ConfigDiagnostic::ProbeWithoutPort {
                src: src.clone(),
                span: find_health_span(source, &svc.name),
                service: svc.name.clone(),
            });
        }
        let invalid = |reason: &str, field: &str| ConfigDiagnostic::InvalidHealthCheck {
            src: src.clone(),
            span: find_field_span(source, &svc.name, field),
            service: svc.name.clone(),
            reason: reason.to_string(),
        };
        if health.accept.is_empty() {
            errors.push(invalid("accept must list at least one status code", "accept"));
        }
        if let Some(code) = health.accept.iter().find(|c| !(100..=599).contains(*c)) {
            errors.push(invalid(
                &format!("{} is not an HTTP status code", code),
                "accept",
            ));
        }
        if health.max_attempts == 0 {
            errors.push(invalid("max_attempts must be at least 1", "max_attempts"));
        }
        if health.interval_ms == 0 {
            errors.push(invalid("interval_ms must be at least 1", "interval_ms"));
        }
        if health.timeout_secs == 0 {
            errors.push(invalid("timeout_secs must be at least 1", "timeout_secs"));
        }
        if !health.path.starts_with('/') {
            errors.push(invalid("path must start with `/`", "path"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FILENAME: &str = "orchestrate.toml";

    fn check(source: &str) -> Result<(), Vec<ConfigDiagnostic>> {
        let config: OrchestrateConfig = toml::from_str(source).unwrap();
        validate(&config, source, TEST_FILENAME)
    }

    fn span_text<'a>(source: &'a str, span: &SourceSpan) -> &'a str {
        &source[span.offset()..span.offset() + span.len()]
    }

    #[test]
    fn valid_config_passes() {
        let source = r#"
[project]
name = "agents"

[[services]]
name = "redis"
command = "redis-server"
port = 6379
[services.health]
type = "tcp"

[[services]]
name = "api"
command = "uvicorn app:main"
port = 8000
depends_on = ["redis"]
[services.health]
type = "http"
accept = [200, 401]
"#;
        assert!(check(source).is_ok());
    }

    #[test]
    fn duplicate_name_points_at_second_declaration() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "api"
command = "a"

[[services]]
name = "api"
command = "b"
"#;
        let errors = check(source).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConfigDiagnostic::DuplicateName {
                name, count, span, ..
            } => {
                assert_eq!(name, "api");
                assert_eq!(*count, 2);
                let second = source.rfind("\"api\"").unwrap() + 1;
                assert_eq!(span.offset(), second);
            }
            other => panic!("expected DuplicateName, got {:?}", other),
        }
    }

    #[test]
    fn missing_dependency_suggests_closest() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "postgres"
command = "pg"

[[services]]
name = "api"
command = "run"
depends_on = ["postgress"]
"#;
        let errors = check(source).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConfigDiagnostic::MissingDependency {
                service,
                dependency,
                advice,
                span,
                ..
            } => {
                assert_eq!(service, "api");
                assert_eq!(dependency, "postgress");
                assert!(advice.contains("postgres"), "advice: {advice}");
                assert_eq!(span_text(source, span), "postgress");
            }
            other => panic!("expected MissingDependency, got {:?}", other),
        }
    }

    #[test]
    fn cycle_detected() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "a"
command = "run"
depends_on = ["c"]

[[services]]
name = "b"
command = "run"
depends_on = ["a"]

[[services]]
name = "c"
command = "run"
depends_on = ["b"]
"#;
        let errors = check(source).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::DependencyCycle { .. })));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "a"
command = "run"
depends_on = ["a"]
"#;
        let errors = check(source).unwrap_err();
        match &errors[0] {
            ConfigDiagnostic::DependencyCycle { node, .. } => assert_eq!(node, "a"),
            other => panic!("expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn empty_command_and_invalid_name() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "bad/name"
command = "   "
"#;
        let errors = check(source).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::InvalidName { name, .. } if name == "bad/name")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::EmptyCommand { .. })));
    }

    #[test]
    fn duplicate_default_port() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "a"
command = "run"
port = 3000

[[services]]
name = "b"
command = "run"
port = 3000
"#;
        let errors = check(source).unwrap_err();
        match &errors[0] {
            ConfigDiagnostic::DuplicatePort {
                port,
                services,
                span,
                ..
            } => {
                assert_eq!(*port, 3000);
                assert_eq!(services, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(span_text(source, span), "3000");
            }
            other => panic!("expected DuplicatePort, got {:?}", other),
        }
    }

    #[test]
    fn health_check_needs_port_and_sane_values() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "api"
command = "run"
[services.health]
type = "http"
path = "health"
accept = [200, 999]
max_attempts = 0
"#;
        let errors = check(source).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::ProbeWithoutPort { .. })));
        let reasons: Vec<&str> = errors
            .iter()
            .filter_map(|e| match e {
                ConfigDiagnostic::InvalidHealthCheck { reason, .. } => Some(reason.as_str()),
                _ => None,
            })
            .collect();
        assert!(reasons.iter().any(|r| r.contains("999")), "{reasons:?}");
        assert!(reasons.iter().any(|r| r.contains("max_attempts")), "{reasons:?}");
        assert!(reasons.iter().any(|r| r.contains("path")), "{reasons:?}");
    }

    #[test]
    fn fallback_ports_require_default_port() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "api"
command = "run"
fallback_ports = [3001]
"#;
        let errors = check(source).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigDiagnostic::FallbackWithoutPort { .. }
        ));
    }

    #[test]
    fn zero_max_parallel_rejected() {
        let source = r#"
[project]
name = "x"

[settings]
max_parallel = 0
"#;
        let errors = check(source).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigDiagnostic::InvalidMaxParallel { .. }
        ));
    }

    #[test]
    fn field_span_stays_inside_service_block() {
        let source = r#"
[project]
name = "x"

[[services]]
name = "a"
command = "first"

[[services]]
name = "b"
command = "second"
"#;
        let span = find_field_span(source, "b", "command");
        assert_eq!(span_text(source, &span), "\"second\"");
    }
}
