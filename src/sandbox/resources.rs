//! Resource limit resolution.
//!
//! Users express limits either absolutely (`512m`, `2.0`) or relative to the
//! engine host (`25%`). Relative specs are resolved against the host totals
//! reported by the daemon, which is only queried when actually needed.

use std::sync::LazyLock;

use bollard::models::HostConfig;
use regex::Regex;
use tracing::debug;

use super::engine::Engine;
use super::error::ResourceError;

const MEMORY: &str = "memory";
const CPU: &str = "cpu";

/// Raw, possibly host-relative resource request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSpec {
    /// `"512m"`, `"1g"`, `"25%"`, or empty for no limit.
    pub memory: String,
    /// `"2.0"`, `"50%"`, or empty for no limit.
    pub cpus: String,
}

impl ResourceSpec {
    pub fn is_empty(&self) -> bool {
        self.memory.trim().is_empty() && self.cpus.trim().is_empty()
    }

    fn needs_host_info(&self) -> bool {
        is_percentage(&self.memory) || is_percentage(&self.cpus)
    }
}

/// Resolved, absolute limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourcePolicy {
    /// Bytes.
    pub memory: i64,
    /// Number of CPUs.
    pub cpus: f64,
}

impl ResourcePolicy {
    pub fn is_unlimited(&self) -> bool {
        self.memory == 0 && self.cpus == 0.0
    }

    /// Set the memory byte limit and nano-CPU quota on a launch config.
    pub fn apply(&self, host: &mut HostConfig) {
        if self.memory > 0 {
            host.memory = Some(self.memory);
        }
        if self.cpus > 0.0 {
            host.nano_cpus = Some((self.cpus * 1e9) as i64);
        }
    }
}

/// Totals of the machine running the containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostResources {
    pub memory_total: i64,
    pub cpu_count: i64,
}

/// Combine CLI flags with configured defaults. Flags win when set.
pub fn merge(
    flag_memory: &str,
    flag_cpus: f64,
    default_memory: &str,
    default_cpus: &str,
) -> ResourceSpec {
    let memory = if flag_memory.is_empty() {
        default_memory
    } else {
        flag_memory
    };
    let cpus = if flag_cpus > 0.0 {
        flag_cpus.to_string()
    } else {
        default_cpus.to_string()
    };
    ResourceSpec {
        memory: memory.to_string(),
        cpus,
    }
}

/// Resolve a spec against known host totals.
pub fn resolve(spec: &ResourceSpec, host: HostResources) -> Result<ResourcePolicy, ResourceError> {
    Ok(ResourcePolicy {
        memory: resolve_memory(&spec.memory, host.memory_total)?,
        cpus: resolve_cpus(&spec.cpus, host.cpu_count)?,
    })
}

/// Resolve a spec, asking the engine for host totals only when a component
/// is a percentage.
pub async fn resolve_against_live_host<E: Engine>(
    engine: &E,
    spec: &ResourceSpec,
) -> Result<ResourcePolicy, ResourceError> {
    if spec.is_empty() {
        return Ok(ResourcePolicy::default());
    }

    let host = if spec.needs_host_info() {
        let resource = if is_percentage(&spec.memory) {
            MEMORY
        } else {
            CPU
        };
        engine.host_resources().await.map_err(|e| {
            debug!(error = %e, "resources:host info query failed");
            ResourceError::HostInfoUnavailable { resource }
        })?
    } else {
        HostResources::default()
    };

    let policy = resolve(spec, host)?;
    debug!(memory = policy.memory, cpus = policy.cpus, "resources:resolved");
    Ok(policy)
}

fn is_percentage(s: &str) -> bool {
    s.trim().ends_with('%')
}

fn resolve_memory(spec: &str, host_total: i64) -> Result<i64, ResourceError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(0);
    }

    if is_percentage(spec) {
        let pct = parse_percentage(spec, MEMORY)?;
        if host_total <= 0 {
            return Err(ResourceError::HostInfoUnavailable { resource: MEMORY });
        }
        return Ok((host_total as f64 * pct / 100.0) as i64);
    }

    parse_ram_in_bytes(spec).ok_or_else(|| ResourceError::InvalidAbsoluteValue {
        resource: MEMORY,
        input: spec.to_string(),
    })
}

fn resolve_cpus(spec: &str, host_cpus: i64) -> Result<f64, ResourceError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(0.0);
    }

    if is_percentage(spec) {
        let pct = parse_percentage(spec, CPU)?;
        if host_cpus <= 0 {
            return Err(ResourceError::HostInfoUnavailable { resource: CPU });
        }
        return Ok(host_cpus as f64 * pct / 100.0);
    }

    match spec.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(ResourceError::InvalidAbsoluteValue {
            resource: CPU,
            input: spec.to_string(),
        }),
    }
}

/// Parse `N%` into `N`, accepting only `0 < N <= 100`.
fn parse_percentage(s: &str, resource: &'static str) -> Result<f64, ResourceError> {
    let invalid = || ResourceError::InvalidPercentage {
        resource,
        input: s.trim().to_string(),
    };
    let number = s.trim().strip_suffix('%').ok_or_else(invalid)?;
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !(value > 0.0 && value <= 100.0) {
        return Err(invalid());
    }
    Ok(value)
}

static RAM_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)*) ?([kKmMgGtTpP])?[iI]?[bB]?$").expect("valid size regex")
});

/// Parse a human size with binary units: `512m`, `1g`, `1.5GiB`, `1024`.
fn parse_ram_in_bytes(s: &str) -> Option<i64> {
    let caps = RAM_SIZE.captures(s)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier: i64 = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1,
        Some(unit) => match unit.as_str() {
            "k" => 1 << 10,
            "m" => 1 << 20,
            "g" => 1 << 30,
            "t" => 1 << 40,
            "p" => 1 << 50,
            _ => return None,
        },
    };
    Some((number * multiplier as f64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: i64 = 1024 * 1024 * 1024;

    fn host() -> HostResources {
        HostResources {
            memory_total: 16 * GIB,
            cpu_count: 8,
        }
    }

    fn spec(memory: &str, cpus: &str) -> ResourceSpec {
        ResourceSpec {
            memory: memory.to_string(),
            cpus: cpus.to_string(),
        }
    }

    #[test]
    fn test_parse_percentage_accepts_valid_range() {
        assert_eq!(parse_percentage("25%", MEMORY).unwrap(), 25.0);
        assert_eq!(parse_percentage("99.9%", MEMORY).unwrap(), 99.9);
        assert_eq!(parse_percentage("100%", MEMORY).unwrap(), 100.0);
        assert_eq!(parse_percentage("0.5%", MEMORY).unwrap(), 0.5);
        assert_eq!(parse_percentage("  25%  ", MEMORY).unwrap(), 25.0);
    }

    #[test]
    fn test_parse_percentage_rejects_out_of_range_and_garbage() {
        for input in ["0%", "-5%", "101%", "512m", "", "%", "abc%"] {
            assert!(
                matches!(
                    parse_percentage(input, MEMORY),
                    Err(ResourceError::InvalidPercentage { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_memory_binary_units() {
        assert_eq!(resolve_memory("512m", 0).unwrap(), 536_870_912);
        assert_eq!(resolve_memory("1g", 0).unwrap(), 1_073_741_824);
        assert_eq!(resolve_memory("1GiB", 0).unwrap(), GIB);
        assert_eq!(resolve_memory("1.5g", 0).unwrap(), GIB + GIB / 2);
        assert_eq!(resolve_memory("2048", 0).unwrap(), 2048);
        assert_eq!(resolve_memory("", 0).unwrap(), 0);
    }

    #[test]
    fn test_memory_percentage_of_host() {
        assert_eq!(resolve_memory("25%", 16 * GIB).unwrap(), 4 * GIB);
        assert_eq!(resolve_memory("50%", 16 * GIB).unwrap(), 8 * GIB);
    }

    #[test]
    fn test_memory_invalid_inputs() {
        assert!(matches!(
            resolve_memory("not-a-size", 16 * GIB),
            Err(ResourceError::InvalidAbsoluteValue { .. })
        ));
        assert!(matches!(
            resolve_memory("-1g", 16 * GIB),
            Err(ResourceError::InvalidAbsoluteValue { .. })
        ));
        assert_eq!(
            resolve_memory("25%", 0),
            Err(ResourceError::HostInfoUnavailable { resource: MEMORY })
        );
    }

    #[test]
    fn test_cpus_absolute_and_percentage() {
        assert_eq!(resolve_cpus("2.0", 8).unwrap(), 2.0);
        assert_eq!(resolve_cpus("0.5", 8).unwrap(), 0.5);
        assert_eq!(resolve_cpus("50%", 8).unwrap(), 4.0);
        assert_eq!(resolve_cpus("25%", 8).unwrap(), 2.0);
        assert_eq!(resolve_cpus("", 8).unwrap(), 0.0);
    }

    #[test]
    fn test_cpus_invalid_inputs() {
        assert!(matches!(
            resolve_cpus("-1", 8),
            Err(ResourceError::InvalidAbsoluteValue { .. })
        ));
        assert!(matches!(
            resolve_cpus("abc", 8),
            Err(ResourceError::InvalidAbsoluteValue { .. })
        ));
        assert!(matches!(
            resolve_cpus("101%", 8),
            Err(ResourceError::InvalidPercentage { .. })
        ));
        assert_eq!(
            resolve_cpus("50%", 0),
            Err(ResourceError::HostInfoUnavailable { resource: CPU })
        );
    }

    #[test]
    fn test_resolve_mixed_spec() {
        let policy = resolve(&spec("25%", "2"), host()).unwrap();
        assert_eq!(policy.memory, 4 * GIB);
        assert_eq!(policy.cpus, 2.0);

        let policy = resolve(&spec("", ""), HostResources::default()).unwrap();
        assert!(policy.is_unlimited());
    }

    #[test]
    fn test_merge_flag_wins() {
        let merged = merge("1g", 1.5, "512m", "2");
        assert_eq!(merged, spec("1g", "1.5"));
    }

    #[test]
    fn test_merge_falls_back_to_defaults() {
        let merged = merge("", 0.0, "25%", "50%");
        assert_eq!(merged, spec("25%", "50%"));
    }

    #[test]
    fn test_merge_whole_cpu_flag_has_no_trailing_zero() {
        assert_eq!(merge("", 2.0, "", "").cpus, "2");
    }

    #[test]
    fn test_apply_sets_limits() {
        let mut hc = HostConfig::default();
        ResourcePolicy {
            memory: 512 * 1024 * 1024,
            cpus: 1.5,
        }
        .apply(&mut hc);
        assert_eq!(hc.memory, Some(536_870_912));
        assert_eq!(hc.nano_cpus, Some(1_500_000_000));
    }

    #[test]
    fn test_apply_zero_policy_leaves_config_untouched() {
        let mut hc = HostConfig::default();
        ResourcePolicy::default().apply(&mut hc);
        assert_eq!(hc.memory, None);
        assert_eq!(hc.nano_cpus, None);
    }
}
