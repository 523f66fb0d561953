use crate::domain::{CompensationPlan, Decimal, PackageTier, SpilloverPolicy};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Attempts per event before a conflict is surfaced as transient.
    pub max_event_attempts: u32,
    pub plan: CompensationPlan,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(key.to_string(), reason.into())
}

fn parse_decimal(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str_canonical(raw.trim()).map_err(|_| invalid(key, "must be a decimal number"))
}

fn parse_decimal_list(key: &str, raw: &str) -> Result<Vec<Decimal>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_decimal(key, s))
        .collect()
}

/// `name:monthly_amount` pairs separated by commas.
fn parse_tiers(raw: &str) -> Result<Vec<PackageTier>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (name, amount) = entry
                .split_once(':')
                .ok_or_else(|| invalid("PACKAGE_TIERS", format!("expected name:amount, got {}", entry)))?;
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                return Err(invalid("PACKAGE_TIERS", "tier name must not be empty"));
            }
            Ok(PackageTier {
                name,
                monthly_amount: parse_decimal("PACKAGE_TIERS", amount)?,
            })
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| invalid("PORT", "must be a valid u16"))?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let max_event_attempts = env_map
            .get("MAX_EVENT_ATTEMPTS")
            .map(|s| s.as_str())
            .unwrap_or("5")
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| invalid("MAX_EVENT_ATTEMPTS", "must be a positive integer"))?;

        let plan = plan_from_env_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            max_event_attempts,
            plan,
        })
    }
}

/// Overlay plan variables onto the reference plan and validate the result.
fn plan_from_env_map(env_map: &HashMap<String, String>) -> Result<CompensationPlan, ConfigError> {
    let mut plan = CompensationPlan::reference();
    let get = |key: &str| env_map.get(key).map(|s| s.as_str());

    if let Some(v) = get("PLAN_VERSION") {
        let v = v.trim();
        if v.is_empty() {
            return Err(invalid("PLAN_VERSION", "must not be empty"));
        }
        plan.version = v.to_string();
    }

    for (key, field) in [
        ("DIRECT_RATE", &mut plan.direct_rate),
        ("BINARY_RATE", &mut plan.binary_rate),
        ("LEVEL_POOL_RATE", &mut plan.level_pool_rate),
        ("AUTOPOOL_FUNDING_RATE", &mut plan.autopool_funding_rate),
        ("AUTOPOOL_THRESHOLD", &mut plan.autopool_threshold),
        ("COMPANY_CHARGE_RATE", &mut plan.company_charge_rate),
    ] {
        if let Some(raw) = get(key) {
            *field = parse_decimal(key, raw)?;
        }
    }

    for (key, field) in [
        ("MAX_LEVELS", &mut plan.max_levels),
        ("LEVELS_PER_REFERRAL", &mut plan.levels_per_referral),
        ("INSTALLMENT_COUNT", &mut plan.installment_count),
    ] {
        if let Some(raw) = get(key) {
            *field = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid(key, "must be a non-negative integer"))?;
        }
    }

    if let Some(raw) = get("LATE_GRACE_DAYS") {
        plan.late_grace_days = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("LATE_GRACE_DAYS", "must be an integer"))?;
    }
    if let Some(raw) = get("LEVEL_WEIGHTS") {
        plan.level_weights = parse_decimal_list("LEVEL_WEIGHTS", raw)?;
    } else if plan.max_levels as usize != plan.level_weights.len() {
        plan.level_weights.truncate(plan.max_levels as usize);
    }
    if let Some(raw) = get("AUTOPOOL_LEVEL_WEIGHTS") {
        plan.autopool_level_weights = parse_decimal_list("AUTOPOOL_LEVEL_WEIGHTS", raw)?;
    }
    if let Some(raw) = get("PACKAGE_TIERS") {
        plan.tiers = parse_tiers(raw)?;
    }

    plan.spillover = match get("SPILLOVER_POLICY").map(str::trim).unwrap_or("outer_leg") {
        "outer_leg" => SpilloverPolicy::OuterLeg,
        "reject" => SpilloverPolicy::Reject,
        other => {
            return Err(invalid(
                "SPILLOVER_POLICY",
                format!("must be outer_leg or reject, got {}", other),
            ))
        }
    };

    plan.validate()
        .map_err(|e| invalid("compensation plan", e.to_string()))?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults_use_reference_plan() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_event_attempts, 5);
        assert_eq!(config.plan, CompensationPlan::reference());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("MAX_EVENT_ATTEMPTS".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "MAX_EVENT_ATTEMPTS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_plan_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("PLAN_VERSION".to_string(), "2025-q1".to_string());
        env_map.insert("DIRECT_RATE".to_string(), "0.07".to_string());
        env_map.insert("MAX_LEVELS".to_string(), "3".to_string());
        env_map.insert("LEVEL_WEIGHTS".to_string(), "0.5, 0.3, 0.2".to_string());
        env_map.insert("PACKAGE_TIERS".to_string(), "Starter:500,pro:2500".to_string());
        env_map.insert("SPILLOVER_POLICY".to_string(), "reject".to_string());

        let plan = Config::from_env_map(env_map).unwrap().plan;
        assert_eq!(plan.version, "2025-q1");
        assert_eq!(plan.direct_rate, Decimal::from_str_canonical("0.07").unwrap());
        assert_eq!(plan.level_weights.len(), 3);
        assert_eq!(plan.tier("starter").unwrap().monthly_amount, Decimal::from_i64(500));
        assert_eq!(plan.spillover, SpilloverPolicy::Reject);
    }

    #[test]
    fn test_invalid_spillover_policy() {
        let mut env_map = setup_required_env();
        env_map.insert("SPILLOVER_POLICY".to_string(), "random".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SPILLOVER_POLICY"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_plan_is_validated() {
        let mut env_map = setup_required_env();
        env_map.insert("LEVEL_WEIGHTS".to_string(), "0.9,0.9".to_string());
        assert!(matches!(
            Config::from_env_map(env_map),
            Err(ConfigError::InvalidValue(_, _))
        ));

        let mut env_map = setup_required_env();
        env_map.insert("PACKAGE_TIERS".to_string(), "gold".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PACKAGE_TIERS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_oversized_late_grace_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("LATE_GRACE_DAYS".to_string(), "1000000000".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(_, msg)) => assert!(msg.contains("late grace days")),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
