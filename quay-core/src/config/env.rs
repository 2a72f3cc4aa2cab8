//! `${VAR}` substitution over the raw configuration text.
//!
//! Substitution happens before JSON parsing so a variable can hold any
//! fragment of a value. Non-critical variables fall back to built-in
//! defaults; critical ones (`DB_PASSWORD`, `JWT_SECRET`, `PASSWORD_SALT`)
//! fail the load in production when unset, left at their development
//! default, or obviously weak.

use super::ConfigError;

/// Development fallback values. The critical entries exist so a bare
/// checkout runs locally; production mode refuses them.
const DEFAULTS: &[(&str, &str)] = &[
    ("DB_HOST", "localhost"),
    ("DB_NAME", "appdb"),
    ("DB_USER", "appuser"),
    ("DB_PASSWORD", "dev-password"),
    ("JWT_SECRET", "dev-jwt-secret-do-not-use-in-prod"),
    ("PASSWORD_SALT", "dev-salt"),
];

const CRITICAL: &[&str] = &["DB_PASSWORD", "JWT_SECRET", "PASSWORD_SALT"];

const WEAK_PASSWORD_TOKENS: &[&str] = &["password", "123456", "changeme", "secret", "admin"];

/// Whether the process runs in production mode
/// (`ENVIRONMENT=PRODUCTION` or `APP_ENV=PROD`, case-insensitive).
pub fn is_production() -> bool {
    let matches = |var: &str, expected: &str| {
        std::env::var(var)
            .map(|v| v.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    };
    matches("ENVIRONMENT", "PRODUCTION") || matches("APP_ENV", "PROD")
}

fn default_for(name: &str) -> Option<&'static str> {
    DEFAULTS
        .iter()
        .find(|(var, _)| *var == name)
        .map(|(_, value)| *value)
}

fn is_weak(name: &str, value: &str) -> bool {
    match name {
        "JWT_SECRET" => value.len() < 32,
        "DB_PASSWORD" | "PASSWORD_SALT" => {
            let lowered = value.to_lowercase();
            WEAK_PASSWORD_TOKENS.iter().any(|t| lowered.contains(t))
        }
        _ => false,
    }
}

/// Resolve a single `${...}` reference.
fn resolve(name: &str, production: bool) -> Result<String, ConfigError> {
    let critical = CRITICAL.contains(&name);
    let from_env = std::env::var(name).ok().filter(|v| !v.is_empty());

    if production && critical {
        let value = from_env.ok_or_else(|| ConfigError::MissingEnv(name.to_string()))?;
        if default_for(name).is_some_and(|d| d == value) || is_weak(name, &value) {
            return Err(ConfigError::WeakSecret(name.to_string()));
        }
        return Ok(value);
    }

    if let Some(value) = from_env {
        return Ok(value);
    }
    default_for(name)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

/// Substitute every `${VAR}` token in `raw`.
pub fn substitute(raw: &str) -> Result<String, ConfigError> {
    let production = is_production();
    let mut result = raw.to_string();
    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .ok_or_else(|| ConfigError::Invalid(format!(
                "unclosed ${{...}} placeholder near byte {start}"
            )))?;
        let name = result[start + 2..start + end].trim().to_string();
        let resolved = resolve(&name, production)?;
        result = format!("{}{}{}", &result[..start], resolved, &result[start + end + 1..]);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "ENVIRONMENT",
            "APP_ENV",
            "DB_HOST",
            "DB_PASSWORD",
            "JWT_SECRET",
            "PASSWORD_SALT",
            "QUAY_TEST_VAR",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn substitutes_from_environment() {
        clear_env();
        std::env::set_var("QUAY_TEST_VAR", "from-env");
        assert_eq!(substitute("a ${QUAY_TEST_VAR} b").unwrap(), "a from-env b");
    }

    #[test]
    #[serial]
    fn falls_back_to_builtin_default() {
        clear_env();
        assert_eq!(substitute("${DB_HOST}").unwrap(), "localhost");
    }

    #[test]
    #[serial]
    fn unknown_variable_without_default_fails() {
        clear_env();
        let err = substitute("${NO_SUCH_QUAY_VAR}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "NO_SUCH_QUAY_VAR"));
    }

    #[test]
    #[serial]
    fn unclosed_placeholder_fails() {
        clear_env();
        assert!(matches!(
            substitute("${DB_HOST"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    #[serial]
    fn production_rejects_unset_critical() {
        clear_env();
        std::env::set_var("ENVIRONMENT", "production");
        let err = substitute("${JWT_SECRET}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(_)));
    }

    #[test]
    #[serial]
    fn production_rejects_short_jwt_secret() {
        clear_env();
        std::env::set_var("APP_ENV", "PROD");
        std::env::set_var("JWT_SECRET", "short");
        let err = substitute("${JWT_SECRET}").unwrap_err();
        assert!(matches!(err, ConfigError::WeakSecret(_)));
    }

    #[test]
    #[serial]
    fn production_rejects_obvious_password() {
        clear_env();
        std::env::set_var("ENVIRONMENT", "PRODUCTION");
        std::env::set_var("DB_PASSWORD", "MyPassword2024");
        let err = substitute("${DB_PASSWORD}").unwrap_err();
        assert!(matches!(err, ConfigError::WeakSecret(name) if name == "DB_PASSWORD"));
    }

    #[test]
    #[serial]
    fn production_accepts_strong_critical() {
        clear_env();
        std::env::set_var("ENVIRONMENT", "PRODUCTION");
        std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef-xk");
        assert_eq!(
            substitute("${JWT_SECRET}").unwrap(),
            "0123456789abcdef0123456789abcdef-xk"
        );
    }
}
