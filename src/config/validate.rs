use crate::config::types::AppConfig;

/// Checks an [`AppConfig`] for problems that would only surface once the reactor is already
/// running (missing document root, nonsensical pool sizes). Returns the list of human-readable
/// problems found; an empty list means the config is fit to start the server with.
pub fn validate_config(config: &AppConfig) -> Vec<String> {
    let mut problems = Vec::new();

    match std::fs::metadata(&config.document_root) {
        Ok(meta) if !meta.is_dir() => {
            problems.push(format!(
                "document_root '{}' exists but is not a directory",
                config.document_root
            ));
        }
        Err(e) => {
            problems.push(format!(
                "document_root '{}' is not accessible: {}",
                config.document_root, e
            ));
        }
        _ => {}
    }

    if config.port == 0 {
        problems.push("port must be nonzero".to_string());
    }
    if config.db_pool_size == 0 {
        problems.push("db_pool_size must be at least 1".to_string());
    }
    if config.thread_count == 0 {
        problems.push("thread_count must be at least 1".to_string());
    }
    if config.db_name.is_empty() {
        problems.push("db_name must not be empty".to_string());
    }

    for problem in &problems {
        println!("\x1b[1;31mConfig error:\x1b[0m {}", problem);
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(root: &str) -> AppConfig {
        let mut c = AppConfig::default();
        c.document_root = root.to_string();
        c.db_name = "webserver".to_string();
        c
    }

    #[test]
    fn valid_config_has_no_problems() {
        let temp_dir = std::env::temp_dir();
        let config = base_config(temp_dir.to_str().unwrap());
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn missing_root_is_a_problem() {
        let config = base_config("/nonexistent/path/for/sure");
        let problems = validate_config(&config);
        assert!(problems.iter().any(|p| p.contains("document_root")));
    }

    #[test]
    fn zero_port_is_a_problem() {
        let temp_dir = std::env::temp_dir();
        let mut config = base_config(temp_dir.to_str().unwrap());
        config.port = 0;
        let problems = validate_config(&config);
        assert!(problems.iter().any(|p| p.contains("port")));
    }

    #[test]
    fn zero_pool_size_is_a_problem() {
        let temp_dir = std::env::temp_dir();
        let mut config = base_config(temp_dir.to_str().unwrap());
        config.db_pool_size = 0;
        let problems = validate_config(&config);
        assert!(problems.iter().any(|p| p.contains("db_pool_size")));
    }
}
