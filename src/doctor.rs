use std::path::Path;

use nodeflow_core::config::AppConfig;
use nodeflow_core::graph::{CONDITION, END, REPEAT, START};
use nodeflow_handlers::default_registry;
use nodeflow_store::GraphRepository;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig, config_source: Option<&Path>) {
    let checks = vec![
        // 1. Config file
        check_config(config_source),
        // 2. SQLite DB accessible
        check_database(config),
        // 3. Structural handlers registered
        check_handlers(config),
        // 4. Log sink policy consistent
        check_log_sink(config),
        // 5. Engine mode supported
        check_engine(config),
    ];

    // Print results
    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_config(source: Option<&Path>) -> CheckResult {
    CheckResult {
        label: "Config".into(),
        ok: true,
        detail: match source {
            Some(path) => format!("{}", path.display()),
            None => "No config file, using defaults".into(),
        },
    }
}

fn check_database(config: &AppConfig) -> CheckResult {
    let db_path = config.database_path();
    let listed = GraphRepository::open(&db_path).and_then(|repo| repo.list_scripts());
    match listed {
        Ok(scripts) => CheckResult {
            label: "Database".into(),
            ok: true,
            detail: format!("{} ({} scripts)", db_path.display(), scripts.len()),
        },
        Err(e) => CheckResult {
            label: "Database".into(),
            ok: false,
            detail: format!("{}: {}", db_path.display(), e),
        },
    }
}

fn check_handlers(config: &AppConfig) -> CheckResult {
    let registry = default_registry(&config.handlers);
    let missing: Vec<&str> = [START, END, CONDITION, REPEAT]
        .into_iter()
        .filter(|t| !registry.contains(t))
        .collect();

    if missing.is_empty() {
        CheckResult {
            label: "Handlers".into(),
            ok: true,
            detail: format!("{} registered", registry.len()),
        }
    } else {
        CheckResult {
            label: "Handlers".into(),
            ok: false,
            detail: format!("Missing: {}", missing.join(", ")),
        }
    }
}

fn check_log_sink(config: &AppConfig) -> CheckResult {
    let sink = &config.log_sink;
    if !sink.enabled {
        return CheckResult {
            label: "Log sink".into(),
            ok: true,
            detail: "Disabled (node execution logs are not recorded)".into(),
        };
    }
    if sink.timeout_ms == 0 {
        return CheckResult {
            label: "Log sink".into(),
            ok: false,
            detail: "timeout_ms is 0, every event would be dropped".into(),
        };
    }
    if sink.max_backoff_ms < sink.initial_backoff_ms {
        return CheckResult {
            label: "Log sink".into(),
            ok: false,
            detail: format!(
                "max_backoff_ms ({}) < initial_backoff_ms ({})",
                sink.max_backoff_ms, sink.initial_backoff_ms
            ),
        };
    }
    CheckResult {
        label: "Log sink".into(),
        ok: true,
        detail: format!(
            "{} retries, {}ms deadline",
            sink.max_retries, sink.timeout_ms
        ),
    }
}

fn check_engine(config: &AppConfig) -> CheckResult {
    if config.engine.parallel {
        CheckResult {
            label: "Engine".into(),
            ok: false,
            detail: "parallel = true is not supported, every run will be rejected".into(),
        }
    } else {
        CheckResult {
            label: "Engine".into(),
            ok: true,
            detail: "Sequential".into(),
        }
    }
}
