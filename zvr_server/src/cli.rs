use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // PAYMENT_SERVER_KEY and SHIPPING_API_KEY are never printed
    const DISPLAY_ENVS: [&str; 16] = [
        "RUST_LOG",
        "ZVR_HOST",
        "ZVR_PORT",
        "DB_URL",
        "DB_MAX_CONNECTIONS",
        "DB_BUSY_TIMEOUT_SECS",
        "PAYMENT_ENVIRONMENT",
        "SHIPPING_ORIGIN_POSTAL_CODE",
        "SHIPPING_FALLBACK_COST",
        "ENABLE_TRACKING_JOB",
        "SKIP_GATEWAY_REFUND",
        "ORDER_EXPIRY_HOURS",
        "AUTO_COMPLETE_DAYS",
        "RECONCILIATION_HOUR",
        "ZVR_USE_X_FORWARDED_FOR",
        "ZVR_USE_FORWARDED",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
