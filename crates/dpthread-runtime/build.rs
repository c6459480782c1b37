//! Build script for dpthread-runtime
//!
//! Handles configuration merging:
//! 1. Start with library defaults
//! 2. If DPT_CONFIG_RS env var is set, parse user's config file
//! 3. Merge user values over defaults (user wins)
//! 4. Generate OUT_DIR/dpt_merged_config.rs
//!
//! User only needs to specify values they want to change.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Configuration parameter definition
struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

/// All configuration parameters with their defaults
const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam { name: "NUM_CORES", rust_type: "usize", default_value: "4" },
    ConfigParam { name: "MAX_THREADS", rust_type: "usize", default_value: "100_000" },
    ConfigParam { name: "STACK_SIZE", rust_type: "usize", default_value: "256 * 1024" },
    ConfigParam { name: "GUARD_SIZE", rust_type: "usize", default_value: "256 * 1024" },
    ConfigParam { name: "RQ_SIZE", rust_type: "usize", default_value: "32" },
    ConfigParam { name: "SOFTIRQ_LOCAL_BUDGET", rust_type: "u32", default_value: "16" },
    ConfigParam { name: "SOFTIRQ_REMOTE_BUDGET", rust_type: "u32", default_value: "16" },
    ConfigParam { name: "SCHED_POLL_ITERS", rust_type: "u32", default_value: "0" },
    ConfigParam { name: "SCHED_MIN_POLL_US", rust_type: "u64", default_value: "10" },
    ConfigParam { name: "WATCHDOG_US", rust_type: "u64", default_value: "50" },
    ConfigParam { name: "DISABLE_WATCHDOG", rust_type: "bool", default_value: "false" },
    ConfigParam { name: "PMC_US", rust_type: "u64", default_value: "10" },
    ConfigParam { name: "PARK_TIMEOUT_MS", rust_type: "u64", default_value: "100" },
    ConfigParam { name: "STACK_CACHE", rust_type: "usize", default_value: "256" },
    ConfigParam { name: "PIN_CORES", rust_type: "bool", default_value: "false" },
    ConfigParam { name: "DEBUG_LOGGING", rust_type: "bool", default_value: "false" },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("dpt_merged_config.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("DPT_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                parse_and_merge(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read DPT_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=DPT_CONFIG_RS");

    let output = generate_config(&config);
    fs::write(&dest_path, &output).expect("Failed to write merged config");
}

/// Parse user's config file and merge known values into config map
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) {
    for line in content.lines() {
        let line = line.trim();
        if !line.starts_with("pub const ") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// Parse `pub const NAME: TYPE = VALUE;` into (name, value)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();

    Some((name, value))
}

fn generate_config(config: &HashMap<&str, String>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Configuration merged from library defaults");
    if env::var("DPT_CONFIG_RS").is_ok() {
        output.push_str(" and user's dpt_config.rs");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = &config[param.name];
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        let result = parse_const_line("pub const NUM_CORES: usize = 8;");
        assert_eq!(result, Some(("NUM_CORES".into(), "8".into())));

        let result = parse_const_line("pub const STACK_SIZE: usize = 64 * 1024;");
        assert_eq!(result, Some(("STACK_SIZE".into(), "64 * 1024".into())));
    }

    #[test]
    fn test_parse_and_merge() {
        let mut config: HashMap<&str, String> = HashMap::new();
        config.insert("NUM_CORES", "4".into());
        config.insert("RQ_SIZE", "32".into());

        let user_config = r#"
            // Custom config
            pub const NUM_CORES: usize = 16;
            pub const RQ_SIZE: usize = 64;
        "#;
        parse_and_merge(user_config, &mut config);

        assert_eq!(config.get("NUM_CORES"), Some(&"16".to_string()));
        assert_eq!(config.get("RQ_SIZE"), Some(&"64".to_string()));
    }
}
