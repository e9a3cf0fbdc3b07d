use std::collections::HashMap;
use std::fs;

/// Dependencies to expose as compile-time env vars for `docudesk-cli about`
const TRACKED_DEPS: &[&str] = &[
    "tokio",
    "serde",
    "serde_json",
    "reqwest",
    "oauth2",
    "secrecy",
    "tracing",
    "clap",
];

fn main() {
    // A missing lock file only means versions are reported as unknown
    let lock_contents = fs::read_to_string("Cargo.lock").unwrap_or_default();

    let versions = parse_cargo_lock(&lock_contents);

    for dep_name in TRACKED_DEPS {
        let env_key = format!("DEP_VERSION_{}", dep_name.to_uppercase().replace('-', "_"));
        let version = versions.get(*dep_name).map(|v| v.as_str()).unwrap_or("unknown");
        println!("cargo:rustc-env={env_key}={version}");
    }

    println!("cargo:rerun-if-changed=Cargo.lock");

    // Detect Rust compiler version at build time: "rustc 1.84.0 (...)" → "1.84.0"
    if let Ok(output) = std::process::Command::new("rustc").arg("--version").output() {
        let ver_line = String::from_utf8_lossy(&output.stdout);
        let ver = ver_line.split_whitespace().nth(1).unwrap_or("unknown");
        println!("cargo:rustc-env=RUSTC_VERSION={ver}");
    } else {
        println!("cargo:rustc-env=RUSTC_VERSION=unknown");
    }
}

/// Highest locked version of every tracked package. A crate can be locked
/// more than once (a transitive 0.12 next to our direct 0.13); the direct
/// dependency is the newest one.
fn parse_cargo_lock(contents: &str) -> HashMap<String, String> {
    let mut versions: HashMap<String, String> = HashMap::new();

    for block in contents.split("[[package]]").skip(1) {
        let field = |key: &str| {
            block.lines().find_map(|line| {
                line.trim()
                    .strip_prefix(key)
                    .and_then(|rest| rest.trim_start().strip_prefix("= \""))
                    .and_then(|rest| rest.strip_suffix('"'))
            })
        };
        let (Some(name), Some(version)) = (field("name"), field("version")) else {
            continue;
        };
        if !TRACKED_DEPS.contains(&name) {
            continue;
        }
        let newer = versions
            .get(name)
            .map_or(true, |known| semver_key(version) > semver_key(known));
        if newer {
            versions.insert(name.to_string(), version.to_string());
        }
    }

    versions
}

fn semver_key(version: &str) -> Vec<u64> {
    version.split('.').filter_map(|p| p.parse().ok()).collect()
}
