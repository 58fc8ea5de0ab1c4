use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=VERSION");

    // `VERSION` is set for release builds. Otherwise, use the package version plus the short Git hash when available.
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    let build_version = std::env::var("VERSION").unwrap_or_else(|_| match git_hash {
        Some(hash) => format!("{}-{}", pkg_version, hash),
        None => pkg_version.to_string(),
    });
    let current_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");

    println!("cargo:rustc-env=FFWD_VERSION={}", build_version);
    println!("cargo:rustc-env=FFWD_BUILD_DESC={} built {}", build_version, current_date);
}
