use std::process::Command;

fn release_override() -> Option<String> {
    let raw = std::env::var("LIVELIST_VERSION").ok()?;
    let trimmed = raw.trim();
    let version = trimmed.strip_prefix('v').unwrap_or(trimmed);
    (!version.is_empty()).then(|| version.to_string())
}

fn short_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=LIVELIST_VERSION");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let version = release_override().unwrap_or_else(|| {
        let base = env!("CARGO_PKG_VERSION");
        match short_commit() {
            Some(hash) => format!("{base}+g{hash}"),
            None => base.to_string(),
        }
    });
    println!("cargo:rustc-env=LIVELIST_BUILD_VERSION={version}");
}
