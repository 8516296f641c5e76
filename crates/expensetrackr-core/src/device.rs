//! Device descriptor sent with login and register requests.
//!
//! A configured name always wins; otherwise the name is generated from the
//! platform and crate version, e.g. `ExpenseTrackr Linux v0.1.0`.

/// Product name leading every generated device name
pub const PRODUCT_NAME: &str = "ExpenseTrackr";

pub fn device_name(custom: Option<&str>) -> String {
    match custom.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => generated_device_name(std::env::consts::OS, env!("CARGO_PKG_VERSION")),
    }
}

fn generated_device_name(os: &str, version: &str) -> String {
    format!("{} {} v{}", PRODUCT_NAME, platform_label(os), version)
}

fn platform_label(os: &str) -> String {
    match os {
        "linux" => "Linux".to_string(),
        "macos" => "macOS".to_string(),
        "windows" => "Windows".to_string(),
        "ios" => "iOS".to_string(),
        "android" => "Android".to_string(),
        "freebsd" => "FreeBSD".to_string(),
        other => other.to_string(),
    }
}
