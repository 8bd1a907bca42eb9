const fn unwrap_or_cargo_version(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Build-time override via `AWGBOT_BUILD_VERSION`, else the crate version.
pub const VERSION: &str = unwrap_or_cargo_version(option_env!("AWGBOT_BUILD_VERSION"));
