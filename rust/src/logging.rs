// `parley_core::reconcile` emits one debug event per merged row; devices keep it at info.
#[cfg_attr(not(any(target_os = "ios", target_os = "android")), allow(dead_code))]
const DEVICE_FILTER: &str = "parley_core=debug,parley_core::reconcile=info,reqwest=info,info";
#[cfg_attr(any(target_os = "ios", target_os = "android"), allow(dead_code))]
const DESKTOP_FILTER: &str = "parley_core=debug,info";

/// Platform-native logging initialization.
///
/// - iOS: tracing-oslog → Apple unified logging (os_log) + file fallback
/// - Android: paranoid-android → logcat
/// - Tests / desktop: tracing-subscriber::fmt → stderr
///
/// Called once at the start of `FfiApp::new()`. Later calls are no-ops.
///
/// On iOS the file fallback writes to `<data_dir>/parley.log`.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let os_log = tracing_oslog::OsLogger::new("com.parley.app", "default");

        let log_path = std::path::Path::new(data_dir).join("parley.log");
        let _ = std::fs::create_dir_all(data_dir);
        let env_filter = tracing_subscriber::EnvFilter::new(DEVICE_FILTER);

        let file_layer = if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        } else {
            None
        };

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(os_log)
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let android_layer = paranoid_android::layer("parley").with_filter(
            tracing_subscriber::EnvFilter::new(DEVICE_FILTER),
        );

        let _ = tracing_subscriber::registry()
            .with(android_layer)
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| DESKTOP_FILTER.into()),
            )
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn filters_parse_and_quiet_reconcile_on_devices() {
        for raw in [DEVICE_FILTER, DESKTOP_FILTER] {
            assert!(tracing_subscriber::EnvFilter::try_new(raw).is_ok(), "{raw}");
        }
        assert!(DEVICE_FILTER.contains("parley_core::reconcile=info"));
        let filter = tracing_subscriber::EnvFilter::new(DESKTOP_FILTER);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
