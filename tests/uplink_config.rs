use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use motion_uplink::config::{ConfigOverrides, UplinkConfig};
use motion_uplink::SendPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTION_UPLINK_CONFIG",
        "MOTION_UPLINK_URL",
        "MOTION_UPLINK_CAMERA",
        "MOTION_UPLINK_MOTION_SOURCE",
        "MOTION_UPLINK_ACTIVE_SECS",
        "MOTION_UPLINK_FRAME_INTERVAL_SECS",
        "MOTION_UPLINK_DEBOUNCE_SECS",
        "MOTION_UPLINK_SEND_POLICY",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "endpoint": { "url": "https://cats.example.com/upload", "timeout_secs": 5 },
            "timing": {
                "active_duration_secs": 60,
                "frame_interval_secs": 2.5,
                "motion_debounce_secs": 3,
                "send_policy": "on_attempt"
            },
            "camera": { "device": "stub://porch", "width": 320, "height": 240, "warmup_secs": 0 },
            "motion": { "source": "/sys/class/gpio/gpio17/value", "active_low": true },
            "upload": { "name_prefix": "porch_", "jpeg_quality": 85 },
            "loop": { "poll_interval_ms": 20, "status_interval_secs": 30 }
        }"#,
    );

    std::env::set_var("MOTION_UPLINK_CONFIG", file.path());
    std::env::set_var("MOTION_UPLINK_ACTIVE_SECS", "90");
    std::env::set_var("MOTION_UPLINK_FRAME_INTERVAL_SECS", "1.5");
    std::env::set_var("MOTION_UPLINK_DEBOUNCE_SECS", "10");
    std::env::set_var("MOTION_UPLINK_CAMERA", "stub://garage");
    std::env::set_var("MOTION_UPLINK_MOTION_SOURCE", "stub://every/20");

    let cfg = UplinkConfig::load().expect("load config");

    assert_eq!(cfg.endpoint_url, "https://cats.example.com/upload");
    assert_eq!(cfg.upload_timeout, Duration::from_secs(5));
    assert_eq!(cfg.timing.active_duration, Duration::from_secs(90));
    assert_eq!(cfg.timing.frame_interval, Duration::from_millis(1500));
    assert_eq!(cfg.timing.motion_debounce, Duration::from_secs(10));
    assert_eq!(cfg.timing.send_policy, SendPolicy::OnAttempt);
    assert_eq!(cfg.camera.device, "stub://garage");
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.warmup, Duration::ZERO);
    assert_eq!(cfg.motion.source, "stub://every/20");
    assert!(cfg.motion.active_low);
    assert_eq!(cfg.name_prefix, "porch_");
    assert_eq!(cfg.jpeg_quality, 85);
    assert_eq!(cfg.poll_interval, Duration::from_millis(20));
    assert_eq!(cfg.status_interval, Duration::from_secs(30));

    clear_env();
}

#[test]
fn loads_toml_config_and_fills_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[endpoint]
url = "http://10.0.0.5:8000/api/frames"
"#,
    );

    let cfg = UplinkConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.endpoint_url, "http://10.0.0.5:8000/api/frames");
    assert_eq!(cfg.upload_timeout, Duration::from_secs(10));
    assert_eq!(cfg.timing.active_duration, Duration::from_secs(120));
    assert_eq!(cfg.timing.frame_interval, Duration::from_secs(5));
    assert_eq!(cfg.timing.motion_debounce, Duration::from_secs(5));
    assert_eq!(cfg.timing.send_policy, SendPolicy::OnSuccess);
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.warmup, Duration::from_secs(1));
    assert_eq!(cfg.name_prefix, "cat_");
    assert_eq!(cfg.jpeg_quality, 70);

    clear_env();
}

#[test]
fn send_policy_env_overrides_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[endpoint]
url = "https://cats.example.com/upload"

[timing]
send_policy = "on_success"
"#,
    );

    std::env::set_var("MOTION_UPLINK_SEND_POLICY", "Attempt");
    let cfg = UplinkConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.timing.send_policy, SendPolicy::OnAttempt);

    std::env::set_var("MOTION_UPLINK_SEND_POLICY", "on_success");
    let cfg = UplinkConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.timing.send_policy, SendPolicy::OnSuccess);

    std::env::set_var("MOTION_UPLINK_SEND_POLICY", "sometimes");
    let err = UplinkConfig::load_from(Some(file.path())).expect_err("bad policy");
    assert!(err.to_string().contains("MOTION_UPLINK_SEND_POLICY"));

    clear_env();
}

#[test]
fn url_may_come_from_env_or_overrides_alone() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_UPLINK_URL", "https://env.example.com/u");
    let cfg = UplinkConfig::load_from(None).expect("load config");
    assert_eq!(cfg.endpoint_url, "https://env.example.com/u");

    let overrides = ConfigOverrides {
        url: Some("https://cli.example.com/u".to_string()),
        camera: Some("stub://cli".to_string()),
        motion: Some("stub://every/10".to_string()),
    };
    let cfg = UplinkConfig::load_with(None, &overrides).expect("load config");
    assert_eq!(cfg.endpoint_url, "https://cli.example.com/u");
    assert_eq!(cfg.camera.device, "stub://cli");
    assert_eq!(cfg.motion.source, "stub://every/10");

    clear_env();
}

#[test]
fn rejects_invalid_configs() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    // Missing URL.
    assert!(UplinkConfig::load_from(None).is_err());

    let cases = [
        r#"{ "endpoint": { "url": "ftp://example.com/" } }"#,
        r#"{ "endpoint": { "url": "https://example.com/", "timeout_secs": 0 } }"#,
        r#"{ "endpoint": { "url": "https://example.com/" }, "timing": { "active_duration_secs": 0 } }"#,
        r#"{ "endpoint": { "url": "https://example.com/" }, "timing": { "frame_interval_secs": -1 } }"#,
        r#"{ "endpoint": { "url": "https://example.com/" }, "timing": { "send_policy": "sometimes" } }"#,
        r#"{ "endpoint": { "url": "https://example.com/" }, "upload": { "jpeg_quality": 0 } }"#,
        r#"{ "endpoint": { "url": "https://example.com/" }, "camera": { "width": 0 } }"#,
        r#"{ "endpoint": { "url": "https://example.com/" }, "unknown": true }"#,
    ];
    for case in cases {
        let file = config_file(".json", case);
        assert!(
            UplinkConfig::load_from(Some(file.path())).is_err(),
            "config should be rejected: {}",
            case
        );
    }

    std::env::set_var("MOTION_UPLINK_URL", "https://example.com/");
    std::env::set_var("MOTION_UPLINK_ACTIVE_SECS", "soon");
    assert!(UplinkConfig::load_from(None).is_err());

    clear_env();
}
