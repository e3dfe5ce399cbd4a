//! 可观测性模块集成测试
//!
//! 通过本地 Prometheus recorder 验证指标的名称与标签，不启动 HTTP 服务器。

use metrics_exporter_prometheus::PrometheusBuilder;
use notification_shared::config::ObservabilityConfig;
use notification_shared::observability::metrics::{
    record_consumed_message, record_notification, record_stream_fault,
};
use notification_shared::observability::tracing::{LogFormat, env_filter};

/// 在本地 recorder 上执行指标记录，返回渲染后的文本
fn render_with(record: impl FnOnce()) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, record);
    handle.render()
}

#[test]
fn test_sent_notification_counts_failed_attempts_before_success() {
    let output = render_with(|| record_notification("sent", 3, 3.2));

    assert!(output.contains(r#"notifications_total{status="sent"} 1"#));
    assert!(output.contains(r#"notification_attempts_total{result="failed"} 2"#));
    assert!(output.contains(r#"notification_attempts_total{result="sent"} 1"#));
    assert!(output.contains("notification_delivery_duration_seconds"));
}

#[test]
fn test_failed_notification_counts_every_attempt_as_failed() {
    let output = render_with(|| record_notification("failed", 3, 3.0));

    assert!(output.contains(r#"notifications_total{status="failed"} 1"#));
    assert!(output.contains(r#"notification_attempts_total{result="failed"} 3"#));
    assert!(!output.contains(r#"notification_attempts_total{result="sent"}"#));
}

#[test]
fn test_consumer_metrics_labels() {
    let output = render_with(|| {
        record_consumed_message("sent");
        record_consumed_message("DECODE_ERROR");
        record_consumed_message("DECODE_ERROR");
        record_stream_fault(false);
        record_stream_fault(true);
    });

    assert!(output.contains(r#"consumer_messages_total{result="sent"} 1"#));
    assert!(output.contains(r#"consumer_messages_total{result="DECODE_ERROR"} 2"#));
    assert!(output.contains(r#"consumer_stream_faults_total{fatal="false"} 1"#));
    assert!(output.contains(r#"consumer_stream_faults_total{fatal="true"} 1"#));
}

#[test]
fn test_log_format_from_config() {
    let config = ObservabilityConfig::default();
    assert_eq!(LogFormat::parse(&config.log_format), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
}

#[test]
fn test_env_filter_uses_configured_level() {
    let config = ObservabilityConfig {
        log_level: "notification_worker=debug,info".to_string(),
        ..ObservabilityConfig::default()
    };
    let filter = env_filter(&config);
    // RUST_LOG 未设置时采用配置值
    if std::env::var("RUST_LOG").is_err() {
        assert!(filter.to_string().contains("notification_worker=debug"));
    }
}
