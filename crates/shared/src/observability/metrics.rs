//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
///
/// Drop 时停止指标 HTTP 服务器。
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通知管道的指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notifications_total",
        "Total number of processed notifications by final status"
    );
    metrics::describe_counter!(
        "notification_attempts_total",
        "Total number of transport attempts by result"
    );
    metrics::describe_histogram!(
        "notification_delivery_duration_seconds",
        "Time from first attempt to final outcome in seconds"
    );
    metrics::describe_counter!(
        "consumer_messages_total",
        "Total number of consumed messages by handling result"
    );
    metrics::describe_counter!(
        "consumer_stream_faults_total",
        "Total number of stream-level faults reported by the source"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一个事件的最终投递结果
#[inline]
pub fn record_notification(status: &str, attempts: u32, duration_secs: f64) {
    let sent = status == "sent";
    let failed_attempts = if sent { attempts.saturating_sub(1) } else { attempts };

    metrics::counter!("notifications_total", "status" => status.to_string()).increment(1);
    metrics::counter!("notification_attempts_total", "result" => "failed")
        .increment(u64::from(failed_attempts));
    if sent {
        metrics::counter!("notification_attempts_total", "result" => "sent").increment(1);
    }
    metrics::histogram!("notification_delivery_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}

/// 记录消费循环对单条消息的处理结果
#[inline]
pub fn record_consumed_message(result: &str) {
    metrics::counter!("consumer_messages_total", "result" => result.to_string()).increment(1);
}

/// 记录流级故障
#[inline]
pub fn record_stream_fault(fatal: bool) {
    metrics::counter!("consumer_stream_faults_total", "fatal" => fatal.to_string()).increment(1);
}
