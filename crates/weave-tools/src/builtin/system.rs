use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use weave_core::error::{Result, WeaveError};
use weave_core::traits::Tool;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

// ── GetIpAddressTool ────────────────────────────────────────────

pub struct GetIpAddressTool;

/// Connecting a UDP socket selects a route without sending packets.
async fn local_ip() -> Option<String> {
    let sock = tokio::net::UdpSocket::bind("0.0.0.0:0").await.ok()?;
    sock.connect("8.8.8.8:80").await.ok()?;
    sock.local_addr().ok().map(|addr| addr.ip().to_string())
}

impl Tool for GetIpAddressTool {
    fn name(&self) -> &str {
        "get_ip_address"
    }
    fn description(&self) -> &str {
        "Return the primary local IP address of this machine."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn execute(&self, _args: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let ip = local_ip().await.unwrap_or_else(|| "Unavailable".into());
            Ok(Value::String(ip))
        })
    }
}

// ── GetOsInfoTool ───────────────────────────────────────────────

pub struct GetOsInfoTool;

impl Tool for GetOsInfoTool {
    fn name(&self) -> &str {
        "get_os_info"
    }
    fn description(&self) -> &str {
        "Return the operating system name, version, and architecture."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn execute(&self, _args: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let version = tokio::process::Command::new("uname")
                .arg("-r")
                .output()
                .await
                .ok()
                .filter(|o| o.status.success())
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
                .unwrap_or_else(|| "unknown".into());
            Ok(json!({
                "os": std::env::consts::OS,
                "os_version": version,
                "architecture": std::env::consts::ARCH,
                "family": std::env::consts::FAMILY,
            }))
        })
    }
}

// ── GetCpuInfoTool ──────────────────────────────────────────────

pub struct GetCpuInfoTool;

impl Tool for GetCpuInfoTool {
    fn name(&self) -> &str {
        "get_cpu_info"
    }
    fn description(&self) -> &str {
        "Return the logical CPU count and processor model."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn execute(&self, _args: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let cpu_count = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            let processor = tokio::fs::read_to_string("/proc/cpuinfo")
                .await
                .ok()
                .and_then(|s| {
                    s.lines()
                        .find(|l| l.starts_with("model name"))
                        .and_then(|l| l.split_once(':'))
                        .map(|(_, model)| model.trim().to_string())
                })
                .unwrap_or_else(|| std::env::consts::ARCH.to_string());
            Ok(json!({
                "cpu_count": cpu_count,
                "processor": processor,
            }))
        })
    }
}

// ── GetGpuInfoTool ──────────────────────────────────────────────

pub struct GetGpuInfoTool;

/// Keep the display/3D controller lines of `lspci` output.
fn gpu_lines(lspci: &str) -> Vec<String> {
    lspci
        .lines()
        .filter(|l| l.contains("VGA compatible controller") || l.contains("3D controller"))
        .map(|l| l.to_string())
        .collect()
}

impl Tool for GetGpuInfoTool {
    fn name(&self) -> &str {
        "get_gpu_info"
    }
    fn description(&self) -> &str {
        "List graphics controllers, or [\"Unavailable\"]."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn execute(&self, _args: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let gpus = tokio::process::Command::new("lspci")
                .output()
                .await
                .ok()
                .filter(|o| o.status.success())
                .map(|o| gpu_lines(&String::from_utf8_lossy(&o.stdout)))
                .filter(|lines| !lines.is_empty())
                .unwrap_or_else(|| vec!["Unavailable".to_string()]);
            Ok(json!(gpus))
        })
    }
}

// ── GetStorageInfoTool ──────────────────────────────────────────

pub struct GetStorageInfoTool;

#[derive(Deserialize)]
struct StorageInput {
    #[serde(default = "default_path")]
    path: String,
}
fn default_path() -> String {
    "/".into()
}

/// Parse `df -k <path>` output into (total, used, free) in bytes.
fn parse_df(output: &str) -> Option<(u64, u64, u64)> {
    // POSIX df may wrap long device names onto their own line; join all data lines.
    let data: Vec<&str> = output
        .lines()
        .skip(1)
        .flat_map(|l| l.split_whitespace())
        .collect();
    let total: u64 = data.get(1)?.parse().ok()?;
    let used: u64 = data.get(2)?.parse().ok()?;
    let free: u64 = data.get(3)?.parse().ok()?;
    Some((total * 1024, used * 1024, free * 1024))
}

impl Tool for GetStorageInfoTool {
    fn name(&self) -> &str {
        "get_storage_info"
    }
    fn description(&self) -> &str {
        "Return total, used, and free disk space in GB for a path (default \"/\")."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Filesystem path (default: /)" }
            }
        })
    }
    fn execute(&self, args: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let input: StorageInput =
                serde_json::from_value(Value::Object(args)).map_err(|e| {
                    WeaveError::ToolValidation {
                        tool: "get_storage_info".into(),
                        message: e.to_string(),
                    }
                })?;
            let output = tokio::process::Command::new("df")
                .arg("-k")
                .arg(&input.path)
                .output()
                .await
                .map_err(|e| WeaveError::ToolExecution {
                    tool: "get_storage_info".into(),
                    message: e.to_string(),
                })?;
            if !output.status.success() {
                return Err(WeaveError::ToolExecution {
                    tool: "get_storage_info".into(),
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            let (total, used, free) = parse_df(&String::from_utf8_lossy(&output.stdout))
                .ok_or_else(|| WeaveError::ToolExecution {
                    tool: "get_storage_info".into(),
                    message: "could not parse df output".into(),
                })?;
            Ok(json!({
                "total_gb": total as f64 / GB,
                "used_gb": used as f64 / GB,
                "free_gb": free as f64 / GB,
            }))
        })
    }
}
