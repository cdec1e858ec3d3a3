// src/services/core/chaos/workload.rs

//! The sample workload deployed into every sandbox, and the per-scenario
//! fault scripts run against it.

use std::time::Duration;

use crate::services::core::sandbox::{Isolation, SandboxHandle, SandboxProvider};
use crate::types::{ChaosScenario, Intensity};
use crate::utils::{ChaosLabError, ChaosLabResult, Logger};

pub const APP_FILE: &str = "app.py";
pub const APP_LOG: &str = "app.log";
pub const CHAOS_DIR: &str = "chaos";
/// Written by the disk-full script when the workload log itself cannot be appended to
pub const DISK_ERRORS_LOG: &str = "chaos/disk_errors.log";

/// Extra time a fault script gets beyond the experiment duration to clean up
pub const FAULT_GRACE: Duration = Duration::from_secs(30);

const DEPLOY_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// Local sandboxes share the host; allocations are capped so a fault cannot take it down
const LOCAL_ALLOCATION_CAP_MB: u64 = 1024;

/// Stdlib-only HTTP service. Usage: `python3 app.py <port> <home_dir>`.
/// `<home>/chaos/latency_ms` adds per-request latency;
/// `<home>/chaos/dependency_down` makes `/api/database` fail.
const WORKLOAD_APP: &str = r#"import json
import logging
import os
import random
import sys
import time
from http.server import BaseHTTPRequestHandler, ThreadingHTTPServer

PORT = int(sys.argv[1])
HOME = sys.argv[2]
CHAOS = os.path.join(HOME, "chaos")

logging.basicConfig(
    level=logging.INFO,
    format="%(asctime)s - %(levelname)s - %(message)s",
    handlers=[logging.FileHandler(os.path.join(HOME, "app.log"))],
)
log = logging.getLogger("workload")


def injected_latency():
    try:
        with open(os.path.join(CHAOS, "latency_ms")) as f:
            return int(f.read().strip()) / 1000.0
    except (OSError, ValueError):
        return 0.0


class Handler(BaseHTTPRequestHandler):
    def log_message(self, fmt, *args):
        pass

    def reply(self, status, body):
        payload = json.dumps(body).encode()
        self.send_response(status)
        self.send_header("Content-Type", "application/json")
        self.send_header("Content-Length", str(len(payload)))
        self.end_headers()
        self.wfile.write(payload)

    def do_GET(self):
        time.sleep(injected_latency())
        try:
            if self.path == "/health":
                return self.reply(200, {"status": "healthy", "timestamp": time.time()})
            if self.path == "/api/data":
                time.sleep(random.uniform(0.1, 0.5))
                if random.random() < 0.1:
                    log.error("Random error occurred in /api/data")
                    return self.reply(500, {"error": "Internal server error"})
                log.info("Data request successful")
                return self.reply(200, {"data": [1, 2, 3, 4, 5]})
            if self.path == "/api/heavy":
                result = sum(i * i for i in range(100000))
                log.info("Heavy operation completed")
                return self.reply(200, {"result": result})
            if self.path == "/api/memory":
                data = list(range(1000000))
                log.info("Memory operation allocated %d items", len(data))
                return self.reply(200, {"items_allocated": len(data)})
            if self.path == "/api/database":
                time.sleep(random.uniform(0.05, 0.2))
                if os.path.exists(os.path.join(CHAOS, "dependency_down")) or random.random() < 0.05:
                    log.error("Database connection failed")
                    return self.reply(503, {"error": "Database connection failed"})
                log.info("Database operation successful")
                return self.reply(200, {"records": 3})
            log.warning("404 error: %s", self.path)
            return self.reply(404, {"error": "Not found"})
        except OSError as e:
            log.error("Request failed: %s", e)
            return self.reply(500, {"error": "Internal server error"})


if __name__ == "__main__":
    os.makedirs(CHAOS, exist_ok=True)
    log.info("Workload starting on port %d", PORT)
    ThreadingHTTPServer(("0.0.0.0", PORT), Handler).serve_forever()
"#;

/// Fault parameters for one intensity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntensityProfile {
    /// Requests fired per second of load
    pub concurrent_requests: u32,
    pub memory_target_percent: u32,
    /// Share of the free disk space to fill
    pub disk_fill_percent: u32,
    pub network_delay_ms: u32,
    /// Seconds between workload kills
    pub kill_interval_seconds: u32,
    /// Share of the run the dependency is unavailable
    pub outage_percent: u32,
}

impl IntensityProfile {
    pub fn for_intensity(intensity: Intensity) -> Self {
        match intensity {
            Intensity::Low => Self {
                concurrent_requests: 1,
                memory_target_percent: 60,
                disk_fill_percent: 70,
                network_delay_ms: 100,
                kill_interval_seconds: 20,
                outage_percent: 30,
            },
            Intensity::Medium => Self {
                concurrent_requests: 3,
                memory_target_percent: 80,
                disk_fill_percent: 95,
                network_delay_ms: 300,
                kill_interval_seconds: 10,
                outage_percent: 60,
            },
            Intensity::High => Self {
                concurrent_requests: 6,
                memory_target_percent: 90,
                disk_fill_percent: 98,
                network_delay_ms: 800,
                kill_interval_seconds: 5,
                outage_percent: 100,
            },
        }
    }
}

/// A rendered fault script, ready to upload and run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultScript {
    pub path: String,
    pub body: String,
    pub timeout: Duration,
}

impl FaultScript {
    pub fn render(
        scenario: ChaosScenario,
        intensity: Intensity,
        duration_seconds: u32,
        handle: &SandboxHandle,
    ) -> Self {
        let profile = IntensityProfile::for_intensity(intensity);
        let ctx = ScriptContext::new(handle, duration_seconds, profile);
        let scenario_body = match scenario {
            ChaosScenario::NetworkDelay => network_delay(&ctx),
            ChaosScenario::MemoryPressure => memory_pressure(&ctx),
            ChaosScenario::DiskFull => disk_full(&ctx),
            ChaosScenario::ProcessKill => process_kill(&ctx),
            ChaosScenario::DependencyFailure => dependency_failure(&ctx),
        };

        Self {
            path: handle.path(&format!("{}/{}.sh", CHAOS_DIR, scenario.as_str())),
            body: format!("{}\n{}", ctx.prelude(scenario), scenario_body),
            timeout: Duration::from_secs(u64::from(duration_seconds)) + FAULT_GRACE,
        }
    }
}

struct ScriptContext {
    home: String,
    chaos_dir: String,
    port: u16,
    duration: u32,
    profile: IntensityProfile,
    /// `None` on remote sandboxes
    allocation_cap_mb: Option<u64>,
}

impl ScriptContext {
    fn new(handle: &SandboxHandle, duration: u32, profile: IntensityProfile) -> Self {
        Self {
            home: handle.home_dir.trim_end_matches('/').to_string(),
            chaos_dir: handle.path(CHAOS_DIR),
            port: handle.app_port,
            duration,
            profile,
            allocation_cap_mb: match handle.isolation {
                Isolation::Remote => None,
                Isolation::LocalProcess => Some(LOCAL_ALLOCATION_CAP_MB),
            },
        }
    }

    fn cap_expr(&self) -> String {
        self.allocation_cap_mb
            .map_or_else(|| "0".to_string(), |cap| cap.to_string())
    }

    /// Shared header: load helper, end-of-run deadline and cleanup trap
    fn prelude(&self, scenario: ChaosScenario) -> String {
        format!(
            r#"#!/bin/bash
set -u
HOME_DIR='{home}'
CHAOS_DIR='{chaos}'
PORT={port}
DURATION={duration}
END=$((SECONDS + DURATION))
mkdir -p "$CHAOS_DIR"
echo "Starting {name} chaos for {duration}s"

hit() {{
    curl -s -m 10 "http://127.0.0.1:$PORT$1" > /dev/null 2>&1 &
}}

load_tick() {{
    for _ in $(seq 1 {concurrency}); do
        for endpoint in "$@"; do hit "$endpoint"; done
    done
}}
"#,
            home = self.home,
            chaos = self.chaos_dir,
            port = self.port,
            duration = self.duration,
            name = scenario.display_name(),
            concurrency = self.profile.concurrent_requests,
        )
    }
}

fn network_delay(ctx: &ScriptContext) -> String {
    format!(
        r#"cleanup() {{
    tc qdisc del dev eth0 root netem 2>/dev/null || true
    rm -f "$CHAOS_DIR/latency_ms"
    wait
}}
trap cleanup EXIT

tc qdisc add dev eth0 root netem delay {delay}ms 2>/dev/null \
    || echo "tc unavailable, using in-process latency only"
echo {delay} > "$CHAOS_DIR/latency_ms"

while [ $SECONDS -lt $END ]; do
    load_tick /api/data /api/heavy /api/data
    sleep 1
done
echo "Network delay chaos completed"
"#,
        delay = ctx.profile.network_delay_ms,
    )
}

fn memory_pressure(ctx: &ScriptContext) -> String {
    format!(
        r#"cat > "$CHAOS_DIR/memory_hog.py" << 'PYTHON_EOF'
import sys, time
target_percent, hold_seconds, cap_mb = int(sys.argv[1]), int(sys.argv[2]), int(sys.argv[3])
with open("/proc/meminfo") as f:
    total_mb = next(int(l.split()[1]) for l in f if l.startswith("MemTotal")) // 1024
target_mb = total_mb * target_percent // 100
if cap_mb > 0:
    target_mb = min(target_mb, cap_mb)
chunks = []
try:
    while len(chunks) * 50 < target_mb:
        chunk = bytearray(50 * 1024 * 1024)
        for i in range(0, len(chunk), 4096):
            chunk[i] = 1
        chunks.append(chunk)
except MemoryError:
    pass
print("holding", len(chunks) * 50, "MB")
deadline = time.time() + hold_seconds
while time.time() < deadline:
    for chunk in chunks[::10]:
        chunk[len(chunk) // 2] = 1
    time.sleep(1)
PYTHON_EOF

python3 "$CHAOS_DIR/memory_hog.py" {target} $DURATION {cap} > "$CHAOS_DIR/memory_hog.log" 2>&1 &
HOG_PID=$!
cleanup() {{
    kill $HOG_PID 2>/dev/null || true
    wait
}}
trap cleanup EXIT

while [ $SECONDS -lt $END ]; do
    load_tick /api/data /api/heavy /api/memory
    sleep 1
done
echo "Memory pressure chaos completed"
"#,
        target = ctx.profile.memory_target_percent,
        cap = ctx.cap_expr(),
    )
}

fn disk_full(ctx: &ScriptContext) -> String {
    format!(
        r#"AVAILABLE_MB=$(( $(df -k "$HOME_DIR" | tail -1 | awk '{{print $4}}') / 1024 ))
FILL_MB=$(( AVAILABLE_MB * {percent} / 100 ))
CAP_MB={cap}
if [ "$CAP_MB" -gt 0 ] && [ "$FILL_MB" -gt "$CAP_MB" ]; then FILL_MB=$CAP_MB; fi
echo "Filling $FILL_MB MB of $AVAILABLE_MB MB available"

cleanup() {{
    rm -f "$CHAOS_DIR"/fill_*.dat
    wait
}}
trap cleanup EXIT

written=0
while [ $written -lt $FILL_MB ] && [ $SECONDS -lt $END ]; do
    dd if=/dev/zero of="$CHAOS_DIR/fill_$written.dat" bs=1M count=10 2>/dev/null || break
    written=$((written + 10))
done

while [ $SECONDS -lt $END ]; do
    load_tick /api/data /api/heavy
    echo "write probe $SECONDS" >> "$HOME_DIR/app.log" 2>/dev/null \
        || echo "$(date '+%Y-%m-%d %H:%M:%S') - ERROR - disk write failed" >> "$HOME_DIR/{errors_log}"
    sleep 1
done
echo "Disk full chaos completed"
"#,
        percent = ctx.profile.disk_fill_percent,
        cap = ctx.cap_expr(),
        errors_log = DISK_ERRORS_LOG,
    )
}

fn process_kill(ctx: &ScriptContext) -> String {
    format!(
        r#"APP="$HOME_DIR/{app}"
# Subshell reparents the app so cleanup's wait only covers load jobs
restart_app() {{
    ( nohup python3 "$APP" $PORT "$HOME_DIR" >> "$HOME_DIR/app.stdout" 2>&1 < /dev/null & )
}}
cleanup() {{
    pgrep -f "$APP" > /dev/null || restart_app
    wait
}}
trap cleanup EXIT

next_kill=$((SECONDS + {interval}))
while [ $SECONDS -lt $END ]; do
    load_tick /api/data /api/heavy
    if [ $SECONDS -ge $next_kill ]; then
        echo "$(date '+%Y-%m-%d %H:%M:%S') - ERROR - workload killed by chaos" >> "$HOME_DIR/app.log"
        pkill -9 -f "$APP" || true
        sleep 2
        restart_app
        next_kill=$((SECONDS + {interval}))
    fi
    sleep 1
done
echo "Process kill chaos completed"
"#,
        app = APP_FILE,
        interval = ctx.profile.kill_interval_seconds,
    )
}

fn dependency_failure(ctx: &ScriptContext) -> String {
    format!(
        r#"OUTAGE_END=$((SECONDS + DURATION * {outage} / 100))
cleanup() {{
    rm -f "$CHAOS_DIR/dependency_down"
    wait
}}
trap cleanup EXIT

touch "$CHAOS_DIR/dependency_down"
while [ $SECONDS -lt $END ]; do
    if [ $SECONDS -ge $OUTAGE_END ]; then rm -f "$CHAOS_DIR/dependency_down"; fi
    load_tick /api/database /api/data /api/database
    sleep 1
done
echo "Dependency failure chaos completed"
"#,
        outage = ctx.profile.outage_percent,
    )
}

/// Launches the workload in the background; the app must not hold the exec's output pipes
fn start_command(handle: &SandboxHandle) -> String {
    format!(
        "mkdir -p '{chaos}'; nohup python3 '{app}' {port} '{home}' > '{home}/app.stdout' 2>&1 < /dev/null & echo started",
        chaos = handle.path(CHAOS_DIR),
        app = handle.path(APP_FILE),
        port = handle.app_port,
        home = handle.home_dir.trim_end_matches('/'),
    )
}

/// Uploads and starts the workload, then probes its health endpoint.
///
/// A failed health probe only logs a warning; the run proceeds and the
/// timeline shows whatever the workload managed to do.
pub async fn deploy_workload(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    settle: Duration,
    logger: &Logger,
) -> ChaosLabResult<()> {
    let app_path = handle.path(APP_FILE);
    provider
        .write_file(handle, &app_path, WORKLOAD_APP)
        .await
        .map_err(|e| ChaosLabError::sandbox_error(format!("Workload upload failed: {}", e)))?;

    let python = provider
        .exec(handle, "command -v python3", DEPLOY_COMMAND_TIMEOUT)
        .await?;
    if !python.success() {
        return Err(ChaosLabError::sandbox_error(
            "python3 is not available in the sandbox",
        ));
    }

    let started = provider
        .exec(handle, &start_command(handle), DEPLOY_COMMAND_TIMEOUT)
        .await?;
    if !started.success() {
        return Err(ChaosLabError::sandbox_error(format!(
            "Workload failed to start: {}",
            started.stderr.trim()
        )));
    }

    tokio::time::sleep(settle).await;

    let health = provider
        .exec(
            handle,
            &format!("curl -sf -m 5 http://127.0.0.1:{}/health", handle.app_port),
            DEPLOY_COMMAND_TIMEOUT,
        )
        .await?;
    if health.success() {
        logger.info("Workload deployed and healthy");
    } else {
        logger.warn_with_meta(
            "Workload health check failed, continuing",
            Some(&serde_json::json!({ "exit_code": health.exit_code })),
        );
    }
    Ok(())
}

/// Last `max_bytes` of the workload log; empty if it cannot be read
pub async fn capture_workload_logs(
    provider: &dyn SandboxProvider,
    handle: &SandboxHandle,
    max_bytes: usize,
) -> String {
    let command = format!(
        "tail -c {} '{}' 2>/dev/null",
        max_bytes,
        handle.path(APP_LOG)
    );
    match provider.exec(handle, &command, DEPLOY_COMMAND_TIMEOUT).await {
        Ok(output) => output.stdout,
        Err(_) => String::new(),
    }
}
