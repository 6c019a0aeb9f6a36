//! IPMI driver backed by the `ipmitool` binary
//!
//! The console is a serial-over-LAN session (`sol activate`) kept running as
//! a child process; its stdout is split into lines of at most
//! [`MAX_UNIT_LEN`] bytes and pushed into a console feed. Power actions run `ipmitool chassis power ...` to completion.
//!
//! The IPMI password is handed over through `IPMI_PASSWORD` (`-E`), never on
//! the command line where other local users could read it.

use super::ConsoleSource;
use crate::error::{GatewayError, Result};
use crate::nodes::Node;
use bytes::Bytes;
use common::create_console_feed;
use common::feed::DEFAULT_FEED_CAPACITY;
use protocol::{ConnectionDescriptor, IpmiInfo, PowerStatus};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Longest console unit; output without a newline is cut at this length
pub const MAX_UNIT_LEN: usize = 4096;

/// Read up to and including the next newline, stopping early at `max` bytes
///
/// `None` at end of stream.
async fn read_unit<R>(reader: &mut R, max: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut unit = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!unit.is_empty()).then_some(unit));
        }

        let room = max - unit.len();
        let window = &available[..available.len().min(room)];
        let (take, complete) = match window.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (window.len(), window.len() == room),
        };
        unit.extend_from_slice(&window[..take]);
        reader.consume(take);

        if complete {
            return Ok(Some(unit));
        }
    }
}

#[derive(Debug, Clone)]
pub struct IpmitoolDriver {
    program: PathBuf,
}

impl IpmitoolDriver {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    fn ipmi_info(node: &Node) -> &IpmiInfo {
        match &node.descriptor {
            ConnectionDescriptor::Ipmi(info) => info,
        }
    }

    /// Base invocation with interface, host and credentials filled in
    fn command(&self, info: &IpmiInfo) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-I", "lanplus", "-H", &info.host, "-U", &info.user, "-E"])
            .env("IPMI_PASSWORD", &info.pass)
            .kill_on_drop(true);
        cmd
    }

    pub fn open_console(&self, node: &Node) -> Result<ConsoleSource> {
        let mut cmd = self.command(Self::ipmi_info(node));
        // stdin stays open for the life of the session; ipmitool ends SOL on EOF
        cmd.args(["sol", "activate"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::BackendUnavailable(format!(
                "failed to start {}: {}",
                self.program.display(),
                e
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            GatewayError::BackendUnavailable("ipmitool stdout was not captured".to_string())
        })?;

        let (tx, rx) = create_console_feed(DEFAULT_FEED_CAPACITY);
        let node_id = node.id.clone();

        let task = tokio::spawn(async move {
            let _stdin = child.stdin.take();
            let mut reader = BufReader::new(stdout);

            loop {
                match read_unit(&mut reader, MAX_UNIT_LEN).await {
                    Ok(None) => {
                        info!("SOL session for {} ended", node_id);
                        break;
                    }
                    Ok(Some(unit)) => {
                        if tx.send(Bytes::from(unit)).await.is_err() {
                            debug!("Console feed for {} closed", node_id);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error reading SOL output for {}: {}", node_id, e);
                        break;
                    }
                }
            }

            if let Err(e) = child.kill().await {
                debug!("ipmitool for {} already exited: {}", node_id, e);
            }
        });

        info!("Opened SOL console for {}", node.id);
        Ok(ConsoleSource::new(rx, task))
    }

    /// Run `ipmitool chassis <args>` and return its stdout
    async fn chassis(&self, node: &Node, args: &[&str]) -> Result<String> {
        let mut cmd = self.command(Self::ipmi_info(node));
        cmd.arg("chassis")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            GatewayError::BackendUnavailable(format!(
                "failed to start {}: {}",
                self.program.display(),
                e
            ))
        })?;

        if !output.status.success() {
            return Err(GatewayError::BackendUnavailable(format!(
                "ipmitool chassis {} failed for {}: {}",
                args.join(" "),
                node.id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn power_off(&self, node: &Node) -> Result<()> {
        info!("Powering off {}", node.id);
        self.chassis(node, &["power", "off"]).await.map(|_| ())
    }

    pub async fn power_cycle(&self, node: &Node, force: bool) -> Result<()> {
        let action = if force { "reset" } else { "cycle" };
        info!("Power {} for {}", action, node.id);
        self.chassis(node, &["power", action]).await.map(|_| ())
    }

    pub async fn power_status(&self, node: &Node) -> Result<PowerStatus> {
        let output = self.chassis(node, &["power", "status"]).await?;
        Ok(PowerStatus::from_ipmitool_output(&output))
    }
}
