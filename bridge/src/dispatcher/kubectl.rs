//! Builds the `kubectl` argv for a parsed request and runs it, abstracted
//! behind [`CommandRunner`] so the dispatcher can be exercised against a
//! recording fake instead of a real binary in tests.

use async_trait::async_trait;
use bridge_common::k8s::HttpMethod;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String], kubeconfig: &Path, stdin: Option<&[u8]>) -> io::Result<CommandOutput>;
}

/// Runs `kubectl` as a real subprocess. Never forwards the process's own
/// environment beyond what `tokio::process::Command` inherits by default,
/// so the signer key never ends up in the child's environment.
pub struct RealKubectlRunner;

#[async_trait]
impl CommandRunner for RealKubectlRunner {
    async fn run(&self, argv: &[String], kubeconfig: &Path, stdin: Option<&[u8]>) -> io::Result<CommandOutput> {
        let mut command = Command::new("kubectl");
        command
            .args(argv)
            .arg("--kubeconfig")
            .arg(kubeconfig)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let Some(payload) = stdin {
            let mut pipe = child.stdin.take().expect("stdin was requested as piped");
            pipe.write_all(payload).await?;
            drop(pipe);
        }
        let output = child.wait_with_output().await?;
        Ok(CommandOutput { success: output.status.success(), stdout: output.stdout, stderr: output.stderr })
    }
}

/// The `kubectl` argv and optional stdin payload for one request, built from
/// the method/resource table: `GET` lists or fetches a single object,
/// `POST`/`PUT` apply the payload from stdin, `PATCH` merge-patches, and
/// `DELETE` removes by name.
pub struct KubectlCommand {
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

pub fn build_command(
    method: HttpMethod,
    resource_type: &str,
    namespace: &str,
    name: Option<&str>,
    payload: &[u8],
) -> KubectlCommand {
    let ns = ["-n".to_string(), namespace.to_string()];

    match method {
        HttpMethod::Get => {
            let mut argv = vec!["get".to_string(), resource_type.to_string()];
            if let Some(name) = name {
                argv.push(name.to_string());
            }
            argv.extend(ns);
            argv.push("-o".to_string());
            argv.push("json".to_string());
            KubectlCommand { argv, stdin: None }
        }
        HttpMethod::Post | HttpMethod::Put => {
            let mut argv = vec!["apply".to_string()];
            argv.extend(ns);
            argv.push("-f".to_string());
            argv.push("-".to_string());
            KubectlCommand { argv, stdin: Some(payload.to_vec()) }
        }
        HttpMethod::Patch => {
            let mut argv = vec!["patch".to_string(), resource_type.to_string()];
            if let Some(name) = name {
                argv.push(name.to_string());
            }
            argv.extend(ns);
            argv.push("--type=merge".to_string());
            argv.push("-p".to_string());
            argv.push(String::from_utf8_lossy(payload).into_owned());
            KubectlCommand { argv, stdin: None }
        }
        HttpMethod::Delete => {
            let mut argv = vec!["delete".to_string(), resource_type.to_string()];
            if let Some(name) = name {
                argv.push(name.to_string());
            }
            argv.extend(ns);
            KubectlCommand { argv, stdin: None }
        }
    }
}
