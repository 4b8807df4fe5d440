//! 外部命令诊断提供方
//!
//! 把请求以 JSON 写入子进程标准输入，读取标准输出作为模型原始文本。
//! 具体模型由被调用的程序决定。

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::provider::{DiagnosisProvider, DiagnosisRequest};

/// 外部命令提供方
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 按空白拆分命令行，第一项为程序
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("AI command line is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl DiagnosisProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.program
    }

    async fn diagnose(&self, request: DiagnosisRequest) -> Result<String> {
        let payload = serde_json::to_vec(&request).context("Failed to encode diagnosis request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} exited with {}: {}", self.program, output.status, stderr.trim()));
        }

        debug!("{} returned {} bytes", self.program, output.stdout.len());
        String::from_utf8(output.stdout).context("AI command output is not UTF-8")
    }
}
