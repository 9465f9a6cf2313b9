use super::BlockingTransport;
use super::RawResponse;
use super::WireRequest;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::envelope::ChildRequest;
use df_net::envelope::Envelope;
use df_net::envelope::FETCH_REQUEST_FLAG;
use std::io::Read;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildProcessConfig {
    pub program: PathBuf,
    /// Inserted between the program and the request flag.
    pub extra_args: Vec<String>,
    /// Larger stdout is a transport failure.
    pub max_output_bytes: usize,
}

impl ChildProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn command_args(&self, request_json: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(self.extra_args.len() + 2);
        args.extend(self.extra_args.iter().cloned());
        args.push(FETCH_REQUEST_FLAG.to_owned());
        args.push(request_json.to_owned());
        args
    }
}

fn child_request(request: WireRequest) -> FetchResult<ChildRequest> {
    let body = request.body.into_buffered("child process")?;
    Ok(ChildRequest::new(
        request.method,
        &request.url,
        &request.headers,
        &body,
        request.strict_tls,
    ))
}

/// Spawns one child process per hop and blocks until it exits.
#[derive(Debug, Clone)]
pub struct ChildProcessTransport {
    config: ChildProcessConfig,
}

impl ChildProcessTransport {
    pub fn new(config: ChildProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChildProcessConfig {
        &self.config
    }

    fn run(&self, request_json: &str) -> FetchResult<Vec<u8>> {
        if self.config.program.as_os_str().is_empty() {
            return Err(FetchError::network(
                "fetch.child.program_missing",
                "child process program path is empty",
            ));
        }

        let mut command = Command::new(&self.config.program);
        command
            .args(self.config.command_args(request_json))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|error| {
            FetchError::network(
                "fetch.child.spawn_failed",
                format!(
                    "failed to spawn `{}`: {error}",
                    self.config.program.display()
                ),
            )
        })?;

        let limit = self.config.max_output_bytes;
        let mut output = Vec::new();
        let read = match child.stdout.take() {
            Some(stdout) => stdout
                .take(limit as u64 + 1)
                .read_to_end(&mut output)
                .map(|_| ()),
            None => Ok(()),
        };

        if output.len() > limit {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FetchError::network(
                "fetch.child.output_too_large",
                format!("child output exceeded {limit} bytes"),
            ));
        }

        let status = child.wait().map_err(|error| {
            FetchError::network(
                "fetch.child.wait_failed",
                format!("failed to wait for child process: {error}"),
            )
        })?;
        read.map_err(|error| {
            FetchError::network(
                "fetch.child.read_failed",
                format!("failed to read child output: {error}"),
            )
        })?;
        if !status.success() {
            log::debug!("fetch child exited with {status}");
        }
        Ok(output)
    }
}

impl BlockingTransport for ChildProcessTransport {
    fn round_trip(&self, request: WireRequest) -> FetchResult<RawResponse> {
        let request = child_request(request)?;
        let request_json = serde_json::to_string(&request).map_err(|error| {
            FetchError::network(
                "fetch.child.request_encode_failed",
                format!("failed to encode child request: {error}"),
            )
        })?;

        let output = self.run(&request_json)?;
        if output.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::network("fetch.child.no_output", "fetch failed"));
        }

        let envelope: Envelope = serde_json::from_slice(&output).map_err(|error| {
            FetchError::network(
                "fetch.child.envelope_invalid",
                format!("fetch failed: child output is not a valid envelope: {error}"),
            )
        })?;
        envelope.into_response().map(RawResponse::from)
    }
}
