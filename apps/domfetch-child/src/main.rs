//! One network hop per process: `domfetch-child --fetch-request <json>`.
//!
//! Exactly one envelope is printed on stdout. Logs go to stderr.

use df_core::FetchError;
use df_core::FetchResult;
use df_net::HttpResponse;
use df_net::NetStack;
use df_net::envelope::ChildRequest;
use df_net::envelope::Envelope;
use df_net::envelope::FETCH_REQUEST_FLAG;
use std::io::Write;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let envelope = match request_from_args(std::env::args().skip(1)).and_then(fetch) {
        Ok(response) => Envelope::success(&response),
        Err(error) => {
            log::debug!("hop failed: {error}");
            Envelope::failure(error.message)
        }
    };

    let json = match serde_json::to_string(&envelope) {
        Ok(json) => json,
        Err(error) => {
            eprintln!("domfetch-child: failed to encode envelope: {error}");
            return ExitCode::FAILURE;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(error) = writeln!(stdout, "{json}").and_then(|()| stdout.flush()) {
        eprintln!("domfetch-child: failed to write envelope: {error}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn request_from_args(mut args: impl Iterator<Item = String>) -> FetchResult<ChildRequest> {
    while let Some(arg) = args.next() {
        if arg != FETCH_REQUEST_FLAG {
            continue;
        }

        let json = args.next().ok_or_else(|| {
            FetchError::invalid_input(
                "child.request_missing",
                format!("missing request JSON after {FETCH_REQUEST_FLAG}"),
            )
        })?;
        return serde_json::from_str(&json).map_err(|error| {
            FetchError::invalid_input(
                "child.request_invalid",
                format!("request JSON is invalid: {error}"),
            )
        });
    }

    Err(FetchError::invalid_input(
        "child.flag_missing",
        format!("usage: domfetch-child {FETCH_REQUEST_FLAG} <json>"),
    ))
}

fn fetch(request: ChildRequest) -> FetchResult<HttpResponse> {
    let (http, strict_tls) = request.into_http()?;
    NetStack::new().round_trip(http, strict_tls)
}
