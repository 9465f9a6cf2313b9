use super::BlockingTransport;
use super::RawResponse;
use super::WireRequest;
use df_core::FetchError;
use df_core::FetchResult;
use df_net::HttpResponse;
use df_net::NetStack;
use df_net::SocketOptions;
use df_net::http::HttpRequest;
use std::sync::mpsc;
use std::thread;

struct Job {
    request: HttpRequest,
    strict_tls: bool,
    reply: mpsc::Sender<FetchResult<HttpResponse>>,
}

/// Runs every hop on one dedicated worker thread that owns the HTTP/1.1
/// clients and their connection pools. Callers block on a reply channel.
pub struct ThreadTransport {
    jobs: mpsc::Sender<Job>,
}

impl ThreadTransport {
    pub fn new() -> FetchResult<Self> {
        Self::with_socket_options(SocketOptions::default())
    }

    pub fn with_socket_options(socket_options: SocketOptions) -> FetchResult<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();

        let worker = move || {
            let mut stack = NetStack::with_socket_options(socket_options);
            // Ends once every sender is dropped.
            while let Ok(job) = queue.recv() {
                let result = stack.round_trip(job.request, job.strict_tls);
                let _ = job.reply.send(result);
            }
            log::debug!("network worker stopped");
        };

        thread::Builder::new()
            .name("domfetch-net".to_owned())
            .spawn(worker)
            .map_err(|error| {
                FetchError::network(
                    "fetch.transport.worker_spawn_failed",
                    format!("failed to spawn network worker: {error}"),
                )
            })?;

        Ok(Self { jobs })
    }
}

impl BlockingTransport for ThreadTransport {
    fn round_trip(&self, request: WireRequest) -> FetchResult<RawResponse> {
        let (http, strict_tls) = request.into_http("thread")?;

        let (reply, answer) = mpsc::channel();
        self.jobs
            .send(Job {
                request: http,
                strict_tls,
                reply,
            })
            .map_err(|_| {
                FetchError::network("fetch.transport.worker_gone", "network worker is not running")
            })?;

        let response = answer.recv().map_err(|_| {
            FetchError::network(
                "fetch.transport.worker_gone",
                "network worker stopped before replying",
            )
        })??;

        Ok(RawResponse::from(response))
    }
}
