//! `FetchEngine`: the entry point that drives the pipeline over a transport.

use crate::console::Console;
use crate::console::LogConsole;
use crate::data_url::DataUrlDecoder;
use crate::data_url::Rfc2397Decoder;
use crate::interceptor::Interceptor;
use crate::interceptor::NoopInterceptor;
use crate::pipeline::Action;
use crate::pipeline::Environment;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::settings::BrowsingContext;
use crate::settings::FetchSettings;
use crate::transport::AsyncTransport;
use crate::transport::BlockingTransport;
use crate::transport::ReqwestTransport;
use crate::transport::ThreadTransport;
use crate::virtual_path::NoVirtualPaths;
use crate::virtual_path::VirtualPathResolver;
use df_core::FetchResult;
use df_net::Response;
use std::sync::Arc;
use std::thread;

#[cfg(test)]
mod tests;

/// Issues requests on behalf of one browsing context.
///
/// `send` blocks the calling thread for every hop; `send_async` suspends
/// only the awaiting task. Both run the same pipeline against the shared
/// response and preflight caches of the context.
pub struct FetchEngine<B = ThreadTransport, A = ReqwestTransport> {
    env: Arc<Environment>,
    blocking: Arc<B>,
    nonblocking: Arc<A>,
}

impl FetchEngine {
    /// Engine with default collaborators and transports.
    pub fn new(context: BrowsingContext, settings: FetchSettings) -> FetchResult<Self> {
        FetchEngine::builder(context).settings(settings).build()
    }

    pub fn builder(context: BrowsingContext) -> FetchEngineBuilder {
        FetchEngineBuilder {
            context,
            settings: FetchSettings::default(),
            interceptor: Arc::new(NoopInterceptor),
            console: Arc::new(LogConsole),
            data_urls: Arc::new(Rfc2397Decoder),
            virtual_paths: Arc::new(NoVirtualPaths),
        }
    }
}

impl<B, A> FetchEngine<B, A>
where
    B: BlockingTransport + 'static,
    A: AsyncTransport + 'static,
{
    pub fn settings(&self) -> &FetchSettings {
        &self.env.settings
    }

    pub fn context(&self) -> &BrowsingContext {
        &self.env.context
    }

    /// Runs `request` to completion, blocking the calling thread for each hop.
    pub fn send(&self, request: Request) -> FetchResult<Response> {
        let mut pipeline = Pipeline::new(Arc::clone(&self.env), request);
        let result = drive_blocking(&mut pipeline, self.blocking.as_ref());
        log::trace!("{:?}", pipeline.stats());
        for request in pipeline.take_background() {
            self.refresh_blocking(request);
        }
        result
    }

    /// Runs `request` to completion on the async transport.
    pub async fn send_async(&self, request: Request) -> FetchResult<Response> {
        let mut pipeline = Pipeline::new(Arc::clone(&self.env), request);
        let result = drive_async(&mut pipeline, self.nonblocking.as_ref()).await;
        log::trace!("{:?}", pipeline.stats());
        for request in pipeline.take_background() {
            self.refresh_async(request);
        }
        result
    }

    fn refresh_blocking(&self, request: Request) {
        let env = Arc::clone(&self.env);
        let transport = Arc::clone(&self.blocking);
        let url = request.url().clone();

        let job = move || {
            let mut pipeline = Pipeline::refresh(env, request);
            report_refresh(&url, drive_blocking(&mut pipeline, transport.as_ref()));
        };
        if let Err(error) = thread::Builder::new()
            .name("domfetch-refresh".to_owned())
            .spawn(job)
        {
            log::warn!("failed to spawn background refresh: {error}");
        }
    }

    fn refresh_async(&self, request: Request) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!(
                    "no async runtime; skipping background refresh of {}",
                    request.url()
                );
                return;
            }
        };

        let env = Arc::clone(&self.env);
        let transport = Arc::clone(&self.nonblocking);
        handle.spawn(async move {
            let url = request.url().clone();
            let mut pipeline = Pipeline::refresh(env, request);
            report_refresh(&url, drive_async(&mut pipeline, transport.as_ref()).await);
        });
    }
}

fn drive_blocking<B: BlockingTransport + ?Sized>(
    pipeline: &mut Pipeline,
    transport: &B,
) -> FetchResult<Response> {
    let mut input = None;
    loop {
        match pipeline.resume(input.take())? {
            Action::Transmit(wire) => input = Some(transport.round_trip(wire)?),
            Action::Finished(response) => return Ok(response),
        }
    }
}

async fn drive_async<A: AsyncTransport>(
    pipeline: &mut Pipeline,
    transport: &A,
) -> FetchResult<Response> {
    let mut input = None;
    loop {
        match pipeline.resume(input.take())? {
            Action::Transmit(wire) => input = Some(transport.round_trip(wire).await?),
            Action::Finished(response) => return Ok(response),
        }
    }
}

/// Background refreshes leave the stale entry alone on failure.
fn report_refresh(url: &url::Url, result: FetchResult<Response>) {
    match result {
        Ok(response) => log::debug!("background refresh of {url} finished with {}", response.status),
        Err(error) => log::warn!("background refresh of {url} failed: {error}"),
    }
}

pub struct FetchEngineBuilder {
    context: BrowsingContext,
    settings: FetchSettings,
    interceptor: Arc<dyn Interceptor>,
    console: Arc<dyn Console>,
    data_urls: Arc<dyn DataUrlDecoder>,
    virtual_paths: Arc<dyn VirtualPathResolver>,
}

impl FetchEngineBuilder {
    pub fn settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    pub fn data_url_decoder(mut self, decoder: Arc<dyn DataUrlDecoder>) -> Self {
        self.data_urls = decoder;
        self
    }

    pub fn virtual_paths(mut self, resolver: Arc<dyn VirtualPathResolver>) -> Self {
        self.virtual_paths = resolver;
        self
    }

    /// Builds with the worker-thread and `reqwest` transports.
    pub fn build(self) -> FetchResult<FetchEngine> {
        let blocking = ThreadTransport::new()?;
        let nonblocking = ReqwestTransport::new()?;
        self.build_with(blocking, nonblocking)
    }

    pub fn build_with<B, A>(self, blocking: B, nonblocking: A) -> FetchResult<FetchEngine<B, A>>
    where
        B: BlockingTransport + 'static,
        A: AsyncTransport + 'static,
    {
        self.settings.validate()?;
        Ok(FetchEngine {
            env: Arc::new(Environment {
                settings: self.settings,
                context: self.context,
                interceptor: self.interceptor,
                console: self.console,
                data_urls: self.data_urls,
                virtual_paths: self.virtual_paths,
            }),
            blocking: Arc::new(blocking),
            nonblocking: Arc::new(nonblocking),
        })
    }
}
