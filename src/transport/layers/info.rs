use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tower::{Layer, Service};

use crate::{Envelope, envelope::HeadersMut, stamper::InfoStamper};

/// Tower `Service` wrapper that stamps the `info` header.
///
/// Every envelope passing through gets its headers stamped by an
/// [`InfoStamper`] before it reaches the inner service.
#[derive(Clone)]
pub struct InfoService<T> {
    inner: T,
    stamper: Arc<InfoStamper>,
}

impl<T, H, M> Service<Envelope<H, M>> for InfoService<T>
where
    H: HeadersMut + Send + 'static,
    M: Send + 'static,
    T: Service<Envelope<H, M>> + Clone + Send + 'static,
    T::Error: Into<tower::BoxError>,
    T::Future: Send + 'static,
{
    type Response = T::Response;
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Envelope<H, M>) -> Self::Future {
        self.stamper.stamp(req.headers.headers_mut());
        let fut = self.inner.call(req);

        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

/// Tower `Layer` that applies [`InfoService`] to a service stack.
#[derive(Clone)]
pub struct InfoLayer {
    stamper: Arc<InfoStamper>,
}

impl InfoLayer {
    pub fn new(stamper: InfoStamper) -> Self {
        Self {
            stamper: Arc::new(stamper),
        }
    }
}

impl<S> Layer<S> for InfoLayer {
    type Service = InfoService<S>;

    fn layer(&self, service: S) -> Self::Service {
        InfoService {
            inner: service,
            stamper: Arc::clone(&self.stamper),
        }
    }
}
