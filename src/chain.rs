use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;

/// A unit of resilience behavior decorating the request call.
///
/// A policy may short-circuit by never calling `next`, invoke `next` more
/// than once (serially) to retry, derive a tighter context, or observe the
/// outcome on the way back out. Implementations must be safe for concurrent
/// use; the chain runtime itself holds no mutable state.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn execute(
        &self,
        ctx: &Context,
        request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response>;
}

/// Handle to the remaining chain: the policies downstream of the caller and
/// the terminal transport.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn Transport) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Run the rest of the chain, ending at the transport.
    pub async fn run(self, ctx: &Context, request: Request) -> crate::Result<Response> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                policy
                    .execute(
                        ctx,
                        request,
                        Next {
                            policies: rest,
                            transport: self.transport,
                        },
                    )
                    .await
            }
            None => self.transport.send(ctx, request).await,
        }
    }
}

/// The composed executor built once at client construction.
pub(crate) struct Executor {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn Transport>,
}

impl Executor {
    pub(crate) fn new(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            policies: policies.into(),
            transport,
        }
    }

    pub(crate) async fn execute(
        &self,
        ctx: &Context,
        request: Request,
    ) -> crate::Result<Response> {
        Next::new(&self.policies, self.transport.as_ref())
            .run(ctx, request)
            .await
    }
}
