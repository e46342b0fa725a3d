use std::collections::VecDeque;
use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};
use tokio::sync::{oneshot, Mutex, RwLock};

use super::credential_store::{
    CredentialStore, PersistOptions, ACCESS_TOKEN_ENTRY, REFRESH_TOKEN_ENTRY,
};
use super::exchange::RefreshExchange;
use super::teardown::{ContextMode, SessionTeardown};
use super::tokens::bearer_header;
use super::AuthError;

/// Machine-readable code a 401 must carry to be treated as a recoverable
/// expired-token failure.
pub const TOKEN_EXPIRED_CODE: &str = "token.expired";

/// A failed response captured with enough context to classify it and replay
/// the original request.
#[derive(Debug)]
pub struct FailedRequest {
    pub request: Request,
    pub status: StatusCode,
    pub code: Option<String>,
    pub body: String,
}

type Waiter = oneshot::Sender<Result<String, Arc<AuthError>>>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    waiters: VecDeque<Waiter>,
}

/// Serializes token refreshes across concurrent failures.
///
/// The first expired-token failure flips the `refreshing` flag and dispatches
/// the exchange; every later one enqueues a waiter. Exactly one settlement
/// path drains the queue, in enqueue order, and clears the flag afterwards.
/// The flag and queue are one atomic unit behind a single lock.
pub struct RefreshCoordinator<S> {
    http: Client,
    store: Arc<S>,
    exchange: RefreshExchange,
    state: Mutex<RefreshState>,
    default_auth: Arc<RwLock<Option<HeaderValue>>>,
    teardown: Option<Arc<dyn SessionTeardown>>,
    context: ContextMode,
}

impl<S> RefreshCoordinator<S>
where
    S: CredentialStore + 'static,
{
    pub(crate) fn new(
        http: Client,
        store: Arc<S>,
        exchange: RefreshExchange,
        default_auth: Arc<RwLock<Option<HeaderValue>>>,
        teardown: Option<Arc<dyn SessionTeardown>>,
        context: ContextMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            http,
            store,
            exchange,
            state: Mutex::new(RefreshState::default()),
            default_auth,
            teardown,
            context,
        })
    }

    /// Classify a failed response. Expired-token failures suspend the caller
    /// until the in-flight refresh settles, then replay the original request
    /// with the new credential; everything else propagates.
    pub async fn recover(self: &Arc<Self>, failed: FailedRequest) -> Result<Response, AuthError> {
        if failed.status != StatusCode::UNAUTHORIZED {
            return Err(AuthError::Upstream {
                status: failed.status,
                code: failed.code,
                body: failed.body,
            });
        }

        if failed.code.as_deref() != Some(TOKEN_EXPIRED_CODE) {
            // Any other 401 cause is unrecoverable: the session is gone.
            self.run_teardown();
            return Err(AuthError::Upstream {
                status: failed.status,
                code: failed.code,
                body: failed.body,
            });
        }

        let mut request = failed.request;
        let token = self.join_refresh().await?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, bearer_header(&token)?);
        tracing::debug!(url = %request.url(), "replaying request with refreshed credential");
        Ok(self.http.execute(request).await?)
    }

    /// Join the in-flight refresh exchange, or start one, and return the new
    /// access token. Same single-flight guarantees as the failure path.
    pub async fn force_refresh(self: &Arc<Self>) -> Result<String, AuthError> {
        self.join_refresh().await
    }

    async fn join_refresh(self: &Arc<Self>) -> Result<String, AuthError> {
        let (tx, rx) = oneshot::channel();
        let starts_exchange = {
            let mut state = self.state.lock().await;
            state.waiters.push_back(tx);
            // Flag must flip before the exchange is dispatched so no later
            // failure can start a second one.
            !std::mem::replace(&mut state.refreshing, true)
        };

        if starts_exchange {
            tracing::debug!("access token expired, starting refresh exchange");
            let coordinator = Arc::clone(self);
            tokio::spawn(async move { coordinator.run_exchange().await });
        } else {
            tracing::debug!("access token expired, waiting on refresh already in flight");
        }

        match rx.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(err)) => Err(AuthError::RefreshFailed(err)),
            Err(_) => Err(AuthError::RefreshInterrupted),
        }
    }

    /// Owns the in-flight exchange: the only path allowed to drain the queue
    /// and clear the flag.
    async fn run_exchange(self: Arc<Self>) {
        match self.perform_refresh().await {
            Ok(token) => {
                let mut state = self.state.lock().await;
                for waiter in state.waiters.drain(..) {
                    let _ = waiter.send(Ok(token.clone()));
                }
                state.refreshing = false;
            }
            Err(err) => {
                tracing::warn!(error = %err, "refresh exchange failed");
                let shared = Arc::new(err);
                {
                    let mut state = self.state.lock().await;
                    for waiter in state.waiters.drain(..) {
                        let _ = waiter.send(Err(Arc::clone(&shared)));
                    }
                    state.refreshing = false;
                }
                self.run_teardown();
            }
        }
    }

    async fn perform_refresh(&self) -> Result<String, AuthError> {
        let pair = self.store.get()?.ok_or(AuthError::RefreshUnavailable)?;
        if pair.refresh_token.is_empty() {
            return Err(AuthError::RefreshUnavailable);
        }

        let exchanged = self.exchange.refresh(&pair.refresh_token).await?;

        let options = PersistOptions::default();
        self.store
            .set(ACCESS_TOKEN_ENTRY, &exchanged.access_token, &options)?;
        // Keep the previous refresh token when the endpoint does not rotate.
        let next_refresh = exchanged.refresh_token.unwrap_or(pair.refresh_token);
        self.store
            .set(REFRESH_TOKEN_ENTRY, &next_refresh, &options)?;

        let header = bearer_header(&exchanged.access_token)?;
        *self.default_auth.write().await = Some(header);
        tracing::info!("access token refreshed");
        Ok(exchanged.access_token)
    }

    fn run_teardown(&self) {
        if self.context == ContextMode::Server {
            tracing::debug!("skipping session teardown outside a client-capable context");
            return;
        }
        if let Some(teardown) = &self.teardown {
            teardown.invoke();
        }
    }
}
