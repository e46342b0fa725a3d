use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::auth::{
    bearer_header, AuthError, ContextMode, CredentialStore, FailedRequest, RefreshCoordinator,
    RefreshExchange, SessionTeardown,
};

const USER_AGENT: &str = "bearer-rs/0.1.0";
const REFRESH_PATH: &str = "/refresh";

/// Errors returned by [`ApiClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("upstream error {status}")]
    Upstream {
        status: StatusCode,
        code: Option<String>,
        body: String,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP client for a bearer-token API that transparently recovers from
/// expired access tokens.
///
/// Successful responses pass through untouched. A failed response is
/// classified from its status and machine-readable body `code`; expired-token
/// failures are handed to the [`RefreshCoordinator`], which suspends the
/// caller until the single in-flight refresh settles and then replays the
/// request with the new credential.
pub struct ApiClient<S> {
    http: Client,
    base_url: Url,
    default_auth: Arc<RwLock<Option<HeaderValue>>>,
    coordinator: Arc<RefreshCoordinator<S>>,
}

impl<S> ApiClient<S>
where
    S: CredentialStore + 'static,
{
    pub fn builder(base_url: Url, store: S) -> ApiClientBuilder<S> {
        ApiClientBuilder {
            base_url,
            store,
            teardown: None,
            context: ContextMode::default(),
        }
    }

    /// Build a client with the default options.
    pub fn new(base_url: Url, store: S) -> ClientResult<Self> {
        Self::builder(base_url, store).build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The coordinator behind this client, for wiring custom transports.
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator<S>> {
        &self.coordinator
    }

    /// Send a GET and decode the JSON response body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        Ok(response.json().await?)
    }

    /// Send a POST with a JSON body and decode the JSON response body.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// Refresh the stored credential now, joining any refresh already in
    /// flight, instead of waiting for a request to fail.
    pub async fn refresh_credentials(&self) -> ClientResult<()> {
        self.coordinator.force_refresh().await?;
        Ok(())
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<Response> {
        let url = self.base_url.join(path)?;
        let mut builder = self.http.request(method, url);
        if let Some(auth) = self.default_auth.read().await.clone() {
            builder = builder.header(AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.execute(builder.build()?).await
    }

    /// Issue a prepared request, transparently recovering from an expired
    /// access token. The caller sees only the final response; an intermediate
    /// expired-token 401 is invisible.
    pub async fn execute(&self, request: Request) -> ClientResult<Response> {
        let replay = request.try_clone();
        let response = self.http.execute(request).await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let code = error_code(&body);

        let Some(request) = replay else {
            // A streaming body cannot be captured for replay; surface the
            // failure rather than suspending the caller.
            return Err(ClientError::Upstream { status, code, body });
        };

        let failed = FailedRequest {
            request,
            status,
            code,
            body,
        };
        match self.coordinator.recover(failed).await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => Err(upstream_failure(response).await),
            Err(AuthError::Upstream { status, code, body }) => {
                Err(ClientError::Upstream { status, code, body })
            }
            Err(err) => Err(err.into()),
        }
    }
}

pub struct ApiClientBuilder<S> {
    base_url: Url,
    store: S,
    teardown: Option<Arc<dyn SessionTeardown>>,
    context: ContextMode,
}

impl<S> ApiClientBuilder<S>
where
    S: CredentialStore + 'static,
{
    /// Action run when authentication cannot be recovered.
    pub fn teardown(mut self, teardown: impl SessionTeardown + 'static) -> Self {
        self.teardown = Some(Arc::new(teardown));
        self
    }

    pub fn context(mut self, context: ContextMode) -> Self {
        self.context = context;
        self
    }

    pub fn build(self) -> ClientResult<ApiClient<S>> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        let store = Arc::new(self.store);
        let default_auth = Arc::new(RwLock::new(initial_auth_header(store.as_ref())?));
        let refresh_url = self.base_url.join(REFRESH_PATH)?;
        let exchange = RefreshExchange::new(http.clone(), refresh_url);
        let coordinator = RefreshCoordinator::new(
            http.clone(),
            store,
            exchange,
            Arc::clone(&default_auth),
            self.teardown,
            self.context,
        );
        Ok(ApiClient {
            http,
            base_url: self.base_url,
            default_auth,
            coordinator,
        })
    }
}

/// Seed the default `Authorization` header from whatever the store holds at
/// construction time.
fn initial_auth_header<S: CredentialStore>(store: &S) -> Result<Option<HeaderValue>, AuthError> {
    match store.get()? {
        Some(pair) => Ok(Some(bearer_header(&pair.access_token)?)),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.code)
}

async fn upstream_failure(response: Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let code = error_code(&body);
    ClientError::Upstream { status, code, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::{json, Value};

    use crate::auth::{MemoryCredentialStore, TokenPair};

    fn client(server: &MockServer, store: MemoryCredentialStore) -> ApiClient<MemoryCredentialStore> {
        ApiClient::new(Url::parse(&server.base_url()).unwrap(), store).unwrap()
    }

    fn seeded(server: &MockServer) -> ApiClient<MemoryCredentialStore> {
        client(
            server,
            MemoryCredentialStore::with_tokens(&TokenPair::new("stale", "refresh-1")),
        )
    }

    #[tokio::test]
    async fn successful_responses_pass_through() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/ping")
                .header("authorization", "Bearer stale");
            then.status(200).json_body_obj(&json!({ "pong": true }));
        });

        let api = seeded(&server);
        let body: Value = api.get("/ping").await.unwrap();
        mock.assert();
        assert_eq!(body["pong"], true);
    }

    #[tokio::test]
    async fn post_sends_json_and_decodes_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/items")
                .json_body_obj(&json!({ "name": "widget" }));
            then.status(201).json_body_obj(&json!({ "id": 7 }));
        });

        let api = seeded(&server);
        let created: Value = api.post("/items", &json!({ "name": "widget" })).await.unwrap();
        mock.assert();
        assert_eq!(created["id"], 7);
    }

    #[tokio::test]
    async fn empty_store_sends_no_credential() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/public");
            then.status(200).json_body_obj(&json!({ "ok": true }));
        });

        let api = client(&server, MemoryCredentialStore::new());
        let body: Value = api.get("/public").await.unwrap();
        mock.assert();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn expired_token_is_invisible_to_the_caller() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/projects")
                .header("authorization", "Bearer stale");
            then.status(401)
                .json_body_obj(&json!({ "code": "token.expired" }));
        });
        let refresh = server.mock(|when, then| {
            when.method(POST)
                .path("/refresh")
                .json_body_obj(&json!({ "refreshToken": "refresh-1" }));
            then.status(200).json_body_obj(&json!({
                "token": "access-2",
                "refreshToken": "refresh-2",
            }));
        });
        let replayed = server.mock(|when, then| {
            when.method(GET)
                .path("/projects")
                .header("authorization", "Bearer access-2");
            then.status(200).json_body_obj(&json!({ "projects": ["a"] }));
        });

        let api = seeded(&server);
        let body: Value = api.get("/projects").await.unwrap();
        assert_eq!(body["projects"][0], "a");
        refresh.assert();
        replayed.assert();
    }

    #[tokio::test]
    async fn failed_replay_surfaces_the_final_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/gone")
                .header("authorization", "Bearer stale");
            then.status(401)
                .json_body_obj(&json!({ "code": "token.expired" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/refresh");
            then.status(200)
                .json_body_obj(&json!({ "token": "access-2" }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/gone")
                .header("authorization", "Bearer access-2");
            then.status(404).json_body_obj(&json!({ "code": "not.found" }));
        });

        let api = seeded(&server);
        match api.get::<Value>("/gone").await.unwrap_err() {
            ClientError::Upstream { status, code, .. } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(code.as_deref(), Some("not.found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
