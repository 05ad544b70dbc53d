use http::Extensions;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::sync::Arc;
use tokio::sync::OnceCell;
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

type ServiceAccountAuth = Authenticator<HttpsConnector<HttpConnector>>;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/datastore",
];

/// Injects a service-account bearer token into every outgoing request.
///
/// The authenticator is built lazily on first use and cached for the lifetime
/// of the client stack; cloning the middleware shares the cached token source.
#[derive(Clone)]
pub struct AuthMiddleware {
    inner: Arc<Inner>,
}

struct Inner {
    key: ServiceAccountKey,
    authenticator: OnceCell<ServiceAccountAuth>,
}

impl AuthMiddleware {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                authenticator: OnceCell::new(),
            }),
        }
    }

    pub(crate) fn project_id(&self) -> Option<&str> {
        self.inner.key.project_id.as_deref()
    }

    async fn bearer_token(&self) -> Result<String, anyhow::Error> {
        let auth = self
            .inner
            .authenticator
            .get_or_try_init(|| async {
                ServiceAccountAuthenticator::builder(self.inner.key.clone())
                    .build()
                    .await
            })
            .await?;

        let token = auth.token(SCOPES).await?;
        Ok(token
            .token()
            .ok_or_else(|| anyhow::anyhow!("token response contained no access token"))?
            .to_string())
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self.bearer_token().await.map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                "failed to obtain auth token: {}",
                e
            ))
        })?;

        let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| reqwest_middleware::Error::Middleware(anyhow::Error::new(e)))?;
        req.headers_mut().insert(header::AUTHORIZATION, value);

        next.run(req, extensions).await
    }
}
