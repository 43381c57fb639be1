use hyper::http::header::{self, HeaderValue};
use hyper_util::rt::TokioExecutor;
use kube::client::Body;
use kube::{client::ConfigExt, Client, Config};
use tracing::warn;

use crate::error::Result;

/// Create a new k8s client to interact with the k8s cluster api.
///
/// In-cluster configuration is preferred; the local kubeconfig is the
/// fallback (`Config::infer` handles both). Requests carry `user_agent`
/// (or [`super::USER_AGENT`] when `None`) so audit logs attribute the
/// watches to this process rather than a generic library client. An
/// invalid user agent is logged and skipped, not fatal.
///
/// # Errors
///
/// Will return `Err` if a cluster configuration can not be inferred or the
/// TLS stack can not be initialized.
pub async fn new(user_agent: Option<&str>) -> Result<Client> {
    let config = Config::infer().await?;

    let https = config.rustls_https_connector()?;

    let agent = user_agent.unwrap_or(super::USER_AGENT);
    let agent_header = match HeaderValue::from_str(agent) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                user_agent = agent,
                "invalid user agent header, sending requests without one"
            );
            None
        }
    };

    let service = tower::ServiceBuilder::new()
        .layer(config.base_uri_layer())
        .option_layer(config.auth_layer()?)
        .map_request(move |mut request: hyper::http::Request<Body>| {
            if let Some(value) = &agent_header {
                request
                    .headers_mut()
                    .insert(header::USER_AGENT, value.clone());
            }
            request
        })
        .map_err(tower::BoxError::from)
        .service(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https));

    let client = Client::new(service, config.default_namespace);

    Ok(client)
}
