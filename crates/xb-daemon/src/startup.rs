//! Assembles the serving stack from configuration and session material.
//!
//! Order matters: the signing context is primed first, because the header
//! baseline and the middleware both borrow its credentials. Any failure
//! here happens before the readiness line.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use xb_bridge::action_registry::ActionContext;
use xb_bridge::actions::builtin_actions;
use xb_bridge::bridge::CommandBridge;
use xb_core::config::Config;
use xb_core::credentials::{cookie_header, csrf_token, CredentialProvider, FileCredentialProvider};
use xb_harness::graphql::GraphqlClient;
use xb_harness::headers::HeaderStore;
use xb_harness::middleware::{HeaderInjectionMiddleware, SigningPolicy};
use xb_harness::process_signer::ProcessSigner;
use xb_harness::signing::{SigningContext, TransactionSigner};
use xb_harness::transport::{ReqwestTransport, Transport};

/// Build the bridge from the on-disk credential export and the configured
/// signer helper.
pub fn build_bridge(config: &Config) -> Result<CommandBridge> {
    let provider = FileCredentialProvider::new(&config.credentials)
        .context("opening credential data directory")?;
    let bootstrap = provider
        .transaction_bootstrap()
        .context("reading transaction bootstrap documents")?;
    let signer = ProcessSigner::new(&config.signer.command, bootstrap, config.signer.timeout())
        .context("configuring transaction signer ([signer] command)")?;
    assemble(config, &provider, Arc::new(signer))
}

/// Wire an already constructed signer into the full stack.
pub fn assemble(
    config: &Config,
    provider: &dyn CredentialProvider,
    signer: Arc<dyn TransactionSigner>,
) -> Result<CommandBridge> {
    let cookies = provider.cookies().context("reading session cookies")?;
    let signing = Arc::new(
        SigningContext::prime(
            cookie_header(&cookies),
            csrf_token(&cookies).unwrap_or_default(),
            signer,
        )
        .context("priming signing context")?,
    );

    let common_headers = provider
        .common_headers()
        .context("reading common request headers")?;
    let store = Arc::new(
        HeaderStore::from_session(&common_headers, &signing)
            .context("building session header baseline")?,
    );
    let policy = SigningPolicy::from_config(&config.platform).context("signing policy")?;

    let network: Arc<dyn Transport> = Arc::new(
        ReqwestTransport::new(config.platform.timeout()).context("building HTTP client")?,
    );
    let transport: Arc<dyn Transport> = Arc::new(HeaderInjectionMiddleware::new(
        network,
        store.clone(),
        signing.clone(),
        policy,
    ));
    let client = GraphqlClient::new(transport, &config.platform).context("platform client")?;

    info!(
        cookies = cookies.len(),
        baseline_headers = store.baseline().len(),
        serialized_signer = signing.is_serialized(),
        base_url = %config.platform.base_url,
        "session primed"
    );

    let context = ActionContext::new(Arc::new(client), signing);
    Ok(CommandBridge::new(builtin_actions(), context, config.bridge.clone()))
}
