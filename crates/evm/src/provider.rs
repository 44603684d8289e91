use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};

/// Create a type-erased HTTP provider from an RPC URL string.
pub fn create_http_provider(rpc_url: &str) -> eyre::Result<DynProvider> {
    let url = rpc_url.parse()?;
    let provider = ProviderBuilder::new().connect_http(url);
    Ok(provider.erased())
}

/// Create a type-erased WebSocket provider, used for live log subscriptions.
pub async fn create_ws_provider(ws_url: &str) -> eyre::Result<DynProvider> {
    let provider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(ws_url))
        .await?;
    Ok(provider.erased())
}
