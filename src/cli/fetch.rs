//! `fetch` command implementation.

use serde_json::Value;

use crate::cli::args::{FetchArgs, FetchKind, OutputFormat};
use crate::core::api::{DEFAULT_PAGE_SIZE, KiwifyClient, PageRequest};
use crate::core::hub::Hub;
use crate::error::{ExitCode, HubError, Result};
use crate::render;
use crate::storage::config::ResolvedConfig;

/// Execute the fetch command.
pub async fn execute(
    args: &FetchArgs,
    config: &ResolvedConfig,
    format: OutputFormat,
    pretty: bool,
) -> Result<ExitCode> {
    validate(args)?;
    let hub = Hub::from_config(config)?;
    let payload = fetch(&hub.client, args).await?;

    let output = render::render_payload(&payload, format, pretty)?;
    println!("{output}");
    Ok(ExitCode::Success)
}

fn validate(args: &FetchArgs) -> Result<()> {
    let needs_id = matches!(
        args.kind,
        FetchKind::Sale | FetchKind::Product | FetchKind::Withdrawal
    );
    if needs_id && args.id.is_none() {
        return Err(HubError::Config(format!(
            "fetch {} requires an id",
            args.kind.as_str()
        )));
    }
    if args.page == 0 || args.page_size == Some(0) {
        return Err(HubError::Config(
            "page and page size must be positive".to_string(),
        ));
    }
    Ok(())
}

async fn fetch(client: &KiwifyClient, args: &FetchArgs) -> Result<Value> {
    let id = args.id.as_deref().unwrap_or_default();
    let page = PageRequest {
        page: args.page,
        page_size: args.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        range: None,
    };

    let value = match args.kind {
        FetchKind::Sale => client.get_sale(id).await?,
        FetchKind::Product => client.get_product(id).await?,
        FetchKind::Products => serde_json::to_value(client.list_products(&page).await?)?,
        FetchKind::Balances => match args.id.as_deref() {
            Some(legal_entity) => client.fetch_balance_by_legal_entity(legal_entity).await?,
            None => client.fetch_balances().await?,
        },
        FetchKind::Withdrawal => client.get_withdrawal(id).await?,
        FetchKind::Withdrawals => {
            serde_json::to_value(client.list_withdrawals(&page, args.id.as_deref()).await?)?
        }
        FetchKind::Account => client.fetch_account().await?,
    };
    Ok(value)
}
