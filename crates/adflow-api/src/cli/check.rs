//! `adflow check`: verify the access token and list reachable ad accounts.

use adflow_infra::graph::AdAccount;
use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

/// Validate credentials against the configured ad account (if any) and list
/// the accounts the token can reach.
///
/// Exits with an error if the configured account rejects the token, so the
/// command is usable in scripts.
pub async fn check(state: &AppState, json: bool) -> Result<()> {
    state.require_token()?;

    let account = state.has_account().then(|| state.platform.ad_account());
    let validation = match &account {
        Some(_) => Some(state.platform.validate_credentials().await),
        None => None,
    };
    let accounts = state
        .platform
        .list_ad_accounts()
        .await
        .context("failed to list ad accounts")?;

    if json {
        let out = serde_json::json!({
            "account": account,
            "valid": validation.as_ref().map(Result::is_ok),
            "error": validation.as_ref().and_then(|v| v.as_ref().err()).map(ToString::to_string),
            "accounts": accounts,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_check(account.as_deref(), validation.as_ref(), &accounts);
    }

    if let Some(Err(err)) = validation {
        bail!("credentials rejected for {}: {err}", account.unwrap_or_default());
    }
    Ok(())
}

fn print_check(
    account: Option<&str>,
    validation: Option<&Result<(), adflow_types::error::PlatformError>>,
    accounts: &[AdAccount],
) {
    println!();
    match (account, validation) {
        (Some(account), Some(Ok(()))) => {
            println!("  {} Token accepted for {}", style("✓").green(), style(account).cyan());
        }
        (Some(account), Some(Err(err))) => {
            println!("  {} {}: {}", style("✗").red(), style(account).cyan(), style(err).red());
        }
        _ => println!("  {} No ad account configured", style("!").yellow()),
    }
    println!();

    if accounts.is_empty() {
        println!("  No ad accounts reachable with this token.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Account").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Currency"),
            Cell::new("Timezone"),
        ]);
    for acct in accounts {
        let status = if acct.is_active() {
            Cell::new("active").fg(Color::Green)
        } else {
            let code = acct
                .account_status
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".into());
            Cell::new(format!("inactive ({code})")).fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(&acct.id),
            Cell::new(acct.name.as_deref().unwrap_or("-")),
            status,
            Cell::new(acct.currency.as_deref().unwrap_or("-")),
            Cell::new(acct.timezone_name.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    println!();
}
