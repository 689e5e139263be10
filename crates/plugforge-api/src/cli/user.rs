//! User management CLI commands: create, list.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use plugforge_core::identity::PrincipalRepository;

use crate::state::AppState;

/// Create a user and print its API key once.
pub async fn create_user(state: &AppState, name: &str, json: bool) -> Result<()> {
    let issued = state.principals.create_principal(name).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "pid": issued.principal.pid,
                "name": issued.principal.name,
                "api_key": issued.api_key,
            })
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} Created user '{}' ({})",
        style("✓").green().bold(),
        style(&issued.principal.name).bold(),
        style(&issued.principal.pid).dim()
    );
    println!();
    println!("  API key (save this -- it won't be shown again):");
    println!();
    println!("  {}", style(&issued.api_key).yellow().bold());
    println!();

    Ok(())
}

/// List all users.
pub async fn list_users(state: &AppState, json: bool) -> Result<()> {
    let principals = state.principals.list_principals().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&principals)?);
        return Ok(());
    }

    if principals.is_empty() {
        println!();
        println!(
            "  {} No users yet. Create one with: {}",
            style("i").blue().bold(),
            style("plugforge user create <name>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for principal in &principals {
        table.add_row(vec![
            Cell::new(principal.pid.as_str()).fg(Color::Cyan),
            Cell::new(&principal.name),
            Cell::new(principal.created_at.format("%Y-%m-%d").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} user{}",
        style(principals.len()).bold(),
        if principals.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}
