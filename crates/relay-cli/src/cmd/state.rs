use crate::output::{print_json, print_table};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use relay_core::guard::Guard;
use relay_core::running::RunningState;
use relay_core::store::RedbStore;
use relay_core::RelayConfig;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum StateSubcommand {
    /// List stores that have a running-state document
    List,
    /// Show a store's running count, stop marker and per-key entries
    Show { store: String },
    /// Drop every trigger of a resource type for the store
    Stop { store: String, resource: String },
    /// Remove the stop marker
    ClearStop { store: String },
    /// Replace the document with an empty one
    Reset { store: String },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(
    config_path: Option<&Path>,
    db: Option<&Path>,
    subcommand: StateSubcommand,
    json: bool,
) -> Result<()> {
    let config = RelayConfig::load_or_default(config_path)?;
    let db_path = db
        .map(Path::to_path_buf)
        .or_else(|| config.server.state_db.clone())
        .ok_or_else(|| anyhow!("no state database: pass --db or set server.state_db"))?;
    let store = Arc::new(RedbStore::open(&db_path)?);

    if let StateSubcommand::List = subcommand {
        let stores = store.list_stores()?;
        if json {
            return print_json(&stores);
        }
        for id in stores {
            println!("{id}");
        }
        return Ok(());
    }

    let guard = Guard::new(store, config.guard.clone());
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match subcommand {
            StateSubcommand::List => Ok(()),
            StateSubcommand::Show { store } => match guard.inspect(&store).await? {
                Some(doc) => show(&store, &doc, json),
                None if json => print_json(&serde_json::Value::Null),
                None => {
                    println!("no running state for store {store}");
                    Ok(())
                }
            },
            StateSubcommand::Stop { store, resource } => {
                let doc = guard.stop(&store, &resource).await?;
                report(json, &doc, &format!("stopped '{resource}' triggers for store {store}"))
            }
            StateSubcommand::ClearStop { store } => {
                let doc = guard.clear_stop(&store).await?;
                report(json, &doc, &format!("cleared stop marker for store {store}"))
            }
            StateSubcommand::Reset { store } => {
                let doc = guard.reset(&store).await?;
                report(json, &doc, &format!("reset running state for store {store}"))
            }
        }
    })
}

fn report(json: bool, doc: &RunningState, message: &str) -> Result<()> {
    if json {
        return print_json(doc);
    }
    println!("{message}");
    Ok(())
}

fn show(store: &str, doc: &RunningState, json: bool) -> Result<()> {
    if json {
        return print_json(doc);
    }
    println!("store:    {store}");
    println!("version:  {}", doc.version);
    println!("running:  {}", doc.count);
    println!("stop:     {}", doc.stop.as_deref().unwrap_or("-"));
    println!("updated:  {}", doc.updated_at.to_rfc3339());
    if doc.keys.is_empty() {
        return Ok(());
    }
    println!();
    let stamp = |t: Option<DateTime<Utc>>| t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
    let rows = doc
        .keys
        .iter()
        .map(|(key, state)| vec![key.clone(), stamp(state.last_handled), stamp(state.init)])
        .collect();
    print_table(&["KEY", "LAST HANDLED", "ADMITTED"], rows);
    Ok(())
}
