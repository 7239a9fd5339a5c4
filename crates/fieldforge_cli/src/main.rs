//! Operator CLI for attribute provisioning.
//!
//! # Responsibility
//! - Drive `fieldforge_core` against one database file.
//! - Print one line per result; exit non-zero on failure.

use clap::{Parser, Subcommand};
use fieldforge_core::{
    default_log_level, init_logging, open_db, parse_selection_options, CreateAttributeRequest,
    OwnerKind, ProvisionError, ProvisioningConfig, ProvisioningContext, SqliteProvisioner,
    TargetView,
};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "fieldforge")]
#[command(about = "Provision typed attributes on record kinds at runtime")]
#[command(version)]
struct Cli {
    /// SQLite database file (created and migrated when missing)
    #[arg(long, default_value = "fieldforge.db")]
    db: PathBuf,

    /// JSON provisioning config overriding defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Absolute directory for log files; logging stays off without it
    #[arg(long)]
    log_dir: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an attribute
    Add {
        #[arg(value_parser = parse_owner_kind)]
        owner_kind: OwnerKind,
        /// Label the physical name is derived from
        label: String,
        /// text, integer, decimal, boolean, date, datetime or enumerated
        logical_type: String,
        /// Selection option as `key:label`; repeatable
        #[arg(long = "option")]
        options: Vec<String>,
        /// Restrict the attribute to one owning record
        #[arg(long)]
        scope: Option<i64>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Remove an attribute and its column and fragments
    Remove {
        #[arg(value_parser = parse_owner_kind)]
        owner_kind: OwnerKind,
        physical_name: String,
    },
    /// List attribute definitions
    List {
        #[arg(value_parser = parse_owner_kind)]
        owner_kind: OwnerKind,
        #[arg(long)]
        scope: Option<i64>,
    },
    /// Print a compiled view
    View {
        #[arg(value_parser = parse_owner_kind)]
        owner_kind: OwnerKind,
        #[arg(value_parser = parse_target_view)]
        target_view: TargetView,
    },
    /// Parse `key:label` lines the way `add --option` does
    ParseOptions { text: String },
}

fn parse_owner_kind(value: &str) -> Result<OwnerKind, String> {
    OwnerKind::parse(value).ok_or_else(|| {
        format!("unknown owner kind `{value}`; expected group, sub_item or sub_item_activity")
    })
}

fn parse_target_view(value: &str) -> Result<TargetView, String> {
    TargetView::parse(value)
        .ok_or_else(|| format!("unknown view `{value}`; expected tree, form or kanban"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).map_err(|err| err.to_string())?;
    }

    if let Command::ParseOptions { text } = &cli.command {
        for option in parse_selection_options(text) {
            println!("{}\t{}", option.key, option.label);
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| format!("cannot read `{}`: {err}", path.display()))?;
            ProvisioningConfig::from_json_str(&text).map_err(|err| err.to_string())?
        }
        None => ProvisioningConfig::default(),
    };
    let context = Arc::new(ProvisioningContext::new(config).map_err(|err| err.to_string())?);
    let conn = open_db(&cli.db).map_err(|err| err.to_string())?;
    let provisioner = SqliteProvisioner::sqlite(&conn, context).map_err(describe)?;
    info!(
        "event=cli_command module=cli status=start db={}",
        cli.db.display()
    );

    match cli.command {
        Command::Add {
            owner_kind,
            label,
            logical_type,
            options,
            scope,
            actor,
        } => {
            let mut request = CreateAttributeRequest::new(owner_kind, label, logical_type)
                .with_options(parse_selection_options(&options.join("\n")));
            request.scope_entity_id = scope;
            request.created_by = actor;
            provisioner.create(&request).map_err(describe)?;
            println!("status=success");
        }
        Command::Remove {
            owner_kind,
            physical_name,
        } => {
            provisioner
                .remove(owner_kind, &physical_name)
                .map_err(describe)?;
            println!("status=success");
        }
        Command::List { owner_kind, scope } => {
            for definition in provisioner.list(owner_kind, scope).map_err(describe)? {
                let scope = definition
                    .scope_entity_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string());
                println!(
                    "{}\t{}\t{}\t{}",
                    definition.physical_name,
                    definition.logical_type,
                    scope,
                    definition.display_label
                );
            }
        }
        Command::View {
            owner_kind,
            target_view,
        } => {
            provisioner.refresh_cache(owner_kind).map_err(describe)?;
            let arch = provisioner
                .context()
                .cache
                .compiled_view(owner_kind, target_view)
                .ok_or_else(|| format!("no {target_view} view for `{owner_kind}`"))?;
            println!("{arch}");
        }
        Command::ParseOptions { .. } => {}
    }
    Ok(())
}

fn describe(err: ProvisionError) -> String {
    format!("status={} {err}", err.status().as_str())
}
