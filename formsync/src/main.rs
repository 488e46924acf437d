use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::{CommandFactory, Parser};
use formsync::config::{Args, Command, DocumentsCommand, TeamCommand};
use formsync::resources::FORM_NAMES;
use formsync::session::{ACCESS_TOKEN, REFRESH_TOKEN};
use formsync::upload::FileUpload;
use formsync::{Config, Panels, Session, SyncedForm, telemetry};
use serde_json::{Map, Value, json};

/// `field=value`, with the value read as JSON when it parses and as text otherwise.
fn parse_assignment(raw: &str) -> anyhow::Result<(String, Value)> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected field=value, got {raw:?}"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((field.trim().to_string(), value))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_form(panels: &Panels, resource: &str, id: Option<&str>) -> anyhow::Result<Arc<dyn SyncedForm>> {
    panels
        .form(resource, id)
        .ok_or_else(|| anyhow!("unknown resource {resource:?}; expected one of: {}", FORM_NAMES.join(", ")))
}

async fn run(panels: &Panels, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { token, refresh_token } => {
            panels.session.set(ACCESS_TOKEN, token)?;
            if let Some(refresh) = refresh_token {
                panels.session.set(REFRESH_TOKEN, refresh)?;
            }
            print_json(&json!({ "status": "logged_in" }))
        }
        Command::Logout => {
            panels.session.clear_credentials()?;
            print_json(&json!({ "status": "logged_out" }))
        }
        Command::Show { resource, id } => {
            let form = open_form(panels, &resource, id.as_deref())?;
            form.load().await?;
            print_json(form.form().values())
        }
        Command::Set {
            resource,
            assignments,
            id,
            files,
        } => {
            let form = open_form(panels, &resource, id.as_deref())?;
            form.load().await?;
            for raw in &assignments {
                let (field, value) = parse_assignment(raw)?;
                form.set_field(&field, value)?;
            }
            for raw in &files {
                let (field, path) = raw
                    .split_once('=')
                    .ok_or_else(|| anyhow!("expected field=path, got {raw:?}"))?;
                let file = FileUpload::from_path(path)
                    .await
                    .with_context(|| format!("Failed to read {path}"))?;
                form.attach_file(field, file);
            }
            let ack = form.save().await?;
            print_json(&json!({ "saved": ack.body, "form": form.form().values() }))
        }
        Command::Team { action } => run_team(panels, action).await,
        Command::Documents { action } => run_documents(panels, action).await,
    }
}

async fn run_team(panels: &Panels, action: TeamCommand) -> anyhow::Result<()> {
    let team = panels.team();
    team.load().await?;

    match action {
        TeamCommand::List => {
            let members: Vec<Value> = team
                .members()
                .into_iter()
                .map(|member| {
                    let mut row: Map<String, Value> = member.values.into_values().into_iter().collect();
                    row.insert("id".to_string(), Value::String(member.id));
                    Value::Object(row)
                })
                .collect();
            print_json(&members)
        }
        TeamCommand::Set { id, assignments } => {
            for raw in &assignments {
                let (field, value) = parse_assignment(raw)?;
                team.set_field(&id, &field, value)?;
            }
            let report = team.save_all().await?;
            let failed: Vec<Value> = report
                .failed
                .iter()
                .map(|(id, e)| json!({ "id": id, "error": e.user_message() }))
                .collect();
            print_json(&json!({ "saved": report.saved, "failed": failed, "pending": team.changes() }))?;
            if !report.is_success() {
                bail!("{} team update(s) failed", report.failed.len());
            }
            Ok(())
        }
        TeamCommand::Invite { email, role } => {
            let invited = team.invite(&email, &role).await?;
            print_json(&invited)
        }
        TeamCommand::Remove { id } => {
            team.remove(&id).await?;
            print_json(&json!({ "removed": id }))
        }
    }
}

async fn run_documents(panels: &Panels, action: DocumentsCommand) -> anyhow::Result<()> {
    let documents = panels.documents();
    match action {
        DocumentsCommand::List => {
            let listing = documents.generated().await?;
            print_json(&json!({ "documents": listing.documents, "pending": listing.pending }))
        }
        DocumentsCommand::Templates => print_json(&documents.list_templates().await?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let panels = Panels::from_config(&config)?;
    let result = run(&panels, command).await;
    panels.close();

    result.map_err(|e| match e.downcast::<formsync::Error>() {
        Ok(e) => anyhow!(e.user_message()),
        Err(e) => e,
    })
}
