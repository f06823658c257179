//! `livelist` subcommands: interactive sessions over a data source.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{
    fetch::DataSource,
    logging,
    settings::Settings,
    sources::{JsonSearchConfig, JsonSearchSource, NotesSource},
    types::ListItem,
    view::{GenerationOutcome, LiveList, QueryTask, ViewConfig},
};

const SCHEMA_VERSION: &str = "livelist.v1";

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    /// Search markdown notes in a vault directory.
    Notes(NotesArgs),
    /// Search a JSON HTTP endpoint.
    Http(HttpArgs),
    /// Print the path of the most recent log file.
    Logs,
}

#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Re-run the current query on the configured refresh interval.
    #[arg(long)]
    pub watch: bool,

    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct NotesArgs {
    #[arg(long, value_name = "DIR")]
    pub vault: PathBuf,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Debug, Clone, Args)]
pub struct HttpArgs {
    #[arg(long, value_name = "URL")]
    pub url: String,

    #[arg(long, value_name = "NAME", default_value = "q")]
    pub query_param: String,

    #[arg(long, value_name = "POINTER", default_value = "")]
    pub items_pointer: String,

    #[arg(long, value_name = "FIELD", default_value = "id")]
    pub key_field: String,

    #[arg(long, value_name = "FIELD", default_value = "title")]
    pub title_field: String,

    #[arg(long, value_name = "FIELD")]
    pub subtitle_field: Option<String>,

    #[arg(long, value_name = "FIELD")]
    pub tags_field: Option<String>,

    #[arg(long, value_name = "FIELD")]
    pub body_field: Option<String>,

    /// Restrict every search to this tag.
    #[arg(long, value_name = "TAG")]
    pub scope: Option<String>,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// One line of session input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionInput<'a> {
    Query(&'a str),
    Refresh,
    More,
    Quit,
}

fn parse_input(line: &str) -> SessionInput<'_> {
    match line.trim() {
        ":refresh" => SessionInput::Refresh,
        ":more" => SessionInput::More,
        ":quit" | ":q" => SessionInput::Quit,
        _ => SessionInput::Query(line.trim_end_matches(['\r', '\n'])),
    }
}

pub async fn run(command: RootCommand, settings: &Settings, json_output: bool) -> i32 {
    match execute(command, settings, json_output).await {
        Ok(()) => 0,
        Err(err) => {
            print_error(&err, json_output);
            err.exit_code
        }
    }
}

#[derive(Debug)]
struct CliError {
    exit_code: i32,
    code: &'static str,
    message: String,
}

type CliResult<T> = Result<T, CliError>;

async fn execute(command: RootCommand, settings: &Settings, json_output: bool) -> CliResult<()> {
    match command {
        RootCommand::Notes(args) => {
            if !args.vault.is_dir() {
                return Err(not_found_error(
                    "VAULT_NOT_FOUND",
                    format!("vault directory '{}' does not exist", args.vault.display()),
                ));
            }
            let config = session_config(settings, &args.session, None);
            let list = LiveList::new(NotesSource::new(args.vault), config).map_err(runtime_error)?;
            run_session(list, json_output).await
        }
        RootCommand::Http(args) => {
            if args.url.trim().is_empty() {
                return Err(usage_error("URL_REQUIRED", "--url cannot be empty"));
            }
            let config = session_config(settings, &args.session, args.scope.clone());
            let source = JsonSearchSource::new(http_config(&args, settings));
            let _ = source.catalog().prewarm();
            let list = LiveList::new(source, config).map_err(runtime_error)?;
            run_session(list, json_output).await
        }
        RootCommand::Logs => {
            let path = logging::get_recent_log_path().ok_or_else(|| {
                not_found_error("LOG_NOT_FOUND", "no log file has been written yet")
            })?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn session_config(settings: &Settings, args: &SessionArgs, scope: Option<String>) -> ViewConfig {
    let mut config = settings.view_config(args.watch);
    if let Some(limit) = args.limit {
        config.result_limit = limit;
    }
    config.initial_scope = scope.filter(|scope| !scope.trim().is_empty());
    config
}

fn http_config(args: &HttpArgs, settings: &Settings) -> JsonSearchConfig {
    JsonSearchConfig {
        query_param: args.query_param.clone(),
        items_pointer: args.items_pointer.clone(),
        key_field: args.key_field.clone(),
        title_field: args.title_field.clone(),
        subtitle_field: args.subtitle_field.clone(),
        tags_field: args.tags_field.clone(),
        body_field: args.body_field.clone(),
        timeout: settings.request_timeout(),
        ..JsonSearchConfig::new(args.url.trim())
    }
}

/// Reads queries from stdin until EOF or `:quit`, printing every commit.
async fn run_session<S: DataSource>(list: LiveList<S>, json_output: bool) -> CliResult<()> {
    let (commits_tx, mut commits) = mpsc::unbounded_channel();
    list.subscribe(move |count| {
        let _ = commits_tx.send(count);
    });

    let mut pending = list.submit(list.config().initial_params()).map(report_outcome);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => return Err(runtime_error(err)),
                };
                let task = match parse_input(&line) {
                    SessionInput::Quit => {
                        list.dispose();
                        return Ok(());
                    }
                    SessionInput::Refresh => list.refresh(),
                    SessionInput::More => {
                        let task = list.load_more();
                        if task.is_none() {
                            eprintln!("no more results");
                        }
                        task
                    }
                    SessionInput::Query(text) => list.update_query(text),
                };
                if let Some(task) = task {
                    pending = Some(report_outcome(task));
                }
            }
            Some(count) = commits.recv() => print_snapshot(&list, count, json_output),
        }
    }

    // Input ended; let the last submission land before exiting.
    if let Some(pending) = pending {
        let _ = pending.await;
    }
    while let Ok(count) = commits.try_recv() {
        print_snapshot(&list, count, json_output);
    }
    list.dispose();
    Ok(())
}

fn report_outcome(task: QueryTask) -> JoinHandle<()> {
    tokio::spawn(async move {
        let generation = task.generation();
        if let GenerationOutcome::Errored { code } = task.outcome().await {
            warn!(generation, code, "query failed; showing previous results");
            eprintln!("error[{code}]: query failed; showing previous results");
        }
    })
}

fn print_snapshot<S: DataSource>(list: &LiveList<S>, count: usize, json_output: bool) {
    let items = list.get_items();
    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "count": count,
            "has_more": list.has_more(),
            "items": items.iter().map(|item| item_json(item)).collect::<Vec<_>>(),
        });
        println!("{payload}");
        return;
    }

    let empty_hint = list.empty_state().map(|state| state.message());
    println!(
        "{}",
        render_snapshot_text(&items, list.has_more(), empty_hint)
    );
}

fn render_snapshot_text(
    items: &[Arc<ListItem>],
    has_more: bool,
    empty_hint: Option<&str>,
) -> String {
    if items.is_empty() {
        return format!("0 items ({})", empty_hint.unwrap_or("empty"));
    }

    let rows = items
        .iter()
        .map(|item| {
            let fields = item.fields();
            let tags = fields
                .tags
                .iter()
                .map(|tag| tag.text.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                item.key().to_string(),
                fields.title.replace('\n', " "),
                fields.subtitle.replace('\n', " "),
                tags,
            ]
        })
        .collect::<Vec<_>>();

    let mut text = format!("{} items", items.len());
    if has_more {
        text.push_str(" (:more for next page)");
    }
    text.push('\n');
    text.push_str(&render_text_table(&["KEY", "TITLE", "SUBTITLE", "TAGS"], &rows));
    text
}

fn item_json(item: &ListItem) -> Value {
    let fields = item.fields();
    json!({
        "key": item.key().as_str(),
        "title": fields.title,
        "subtitle": fields.subtitle,
        "tags": fields.tags.iter().map(|tag| tag.text.as_str()).collect::<Vec<_>>(),
        "revision": item.revision(),
    })
}

fn render_text_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            let width = cell.chars().count();
            if width > widths[index] {
                widths[index] = width;
            }
        }
    }

    let border = format!(
        "+{}+",
        widths
            .iter()
            .map(|width| "-".repeat(*width + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let render_row = |cells: Vec<&str>| {
        format!(
            "| {} |",
            cells
                .iter()
                .enumerate()
                .map(|(index, cell)| format!("{cell:<width$}", width = widths[index]))
                .collect::<Vec<_>>()
                .join(" | ")
        )
    };

    let mut lines = vec![border.clone(), render_row(headers.to_vec()), border.clone()];
    for row in rows {
        lines.push(render_row(row.iter().map(String::as_str).collect()));
    }
    lines.push(border);
    lines.join("\n")
}

fn usage_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 2,
        code,
        message: message.into(),
    }
}

fn not_found_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 3,
        code,
        message: message.into(),
    }
}

fn runtime_error(err: impl Into<anyhow::Error>) -> CliError {
    CliError {
        exit_code: 5,
        code: "RUNTIME_ERROR",
        message: format_anyhow_error_chain(&err.into()),
    }
}

fn print_error(err: &CliError, json_output: bool) {
    error!(code = err.code, message = %err.message, "cli command failed");

    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "error": {
                "code": err.code,
                "message": err.message,
            }
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => eprintln!("{value}"),
            Err(_) => eprintln!("{}", payload),
        }
        return;
    }

    eprintln!("error[{}]: {}", err.code, err.message);
}

fn format_anyhow_error_chain(err: &anyhow::Error) -> String {
    let mut seen = HashSet::new();
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if !seen.insert(text.clone()) {
            continue;
        }
        parts.push(text);
    }

    parts.join(": ")
}
