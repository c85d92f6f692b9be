use std::process;

use stowage::{
    application::error::AppError,
    config::{self, Command, InspectArgs, Settings},
    infra::{crypto::Codec, error::InfraError, storage::WebStorage, telemetry},
    util::bytes::{entry_size, format_bytes},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Command::Seal(_) => run_seal(&settings).await,
        Command::Open(_) => run_open(&settings).await,
        Command::Inspect(args) => run_inspect(&settings, &args).await,
    }
}

async fn run_seal(settings: &Settings) -> Result<(), AppError> {
    let secret = require_secret(settings)?;
    let input = read_stdin().await?;
    let plaintext = input.strip_suffix('\n').unwrap_or(&input);
    let plaintext = plaintext.strip_suffix('\r').unwrap_or(plaintext);

    let sealed = Codec::new().encrypt(plaintext, secret)?;
    write_stdout(&format!("{sealed}\n")).await
}

async fn run_open(settings: &Settings) -> Result<(), AppError> {
    let secret = require_secret(settings)?;
    let input = read_stdin().await?;

    let plaintext = Codec::new().decrypt(input.trim(), secret)?;
    write_stdout(&format!("{plaintext}\n")).await
}

async fn run_inspect(settings: &Settings, args: &InspectArgs) -> Result<(), AppError> {
    let path = settings.persist.storage_file.as_ref().ok_or_else(|| {
        AppError::validation("inspect needs a storage file: pass --storage-file or set persist.storage_file")
    })?;
    let secret = if args.decrypt {
        Some(require_secret(settings)?)
    } else {
        None
    };

    let storage = WebStorage::open_local_file(path, settings.persist.quota_bytes).await?;
    let mut entries = storage.entries();
    if let Some(key) = args.key.as_ref() {
        entries.retain(|candidate, _| candidate == key);
        if entries.is_empty() {
            return Err(AppError::validation(format!("no entry stored under `{key}`")));
        }
    }
    debug!(path = %path.display(), entries = entries.len(), "inspecting local storage");

    let codec = Codec::new();
    let mut listing = String::new();
    for (key, value) in &entries {
        let shown = match secret {
            Some(secret) => match codec.decrypt(value, secret) {
                Ok(plaintext) => plaintext,
                Err(err) => format!("<{err}>"),
            },
            None => value.clone(),
        };
        listing.push_str(&format!(
            "{key}\t{}\t{shown}\n",
            format_bytes(entry_size(key, value))
        ));
    }
    listing.push_str(&format!(
        "{} entries, {} of {} used\n",
        entries.len(),
        format_bytes(storage.used_bytes()),
        format_bytes(settings.persist.quota_bytes)
    ));

    write_stdout(&listing).await
}

fn require_secret(settings: &Settings) -> Result<&str, AppError> {
    settings.persist.secret.as_deref().ok_or_else(|| {
        AppError::validation("a secret is required: pass --secret or set STOWAGE__PERSIST__SECRET")
    })
}

async fn read_stdin() -> Result<String, AppError> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .map_err(|err| InfraError::io("reading standard input", err))?;
    Ok(input)
}

async fn write_stdout(text: &str) -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(text.as_bytes())
        .await
        .map_err(|err| InfraError::io("writing standard output", err))?;
    stdout
        .flush()
        .await
        .map_err(|err| InfraError::io("flushing standard output", err))?;
    Ok(())
}
