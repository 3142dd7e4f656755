// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use snafu::{ResultExt, Whatever, whatever};
use spool_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use spool_queue::{CancellationToken, PersistedQueue, QueueBuilder, path::parse_data_file_name};
use tracing::info;

mod build_info;

type Queue = PersistedQueue<Value>;

#[derive(Debug, Parser)]
#[clap(
name = "spool",
about = "Inspect and operate a persisted file queue",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Queue root directory; holds `Data` and `Poison`.
    #[arg(long, global = true, env = "SPOOL_ROOT", default_value = "./queue")]
    root: PathBuf,

    /// Give up on the queue lock after this many milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    lock_timeout_ms: u64,

    /// fsync every item written by `push`.
    #[arg(long, global = true)]
    sync_writes: bool,

    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    log_format: Format,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => Self::Text,
            Format::Json => Self::Json,
        }
    }
}

impl GlobalArgs {
    fn open(&self) -> Result<Queue, Whatever> {
        QueueBuilder::new(&self.root)
            .lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .sync_writes(self.sync_writes)
            .build()
            .with_whatever_context(|_| format!("Failed to open queue at {}", self.root.display()))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Push(PushArgs),
    Pop(PopArgs),
    Peek(PeekArgs),
    Count(CountArgs),
    List(ListArgs),
    Drain(DrainArgs),
    Clear(ClearArgs),
    Heal(HealArgs),
    Poison(PoisonArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r#"

Append a JSON value to the tail of the queue.
Examples:

spool push '{"id": 1, "to": "ops@example.com"}'

"#)]
struct PushArgs {
    /// The item, as JSON.
    item: String,
}

impl PushArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        let item: Value = serde_json::from_str(&self.item).whatever_context("Item is not JSON")?;
        queue
            .enqueue_async(&item, cancel)
            .await
            .whatever_context("Failed to enqueue")?;
        info!(root = %queue.config().root.display(), "Item enqueued");
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove the head item and print it.
Examples:

spool pop

")]
struct PopArgs {}

impl PopArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        match queue
            .try_dequeue_async(cancel)
            .await
            .whatever_context("Failed to dequeue")?
        {
            Some(item) => print_item(&item),
            None => whatever!("Queue is empty"),
        }
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the head item without removing it.
Examples:

spool peek

")]
struct PeekArgs {}

impl PeekArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        match queue
            .try_peek_async(cancel)
            .await
            .whatever_context("Failed to peek")?
        {
            Some(item) => print_item(&item),
            None => whatever!("Queue is empty"),
        }
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the number of queued items.
Examples:

spool count

")]
struct CountArgs {}

impl CountArgs {
    async fn run(&self, queue: &Queue) -> Result<(), Whatever> {
        let count = queue
            .count_async()
            .await
            .whatever_context("Failed to count")?;
        println!("{count}");
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print every queued item, head first, one JSON value per line.
Examples:

spool list

")]
struct ListArgs {}

impl ListArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        let items = queue
            .snapshot_async(cancel)
            .await
            .whatever_context("Failed to list")?;
        items.iter().try_for_each(print_item)
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove items from the head and print them, one JSON value per line.
The items are only removed once they have all been written to stdout.
Examples:

spool drain
spool drain --max 100

")]
struct DrainArgs {
    /// Stop after this many items.
    #[arg(long)]
    max: Option<usize>,
}

impl DrainArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        let max = self.max.unwrap_or(usize::MAX);
        let mut taken = 0usize;
        let drained = queue
            .dequeue_while_with_action_async(
                &mut taken,
                |_, taken| {
                    *taken += 1;
                    *taken <= max
                },
                |items| async move { items.iter().try_for_each(print_item) },
                cancel,
            )
            .await
            .whatever_context("Failed to drain")?;
        info!(drained, "Drain finished");
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove every item. Items that cannot be deleted are moved to Poison.
Examples:

spool clear

")]
struct ClearArgs {}

impl ClearArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        let removed = queue
            .clear_async(cancel)
            .await
            .whatever_context("Failed to clear")?;
        println!("{removed}");
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Look for unreadable items, then forget excluded files that no longer exist.
Prints the files that are still excluded.
Examples:

spool heal

")]
struct HealArgs {}

impl HealArgs {
    async fn run(&self, queue: &Queue, cancel: &CancellationToken) -> Result<(), Whatever> {
        // A full scan routes every unreadable file through quarantine.
        queue
            .snapshot_async(cancel)
            .await
            .whatever_context("Failed to scan queue")?;
        let healed = queue.heal_exclusions_async().await;
        info!(healed, "Exclusions healed");
        for name in queue.excluded_files() {
            println!("{name}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

List quarantined files with the time they were enqueued.
Examples:

spool poison

")]
struct PoisonArgs {}

impl PoisonArgs {
    fn run(&self, queue: &Queue) -> Result<(), Whatever> {
        let names = queue
            .poison_files()
            .whatever_context("Failed to list poison directory")?;
        for name in names {
            match parse_data_file_name(&name) {
                Some((enqueued_at, _)) => println!("{name}\t{}", enqueued_at.to_rfc3339()),
                None => println!("{name}"),
            }
        }
        Ok(())
    }
}

fn print_item(item: &Value) -> Result<(), Whatever> {
    let line = serde_json::to_string(item).whatever_context("Failed to encode item")?;
    println!("{line}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let logging = LoggingOptions::builder()
        .level(cli.global.log_level.clone())
        .log_format(cli.global.log_format.into())
        .build();
    let _guards = init_global_logging("spool", &logging);
    set_panic_hook();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let queue = cli.global.open()?;
    match cli.commands {
        Commands::Push(args) => args.run(&queue, &cancel).await,
        Commands::Pop(args) => args.run(&queue, &cancel).await,
        Commands::Peek(args) => args.run(&queue, &cancel).await,
        Commands::Count(args) => args.run(&queue).await,
        Commands::List(args) => args.run(&queue, &cancel).await,
        Commands::Drain(args) => args.run(&queue, &cancel).await,
        Commands::Clear(args) => args.run(&queue, &cancel).await,
        Commands::Heal(args) => args.run(&queue, &cancel).await,
        Commands::Poison(args) => args.run(&queue),
    }
}
